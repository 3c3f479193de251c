//! Bridge certain portable power stations to a stable device-state model over Bluetooth Low Energy
//!
//! The power station has a BLE interface with one write and one notify characteristic. On top of
//! that it speaks an undocumented register protocol which resembles MODBUS RTU on the way in but not
//! on the way out: responses echo the request and append raw register values without a usable
//! checksum.
//!
//! The bridge polls the register block periodically and derives:
//!
//! - State of charge (%)
//! - Input and output power (W)
//! - Time to full and time to empty (minutes)
//! - The state of the AC, USB, DC and light outputs
//! - Whether the device runs from the grid or from its battery
//!
//! Every numeric value exported is strictly positive. Unknown values are reported as
//! [`metrics::SENTINEL_MIN`].
//!
//! # Example
//!
//! ```no_run
//! # use powerbridge::{BleTransport, Bridge, BridgeConfig, OutputChannel};
//! #
//! # #[tokio::main(flavor = "current_thread")]
//! # pub async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig::default();
//!     let transport = BleTransport::new(&config.device_name_prefix).await?;
//!     let (bridge, handle) = Bridge::new(transport, config.timing);
//!     tokio::select! {
//!         _ = bridge.run() => {}
//!         _ = async {
//!             tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!             println!("{:?}", handle.snapshot());
//!             let _ = handle.request_output_change(OutputChannel::Usb, true).await;
//!         } => {}
//!     }
//! #   Ok(())
//! # }
//! ```

mod ble;
mod bridge;
pub mod command;
mod config;
pub mod device_state;
pub mod frame;
pub mod metrics;
pub mod registers;
pub mod session;
pub mod transport;

pub use ble::BleTransport;
pub use bridge::{Bridge, BridgeHandle};
pub use command::{CommandError, OutputChannel};
pub use config::{BridgeConfig, Timing};
pub use device_state::{DeviceSnapshot, Outputs};
pub use registers::PowerSource;
pub use session::{ConnectionState, LinkStatus};
pub use transport::{Transport, TransportEvent};
