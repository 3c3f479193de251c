//! The link to the device, as the bridge sees it

use tokio::sync::mpsc;

/// Something the transport reports without being asked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One notification buffer, as received
    Notification(Vec<u8>),
    /// The link went down
    Disconnected,
}

/// A connection to the power station which delivers notifications as events.
///
/// Implementations are driven from a single task and need not be `Send`.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Connect to the device
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Start delivering notifications to `events`.
    ///
    /// When the notifications stop the transport sends [`TransportEvent::Disconnected`].
    async fn subscribe(&mut self, events: mpsc::Sender<TransportEvent>) -> anyhow::Result<()>;

    /// Send one request frame
    async fn write(&mut self, frame: &[u8]) -> anyhow::Result<()>;
}
