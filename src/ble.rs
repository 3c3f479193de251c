//! Bluetooth Low Energy transport.
//!
//! The power station exposes one GATT service with a write characteristic for requests and a
//! notify characteristic for responses. A response may arrive split over several notifications
//! when the negotiated payload size is small, so notifications are joined back into one message
//! before they are handed to the bridge.

use anyhow::anyhow;
use bluest::Adapter;
use bluest::Characteristic;
use bluest::Device;
use bluest::Uuid;
use futures_util::Stream;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::transport::{Transport, TransportEvent};

pub struct BleTransport {
    adapter: Adapter,
    name_prefix: String,
    device: Option<Device>,
    write: Option<Characteristic>,
    notify: Option<Characteristic>,
}

impl BleTransport {
    const SERVICE_ID: Uuid = Uuid::from_u128(0x0000a002_0000_1000_8000_00805f9b34fb);
    const WRITE_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000c304_0000_1000_8000_00805f9b34fb);
    const NOTIFY_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000c305_0000_1000_8000_00805f9b34fb);
    // How long to scan for the device before giving up
    const DISCOVERY_TIMEOUT_S: u64 = 30;
    // How long to wait without any notifications before considering the message completely received
    const MESSAGE_GAP_MS: u64 = 250;

    /// Create a new `BleTransport` for the first device whose name starts with `name_prefix`.
    /// Discovery happens on the first connect.
    pub async fn new(name_prefix: &str) -> anyhow::Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or(anyhow!("Default adapter not found"))?;
        adapter.wait_available().await?;

        Ok(Self {
            adapter,
            name_prefix: name_prefix.to_string(),
            device: None,
            write: None,
            notify: None,
        })
    }

    /// Disconnect from the device
    pub async fn stop(self) -> anyhow::Result<()> {
        if let Some(device) = &self.device {
            self.adapter.disconnect_device(device).await?;
        }
        Ok(())
    }

    async fn discover_device(&self) -> anyhow::Result<Device> {
        let mut adapter_events = self.adapter.scan(&[]).await?;
        let scan_timeout = Duration::from_secs(Self::DISCOVERY_TIMEOUT_S);
        while let Some(found) = timeout(scan_timeout, adapter_events.next())
            .await
            .map_err(|_| anyhow!("Device not found"))?
        {
            let Ok(name) = found.device.name_async().await else {
                continue;
            };
            if name.starts_with(&self.name_prefix) {
                info!("Found device {name}");
                return Ok(found.device);
            }
        }

        Err(anyhow!("Device not found"))
    }
}

impl Transport for BleTransport {
    async fn connect(&mut self) -> anyhow::Result<()> {
        let device = match &self.device {
            Some(device) => device.clone(),
            None => self.discover_device().await?,
        };

        if !device.is_connected().await {
            self.adapter.connect_device(&device).await?;
        }

        let service = device
            .discover_services_with_uuid(Self::SERVICE_ID)
            .await?
            .first()
            .ok_or(anyhow!("The device does not expose the power station service."))?
            .clone();
        let write = service
            .discover_characteristics_with_uuid(Self::WRITE_CHARACTERISTIC_ID)
            .await?
            .first()
            .ok_or(anyhow!("The device does not expose the write characteristic."))?
            .clone();
        let notify = service
            .discover_characteristics_with_uuid(Self::NOTIFY_CHARACTERISTIC_ID)
            .await?
            .first()
            .ok_or(anyhow!("The device does not expose the notify characteristic."))?
            .clone();

        self.device = Some(device);
        self.write = Some(write);
        self.notify = Some(notify);
        Ok(())
    }

    async fn subscribe(&mut self, events: mpsc::Sender<TransportEvent>) -> anyhow::Result<()> {
        let notify = self.notify.clone().ok_or(anyhow!("Not connected"))?;
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(forward_notifications(notify, events, ready_tx));
        ready_rx
            .await
            .map_err(|_| anyhow!("Notification task ended before subscribing"))?
    }

    async fn write(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        let write = self.write.as_ref().ok_or(anyhow!("Not connected"))?;
        debug!("TX: {}", hex::encode(frame));
        write.write(frame).await?;
        Ok(())
    }
}

/// Forward each message to `events` until the stream ends, then report a disconnect
async fn forward_notifications(
    notify: Characteristic,
    events: mpsc::Sender<TransportEvent>,
    ready: oneshot::Sender<anyhow::Result<()>>,
) {
    let reader = match notify.notify().await {
        Ok(reader) => {
            let _ = ready.send(Ok(()));
            reader
        }
        Err(err) => {
            let _ = ready.send(Err(err.into()));
            return;
        }
    };

    let gap = Duration::from_millis(BleTransport::MESSAGE_GAP_MS);
    if reassemble(reader, &events, gap).await {
        info!("End of notification stream");
        let _ = events.send(TransportEvent::Disconnected).await;
    }
}

/// Join notifications into messages and deliver them to `events`.
///
/// A response is delivered over multiple notifications whose boundaries carry no meaning, and the
/// response header does not tell reliably how long it is. Notifications are therefore appended to
/// the current message until none arrives for `gap`. Then the message is considered complete; if
/// it is not, the bridge rejects it.
///
/// Returns `false` if `events` was closed, `true` when the stream ended or failed.
async fn reassemble<S, E>(mut reader: S, events: &mpsc::Sender<TransportEvent>, gap: Duration) -> bool
where
    S: Stream<Item = Result<Vec<u8>, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut msg = Vec::<u8>::new();
    loop {
        let read_result = if msg.is_empty() {
            Ok(reader.next().await)
        } else {
            timeout(gap, reader.next()).await
        };

        match read_result {
            Err(_) => {
                // quiet for long enough
                if !deliver(events, &mut msg).await {
                    return false;
                }
            }
            Ok(Some(Ok(data))) => {
                debug!("RX notification: {}", hex::encode(&data));
                msg.extend_from_slice(&data);
            }
            Ok(Some(Err(err))) => {
                warn!("Notification error: {err}");
                break;
            }
            Ok(None) => break,
        }
    }

    msg.is_empty() || deliver(events, &mut msg).await
}

async fn deliver(events: &mpsc::Sender<TransportEvent>, msg: &mut Vec<u8>) -> bool {
    let message = std::mem::take(msg);
    debug!("RX message: {}", hex::encode(&message));
    events.send(TransportEvent::Notification(message)).await.is_ok()
}

#[cfg(test)]
fn fragments(parts: &[&str]) -> Vec<Result<Vec<u8>, String>> {
    parts.iter().map(|p| Ok(hex::decode(p).unwrap())).collect()
}

#[tokio::test(start_paused = true)]
async fn test_reassemble_joins_fragments_after_gap() {
    let (tx, mut rx) = mpsc::channel(4);
    let reader = futures_util::stream::iter(fragments(&["1104000000500001", "00020003"]))
        .chain(futures_util::stream::pending());

    tokio::select! {
        _ = reassemble(reader, &tx, Duration::from_millis(250)) => panic!("stream never ends"),
        event = rx.recv() => assert_eq!(
            event,
            Some(TransportEvent::Notification(hex::decode("110400000050000100020003").unwrap()))
        ),
    }
}

#[tokio::test(start_paused = true)]
async fn test_reassemble_separates_quiet_periods() {
    let (tx, mut rx) = mpsc::channel(4);
    let first = futures_util::stream::iter(fragments(&["11040000", "00500001"]));
    let later = futures_util::stream::once(async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok::<_, String>(hex::decode("1106001a00016b5d").unwrap())
    });
    let reader = first.chain(Box::pin(later));

    assert!(reassemble(reader, &tx, Duration::from_millis(250)).await);
    assert_eq!(
        rx.recv().await,
        Some(TransportEvent::Notification(hex::decode("1104000000500001").unwrap()))
    );
    assert_eq!(
        rx.recv().await,
        Some(TransportEvent::Notification(hex::decode("1106001a00016b5d").unwrap()))
    );
}

#[tokio::test]
async fn test_reassemble_stops_on_error() {
    let (tx, mut rx) = mpsc::channel(4);
    let mut items = fragments(&["1104"]);
    items.push(Err("link lost".to_string()));
    items.extend(fragments(&["0000"]));

    assert!(reassemble(futures_util::stream::iter(items), &tx, Duration::from_millis(250)).await);
    assert_eq!(rx.recv().await, Some(TransportEvent::Notification(vec![0x11, 0x04])));
}
