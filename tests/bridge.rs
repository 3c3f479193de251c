//! Drive the bridge with a scripted transport on a paused clock

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use common::*;
use powerbridge::frame;
use powerbridge::registers::POLL_COUNT;
use powerbridge::{
    Bridge, BridgeHandle, CommandError, ConnectionState, OutputChannel, PowerSource, Timing, Transport,
    TransportEvent,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

#[derive(Default)]
struct Link {
    writes: Mutex<Vec<Vec<u8>>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    refuse_connect: AtomicBool,
    hang_connect: AtomicBool,
    fail_writes: AtomicBool,
}

impl Link {
    fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    async fn deliver(&self, event: TransportEvent) {
        let events = self.events.lock().unwrap().clone().expect("not subscribed");
        events.send(event).await.unwrap();
        // Let the bridge handle it
        sleep(Duration::from_millis(1)).await;
    }
}

struct MockTransport(Arc<Link>);

impl Transport for MockTransport {
    async fn connect(&mut self) -> anyhow::Result<()> {
        if self.0.refuse_connect.load(Ordering::SeqCst) {
            anyhow::bail!("refused");
        }
        if self.0.hang_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn subscribe(&mut self, events: mpsc::Sender<TransportEvent>) -> anyhow::Result<()> {
        *self.0.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn write(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        if self.0.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("link lost");
        }
        self.0.writes.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

fn poll_frame() -> Vec<u8> {
    frame::read_request(0, POLL_COUNT).to_vec()
}

/// Run `script` against a bridge connected to a fresh mock transport
async fn with_bridge<F, Fut>(link: Arc<Link>, script: F)
where
    F: FnOnce(BridgeHandle) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let (bridge, handle) = Bridge::new(MockTransport(link), Timing::default());
    tokio::select! {
        _ = bridge.run() => unreachable!(),
        _ = script(handle) => {}
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_poll_after_settle() {
    let link = Arc::new(Link::default());
    with_bridge(link.clone(), |handle| async move {
        sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.link_status().state, ConnectionState::AwaitingFirstPoll);
        assert!(link.writes().is_empty());

        sleep(Duration::from_millis(500)).await;
        assert_eq!(link.writes(), vec![poll_frame()]);
        assert_eq!(handle.link_status().state, ConnectionState::Polling);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(link.writes().len(), 2);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_report_updates_snapshot() {
    let link = Arc::new(Link::default());
    with_bridge(link.clone(), |handle| async move {
        sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.snapshot().power_source, PowerSource::Unknown);

        link.deliver(TransportEvent::Notification(report(AC_INPUT_AND_OUTLET, 380, 60)))
            .await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.power_source, PowerSource::Grid);
        assert!(snapshot.outputs.ac);
        assert_eq!(snapshot.universal_power_w, 380.0);
        assert_eq!(handle.link_status().consecutive_failures, 0);

        // Garbage leaves everything as it was
        link.deliver(TransportEvent::Notification(vec![0x11, 0x04, 0x50, 0x00])).await;
        assert_eq!(handle.snapshot(), snapshot);
        assert_eq!(handle.link_status().rejected_frames, 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_degrades() {
    let link = Arc::new(Link::default());
    with_bridge(link.clone(), |handle| async move {
        sleep(Duration::from_secs(1)).await;
        link.deliver(TransportEvent::Notification(report(0, 0, 60))).await;
        assert_eq!(handle.snapshot().power_source, PowerSource::Battery);

        // Nine more polls go unanswered
        sleep(Duration::from_secs(49)).await;
        assert_eq!(handle.link_status().consecutive_failures, 9);
        assert_eq!(handle.snapshot().power_source, PowerSource::Battery);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.link_status().consecutive_failures, 10);
        assert_eq!(handle.snapshot().power_source, PowerSource::Unknown);

        link.deliver(TransportEvent::Notification(report(0, 0, 60))).await;
        assert_eq!(handle.snapshot().power_source, PowerSource::Battery);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_forces_unknown_and_reconnects() {
    let link = Arc::new(Link::default());
    with_bridge(link.clone(), |handle| async move {
        sleep(Duration::from_secs(1)).await;
        link.deliver(TransportEvent::Notification(report(AC_INPUT_AND_OUTLET, 380, 60)))
            .await;
        link.deliver(TransportEvent::Disconnected).await;

        assert_eq!(handle.snapshot().power_source, PowerSource::Unknown);
        assert_eq!(handle.link_status().state, ConnectionState::Disconnected);
        assert_eq!(
            handle.request_output_change(OutputChannel::Usb, true).await,
            Err(CommandError::NotConnected)
        );

        sleep(Duration::from_secs(11)).await;
        assert_eq!(handle.link_status().connects, 2);
        assert!(handle.link_status().state != ConnectionState::Disconnected);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_command_rejected_while_connect_refused() {
    let link = Arc::new(Link::default());
    link.refuse_connect.store(true, Ordering::SeqCst);
    with_bridge(link.clone(), |handle| async move {
        sleep(Duration::from_millis(10)).await;
        assert_eq!(
            handle.request_output_change(OutputChannel::Light, true).await,
            Err(CommandError::NotConnected)
        );
        assert!(link.writes().is_empty());
        assert_eq!(handle.link_status().consecutive_failures, 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_commands_write_and_confirm() {
    let link = Arc::new(Link::default());
    with_bridge(link.clone(), |handle| async move {
        sleep(Duration::from_secs(1)).await;
        link.deliver(TransportEvent::Notification(report(AC_INPUT_AND_OUTLET, 380, 60)))
            .await;
        assert_eq!(link.writes().len(), 1);

        // Already on: no pulse
        assert_eq!(handle.request_output_change(OutputChannel::Ac, true).await, Ok(()));
        assert_eq!(link.writes().len(), 1);

        assert_eq!(handle.request_output_change(OutputChannel::Dc, true).await, Ok(()));
        assert_eq!(link.writes().last().unwrap(), &frame::write_request(25, 1).to_vec());
        assert!(!handle.snapshot().outputs.dc);

        // The confirming poll comes well before the regular period
        sleep(Duration::from_millis(400)).await;
        assert_eq!(link.writes().len(), 3);
        assert_eq!(link.writes().last().unwrap(), &poll_frame());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_command_answered_while_connect_hangs() {
    let link = Arc::new(Link::default());
    link.hang_connect.store(true, Ordering::SeqCst);
    let timing = Timing::default();
    with_bridge(link.clone(), |handle| async move {
        sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.link_status().state, ConnectionState::Connecting);

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            handle.request_output_change(OutputChannel::Usb, true),
        )
        .await;
        assert_eq!(result, Ok(Err(CommandError::NotConnected)));

        // The attempt is given up and retried after the backoff
        sleep(timing.connect_timeout).await;
        let status = handle.link_status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.consecutive_failures, 1);

        link.hang_connect.store(false, Ordering::SeqCst);
        sleep(timing.reconnect_backoff).await;
        assert_eq!(handle.link_status().connects, 1);
        assert!(link.writes().is_empty());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_counts_as_disconnect() {
    let link = Arc::new(Link::default());
    with_bridge(link.clone(), |handle| async move {
        sleep(Duration::from_secs(1)).await;
        link.deliver(TransportEvent::Notification(report(AC_INPUT_AND_OUTLET, 380, 60)))
            .await;

        link.fail_writes.store(true, Ordering::SeqCst);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.link_status().state, ConnectionState::Disconnected);
        assert_eq!(handle.snapshot().power_source, PowerSource::Unknown);

        link.fail_writes.store(false, Ordering::SeqCst);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.link_status().connects, 2);
        assert!(handle.link_status().state != ConnectionState::Disconnected);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_command_write_is_reported() {
    let link = Arc::new(Link::default());
    with_bridge(link.clone(), |handle| async move {
        sleep(Duration::from_secs(1)).await;
        link.fail_writes.store(true, Ordering::SeqCst);
        assert_eq!(
            handle.request_output_change(OutputChannel::Light, true).await,
            Err(CommandError::WriteFailed)
        );
        assert_eq!(handle.link_status().state, ConnectionState::Disconnected);
    })
    .await;
}
