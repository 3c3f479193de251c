//! The single task that owns the session and talks to the transport.
//!
//! Three event sources feed one loop: the session's next deadline, notifications from the
//! transport, and output change requests from a [`BridgeHandle`]. Each event is handled to
//! completion before the next one is looked at, so a notification is always folded into the
//! state before the next poll goes out. A connect attempt in progress does not hold up requests:
//! they are answered with [`CommandError::NotConnected`] until it completes.
//!
//! The link counts as lost when the transport says so or when a write to it fails.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::command::{CommandError, OutputChannel};
use crate::config::Timing;
use crate::device_state::DeviceSnapshot;
use crate::frame::Frame;
use crate::session::{Action, LinkStatus, Session};
use crate::transport::{Transport, TransportEvent};

const EVENT_QUEUE: usize = 16;
const COMMAND_QUEUE: usize = 8;

struct OutputRequest {
    channel: OutputChannel,
    desired: bool,
    reply: oneshot::Sender<Result<(), CommandError>>,
}

/// Read the device state and request output changes while a [`Bridge`] runs
#[derive(Clone)]
pub struct BridgeHandle {
    commands: mpsc::Sender<OutputRequest>,
    snapshot: watch::Receiver<DeviceSnapshot>,
    status: watch::Receiver<LinkStatus>,
}

impl BridgeHandle {
    /// The latest state. Never blocks.
    pub fn snapshot(&self) -> DeviceSnapshot {
        *self.snapshot.borrow()
    }

    pub fn link_status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    /// A receiver that is notified whenever the snapshot changes
    pub fn watch_snapshot(&self) -> watch::Receiver<DeviceSnapshot> {
        self.snapshot.clone()
    }

    /// Turn an output on or off.
    ///
    /// Returns once the write was sent, or immediately if nothing needed sending. The outputs
    /// in the snapshot only change once the device reports the new state.
    pub async fn request_output_change(&self, channel: OutputChannel, desired: bool) -> Result<(), CommandError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(OutputRequest { channel, desired, reply })
            .await
            .map_err(|_| CommandError::BridgeStopped)?;
        response.await.map_err(|_| CommandError::BridgeStopped)?
    }
}

pub struct Bridge<T: Transport> {
    transport: T,
    session: Session,
    events_tx: mpsc::Sender<TransportEvent>,
    events: mpsc::Receiver<TransportEvent>,
    commands: mpsc::Receiver<OutputRequest>,
    snapshot: watch::Sender<DeviceSnapshot>,
    status: watch::Sender<LinkStatus>,
}

impl<T: Transport> Bridge<T> {
    pub fn new(transport: T, timing: Timing) -> (Self, BridgeHandle) {
        let session = Session::new(timing, Instant::now());
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (snapshot, snapshot_rx) = watch::channel(session.snapshot());
        let (status, status_rx) = watch::channel(session.link_status());

        let bridge = Self {
            transport,
            session,
            events_tx,
            events,
            commands,
            snapshot,
            status,
        };
        let handle = BridgeHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            status: status_rx,
        };
        (bridge, handle)
    }

    /// Run until the future is dropped
    pub async fn run(mut self) {
        loop {
            if let Some(action) = self.session.on_timer(Instant::now()) {
                self.perform(action).await;
            } else {
                let deadline = self.session.deadline();
                tokio::select! {
                    _ = sleep_until(deadline) => {}
                    Some(event) = self.events.recv() => self.handle_event(event),
                    Some(request) = self.commands.recv() => self.handle_request(request).await,
                }
            }
            self.publish();
        }
    }

    async fn perform(&mut self, action: Action) {
        match action {
            Action::Connect => self.connect().await,
            Action::Send(frame) => {
                if let Err(err) = self.transport.write(&frame).await {
                    warn!("Poll request failed: {err:#}");
                    self.session.on_disconnected(Instant::now());
                }
            }
        }
    }

    /// Connect and subscribe, answering requests meanwhile. Gives up at the session deadline.
    async fn connect(&mut self) {
        self.publish();
        let Self {
            transport,
            session,
            events_tx,
            commands,
            ..
        } = self;
        let deadline = session.deadline();

        let establish = async {
            transport.connect().await?;
            transport.subscribe(events_tx.clone()).await?;
            Ok::<(), anyhow::Error>(())
        };
        tokio::pin!(establish);

        let outcome = loop {
            tokio::select! {
                result = &mut establish => break Some(result),
                _ = sleep_until(deadline) => break None,
                Some(request) = commands.recv() => {
                    let result = session
                        .request_output(request.channel, request.desired, Instant::now())
                        .map(|_| ());
                    let _ = request.reply.send(result);
                }
            }
        };

        match outcome {
            Some(Ok(())) => session.on_connected(Instant::now()),
            Some(Err(err)) => {
                warn!("Connect failed: {err:#}");
                session.on_connect_failed(Instant::now());
            }
            None => {
                warn!("Connect attempt timed out");
                session.on_connect_failed(Instant::now());
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Notification(data) => match self.session.on_notification(&data) {
                Ok(Frame::Data(_)) => debug!("Report applied"),
                Ok(Frame::WriteAck) => debug!("Write acknowledged"),
                Err(err) => warn!("Dropped frame: {err}"),
            },
            TransportEvent::Disconnected => self.session.on_disconnected(Instant::now()),
        }
    }

    async fn handle_request(&mut self, request: OutputRequest) {
        let OutputRequest { channel, desired, reply } = request;
        let result = match self.session.request_output(channel, desired, Instant::now()) {
            Ok(Some(frame)) => match self.transport.write(&frame).await {
                Ok(()) => {
                    info!("Set {channel} {}", if desired { "on" } else { "off" });
                    Ok(())
                }
                Err(err) => {
                    warn!("Write to {channel} failed: {err:#}");
                    self.session.on_write_failed();
                    self.session.on_disconnected(Instant::now());
                    Err(CommandError::WriteFailed)
                }
            },
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };
        let _ = reply.send(result);
    }

    fn publish(&self) {
        let snapshot = self.session.snapshot();
        self.snapshot.send_if_modified(|current| {
            let changed = *current != snapshot;
            *current = snapshot;
            changed
        });
        let status = self.session.link_status();
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }
}
