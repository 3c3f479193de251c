//! The connection and poll state machine.
//!
//! [`Session`] performs no IO. The caller tells it what happened (time passed, the transport
//! connected, a notification arrived) and it answers with the [`Action`] to perform next.
//! All timestamps are passed in, so the machine can be driven by a real or a paused clock.

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::{self, CommandError, OutputChannel, PendingWrite};
use crate::config::Timing;
use crate::device_state::{DeviceSnapshot, DeviceState};
use crate::frame::{self, Frame, FrameError, ECHO_LEN, REQUEST_LEN};
use crate::registers::{PowerSource, Reading, LAST_REGISTER, POLL_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Subscribed, waiting for the subscription to settle before the first poll
    AwaitingFirstPoll,
    Polling,
}

/// Something the driver must do on behalf of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Connect the transport and subscribe to notifications
    Connect,
    /// Write a frame to the transport
    Send([u8; REQUEST_LEN]),
}

/// Health of the link, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub rejected_frames: u64,
    pub connects: u64,
}

pub struct Session {
    timing: Timing,
    state: ConnectionState,
    /// When the next time-driven transition is due
    deadline: Instant,
    /// Poll periods or disconnected periods without a report. Never exceeds the threshold.
    failures: u32,
    device: DeviceState,
    pending: Option<PendingWrite>,
    rejected_frames: u64,
    connects: u64,
}

impl Session {
    /// A disconnected session that will ask to connect at `now`
    pub fn new(timing: Timing, now: Instant) -> Self {
        Self {
            timing,
            state: ConnectionState::Disconnected,
            deadline: now,
            failures: 0,
            device: DeviceState::default(),
            pending: None,
            rejected_frames: 0,
            connects: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::AwaitingFirstPoll | ConnectionState::Polling)
    }

    pub fn device(&self) -> &DeviceState {
        &self.device
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.device.snapshot()
    }

    pub fn link_status(&self) -> LinkStatus {
        LinkStatus {
            state: self.state,
            consecutive_failures: self.failures,
            rejected_frames: self.rejected_frames,
            connects: self.connects,
        }
    }

    /// Perform whatever transition is due at `now`
    pub fn on_timer(&mut self, now: Instant) -> Option<Action> {
        if now < self.deadline {
            return None;
        }
        match self.state {
            ConnectionState::Disconnected => {
                info!("Connecting");
                self.state = ConnectionState::Connecting;
                // The attempt is abandoned if still running by then
                self.deadline = now + self.timing.connect_timeout;
                Some(Action::Connect)
            }
            ConnectionState::Connecting => {
                warn!("Connect attempt did not complete");
                self.on_connect_failed(now);
                None
            }
            ConnectionState::AwaitingFirstPoll | ConnectionState::Polling => {
                self.state = ConnectionState::Polling;
                Some(self.poll(now))
            }
        }
    }

    /// The transport connected and subscribed to notifications
    pub fn on_connected(&mut self, now: Instant) {
        info!("Connected, first poll in {:?}", self.timing.settle_delay);
        self.state = ConnectionState::AwaitingFirstPoll;
        self.failures = 0;
        self.connects += 1;
        self.deadline = now + self.timing.settle_delay;
    }

    pub fn on_connect_failed(&mut self, now: Instant) {
        self.state = ConnectionState::Disconnected;
        self.deadline = now + self.timing.reconnect_backoff;
        self.record_failure();
    }

    /// The transport reported a disconnect. Any response still in flight is abandoned.
    pub fn on_disconnected(&mut self, now: Instant) {
        info!("Disconnected, reconnecting in {:?}", self.timing.reconnect_backoff);
        self.state = ConnectionState::Disconnected;
        self.device.degrade();
        self.pending = None;
        self.deadline = now + self.timing.reconnect_backoff;
    }

    /// Fold an incoming notification into the device state.
    ///
    /// Only a complete data frame changes anything. Rejected frames are counted and otherwise ignored.
    pub fn on_notification<'a>(&mut self, buffer: &'a [u8]) -> Result<Frame<'a>, FrameError> {
        let frame = decode_complete(buffer).inspect_err(|err| {
            self.rejected_frames += 1;
            debug!("Rejected frame: {err}: {}", hex::encode(buffer));
        })?;

        if let Frame::Data(data) = &frame {
            let reading = Reading::from_registers(&data.registers());
            self.device.apply(reading);
            self.failures = 0;
            self.pending = None;
        }

        Ok(frame)
    }

    /// Plan an output change, returning the frame to send if one is needed
    pub fn request_output(
        &mut self,
        channel: OutputChannel,
        desired: bool,
        now: Instant,
    ) -> Result<Option<[u8; REQUEST_LEN]>, CommandError> {
        if !self.is_connected() {
            return Err(CommandError::NotConnected);
        }

        let Some(write) = command::plan(channel, desired, &self.device.outputs(), self.pending) else {
            debug!("{channel} already {}", on_off(desired));
            return Ok(None);
        };

        self.pending = Some(write);
        let confirm_at = now + self.timing.confirm_delay;
        if confirm_at < self.deadline {
            self.deadline = confirm_at;
        }
        Ok(Some(write.frame()))
    }

    /// The frame planned by [`Session::request_output`] could not be written
    pub fn on_write_failed(&mut self) {
        self.pending = None;
    }

    fn poll(&mut self, now: Instant) -> Action {
        // Taken back when a report arrives
        self.record_failure();
        self.deadline = now + self.timing.poll_period;
        Action::Send(frame::read_request(0, POLL_COUNT))
    }

    fn record_failure(&mut self) {
        let threshold = self.timing.failure_threshold;
        self.failures = (self.failures + 1).min(threshold);
        if self.failures >= threshold && self.device.power_source() != PowerSource::Unknown {
            warn!("No report for {} periods, power source unknown", self.failures);
            self.device.degrade();
        }
    }
}

/// Decode `buffer`, also rejecting a data frame that stops short of [`LAST_REGISTER`].
///
/// The byte count checked by [`frame::decode`] is the echo's start address, zero for our poll,
/// so the first fragment of a split response would otherwise pass as a complete report.
fn decode_complete(buffer: &[u8]) -> Result<Frame<'_>, FrameError> {
    let frame = frame::decode(buffer)?;
    if let Frame::Data(data) = &frame {
        if data.registers().get(LAST_REGISTER).is_none() {
            return Err(FrameError::Truncated {
                expected: ECHO_LEN + 2 * (LAST_REGISTER + 1),
                actual: buffer.len(),
            });
        }
    }
    Ok(frame)
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
