//! Translate requested output changes into write frames

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::device_state::Outputs;
use crate::frame::{self, REQUEST_LEN};

const REG_USB: u16 = 24;
const REG_DC: u16 = 25;
const REG_AC_TOGGLE: u16 = 26;
const REG_LIGHT: u16 = 27;

/// A switchable output of the power station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputChannel {
    /// The primary AC outlet. The device only accepts a toggle pulse for it.
    Ac,
    Usb,
    Dc,
    Light,
}

impl OutputChannel {
    pub fn register(self) -> u16 {
        match self {
            OutputChannel::Ac => REG_AC_TOGGLE,
            OutputChannel::Usb => REG_USB,
            OutputChannel::Dc => REG_DC,
            OutputChannel::Light => REG_LIGHT,
        }
    }

    /// Whether the register toggles the output rather than setting it
    pub fn is_toggle(self) -> bool {
        self == OutputChannel::Ac
    }

    fn current(self, outputs: &Outputs) -> bool {
        match self {
            OutputChannel::Ac => outputs.ac,
            OutputChannel::Usb => outputs.usb,
            OutputChannel::Dc => outputs.dc,
            OutputChannel::Light => outputs.light,
        }
    }
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputChannel::Ac => "ac",
            OutputChannel::Usb => "usb",
            OutputChannel::Dc => "dc",
            OutputChannel::Light => "light",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputChannel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ac" => Ok(OutputChannel::Ac),
            "usb" => Ok(OutputChannel::Usb),
            "dc" => Ok(OutputChannel::Dc),
            "light" | "led" => Ok(OutputChannel::Light),
            other => Err(anyhow::anyhow!("unknown output channel {other:?}")),
        }
    }
}

/// Why an output change was not accepted
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("not connected to the device")]
    NotConnected,

    #[error("the write could not be sent")]
    WriteFailed,

    #[error("the bridge is not running")]
    BridgeStopped,
}

/// The last write issued, kept until a report confirms or contradicts it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    pub channel: OutputChannel,
    /// The output state the write is meant to produce
    pub desired: bool,
}

impl PendingWrite {
    /// The value written to the channel's register
    pub fn value(&self) -> u16 {
        if self.channel.is_toggle() {
            1
        } else {
            self.desired as u16
        }
    }

    pub fn frame(&self) -> [u8; REQUEST_LEN] {
        frame::write_request(self.channel.register(), self.value())
    }
}

/// Decide what to write to turn `channel` on or off.
///
/// Level-set channels always get a write. The toggle channel is only pulsed when the
/// cached state differs and the same pulse is not already awaiting confirmation.
/// `None` means nothing needs to be sent.
pub fn plan(
    channel: OutputChannel,
    desired: bool,
    outputs: &Outputs,
    pending: Option<PendingWrite>,
) -> Option<PendingWrite> {
    let write = PendingWrite { channel, desired };
    if !channel.is_toggle() {
        return Some(write);
    }
    if channel.current(outputs) == desired || pending == Some(write) {
        return None;
    }
    Some(write)
}

#[test]
fn test_level_set_always_writes() {
    let outputs = Outputs { usb: true, ..Default::default() };
    let write = plan(OutputChannel::Usb, true, &outputs, None).unwrap();
    assert_eq!(hex::encode(write.frame()), "110600180001ca9d");
    let write = plan(OutputChannel::Usb, false, &outputs, None).unwrap();
    assert_eq!(hex::encode(write.frame()), "1106001800000b5d");
}

#[test]
fn test_toggle_same_state_is_noop() {
    let outputs = Outputs { ac: true, ..Default::default() };
    assert_eq!(plan(OutputChannel::Ac, true, &outputs, None), None);
    assert_eq!(plan(OutputChannel::Ac, false, &Outputs::default(), None), None);
}

#[test]
fn test_toggle_pulses_one() {
    let write = plan(OutputChannel::Ac, false, &Outputs { ac: true, ..Default::default() }, None).unwrap();
    assert_eq!(write.value(), 1);
    assert_eq!(hex::encode(write.frame()), "1106001a00016b5d");
}

#[test]
fn test_toggle_not_repeated_while_pending() {
    let outputs = Outputs::default();
    let first = plan(OutputChannel::Ac, true, &outputs, None);
    assert!(first.is_some());
    assert_eq!(plan(OutputChannel::Ac, true, &outputs, first), None);
    assert!(plan(OutputChannel::Light, true, &outputs, first).is_some());
}

#[test]
fn test_parse_channel() {
    assert_eq!("AC".parse::<OutputChannel>().unwrap(), OutputChannel::Ac);
    assert_eq!("led".parse::<OutputChannel>().unwrap(), OutputChannel::Light);
    assert!("fan".parse::<OutputChannel>().is_err());
}
