//! Encode requests for, and classify responses from, the power station.
//!
//! Requests look like MODBUS RTU frames. Responses do not: the device echoes the request
//! and then appends raw register values without a checksum at any offset we can rely on.

use crc16::{State, MODBUS};
use thiserror::Error;

use crate::registers::RegisterBlock;

/// The fixed address the power station answers to
pub const DEVICE_ADDRESS: u8 = 0x11;
/// Read holding registers
pub const FN_READ_HOLDING: u8 = 0x03;
/// Read input registers, used for the periodic poll
pub const FN_READ_INPUT: u8 = 0x04;
/// Write a single register. Also the function code of the acknowledgement.
pub const FN_WRITE_SINGLE: u8 = 0x06;

/// Length of every request we send
pub const REQUEST_LEN: usize = 8;
/// Length of the request echo that prefixes a response
pub const ECHO_LEN: usize = 6;
/// Shortest buffer that could possibly hold a response
const MIN_RESPONSE_LEN: usize = 7;

/// Reasons an incoming buffer is not trusted
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("frame from unexpected device address {0:#04x}")]
    WrongDevice(u8),

    #[error("unknown function code {0:#04x}")]
    UnknownFunction(u8),
}

/// An incoming buffer that passed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// A register report
    Data(DataFrame<'a>),
    /// Confirmation of a write. Carries no register data.
    WriteAck,
}

/// A validated register report, still in wire form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrame<'a> {
    buffer: &'a [u8],
    byte_count: u8,
}

impl<'a> DataFrame<'a> {
    /// The declared byte count of the report
    pub fn byte_count(&self) -> u8 {
        self.byte_count
    }

    /// Offset of the first register value, past the request echo
    pub fn offset(&self) -> usize {
        ECHO_LEN
    }

    /// Extract the register values that follow the echo
    pub fn registers(&self) -> RegisterBlock {
        RegisterBlock::from_bytes(self.buffer, self.offset())
    }
}

/// Build a request for `count` registers starting at `start`
pub fn read_request(start: u16, count: u16) -> [u8; REQUEST_LEN] {
    request(FN_READ_INPUT, start, count)
}

/// Build a request that writes `value` to `register`
pub fn write_request(register: u16, value: u16) -> [u8; REQUEST_LEN] {
    request(FN_WRITE_SINGLE, register, value)
}

fn request(function: u8, a: u16, b: u16) -> [u8; REQUEST_LEN] {
    let mut frame = [0u8; REQUEST_LEN];
    frame[0] = DEVICE_ADDRESS;
    frame[1] = function;
    frame[2..4].copy_from_slice(&a.to_be_bytes());
    frame[4..6].copy_from_slice(&b.to_be_bytes());
    let crc = crc(&frame[..ECHO_LEN]);
    frame[6..].copy_from_slice(&crc);
    frame
}

/// Compute the CRC check value for the given bytes, low byte first
pub fn crc(data: &[u8]) -> [u8; 2] {
    State::<MODBUS>::calculate(data).to_le_bytes()
}

/// Classify an incoming notification buffer.
///
/// The response format is:
///
/// Start Byte | End Byte     | Meaning
/// 0          | 0            | Device address, always `DEVICE_ADDRESS`
/// 1          | 1            | Function code
/// 2          | 2            | Byte count
/// 0          | 5            | Echo of the request
/// 6          | ..           | Register values, big endian, two bytes each
///
/// The frame must be at least `3 + byte count + 2` bytes long. No checksum is verified;
/// the trailer is not at a position we can determine.
pub fn decode(buffer: &[u8]) -> Result<Frame<'_>, FrameError> {
    if buffer.len() < MIN_RESPONSE_LEN {
        return Err(FrameError::TooShort { len: buffer.len() });
    }

    let address = buffer[0];
    let function = buffer[1];
    let byte_count = buffer[2];

    let expected = 3 + byte_count as usize + 2;
    if buffer.len() < expected {
        return Err(FrameError::Truncated { expected, actual: buffer.len() });
    }

    if address != DEVICE_ADDRESS {
        return Err(FrameError::WrongDevice(address));
    }

    match function {
        FN_WRITE_SINGLE => Ok(Frame::WriteAck),
        FN_READ_HOLDING | FN_READ_INPUT => Ok(Frame::Data(DataFrame { buffer, byte_count })),
        other => Err(FrameError::UnknownFunction(other)),
    }
}

#[test]
fn test_read_request() {
    let rq = read_request(0, 0x50);
    assert_eq!(hex::encode(rq), "110400000050f2a6");
}

#[test]
fn test_write_request() {
    assert_eq!(hex::encode(write_request(26, 1)), "1106001a00016b5d");
    assert_eq!(hex::encode(write_request(24, 0)), "1106001800000b5d");
}

#[test]
fn test_checksum_known_request() {
    let rq = hex::decode("0103d0260019").unwrap();
    assert_eq!(crc(&rq), [0x5d, 0x0b]);
}

#[test]
fn test_checksum_order_sensitive() {
    let a = [0x11, 0x04, 0x00, 0x00, 0x00, 0x50];
    let b = [0x04, 0x11, 0x00, 0x00, 0x00, 0x50];
    assert_eq!(crc(&a), crc(&a));
    assert_ne!(crc(&a), crc(&b));
}

#[test]
fn test_decode_too_short() {
    let msg = hex::decode("110400000050").unwrap();
    assert_eq!(decode(&msg), Err(FrameError::TooShort { len: 6 }));
    assert_eq!(decode(&[]), Err(FrameError::TooShort { len: 0 }));
}

#[test]
fn test_decode_truncated() {
    let mut msg = vec![0x11, 0x04, 0x50];
    msg.extend_from_slice(&[0u8; 17]);
    assert_eq!(msg.len(), 20);
    assert_eq!(decode(&msg), Err(FrameError::Truncated { expected: 85, actual: 20 }));
}

#[test]
fn test_decode_truncated_before_address_check() {
    let msg = hex::decode("220410000000000000").unwrap();
    assert_eq!(decode(&msg), Err(FrameError::Truncated { expected: 21, actual: 9 }));
}

#[test]
fn test_decode_wrong_device() {
    let msg = hex::decode("2204000000010000").unwrap();
    assert_eq!(decode(&msg), Err(FrameError::WrongDevice(0x22)));
}

#[test]
fn test_decode_write_ack() {
    let msg = hex::decode("1106001a00016b5d").unwrap();
    assert_eq!(decode(&msg), Ok(Frame::WriteAck));
}

#[test]
fn test_decode_unknown_function() {
    let msg = hex::decode("1110000000010000").unwrap();
    assert_eq!(decode(&msg), Err(FrameError::UnknownFunction(0x10)));
}

#[test]
fn test_decode_data() {
    let msg = hex::decode("110400000002002a0007").unwrap();
    match decode(&msg) {
        Ok(Frame::Data(data)) => {
            assert_eq!(data.byte_count(), 0);
            assert_eq!(data.offset(), ECHO_LEN);
            let registers = data.registers();
            assert_eq!(registers.get(0), Some(0x2a));
            assert_eq!(registers.get(1), Some(0x07));
            assert_eq!(registers.get(2), None);
        }
        other => panic!("expected data frame, got {other:?}"),
    }
}
