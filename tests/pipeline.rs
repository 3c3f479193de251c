//! Decode a response and derive the snapshot from it, end to end

mod common;

use common::*;
use powerbridge::device_state::DeviceState;
use powerbridge::frame::{self, Frame, FrameError};
use powerbridge::metrics::SENTINEL_MIN;
use powerbridge::registers::Reading;
use powerbridge::{DeviceSnapshot, PowerSource};

fn derive(buffer: &[u8]) -> Result<DeviceSnapshot, FrameError> {
    let mut state = DeviceState::default();
    if let Frame::Data(data) = frame::decode(buffer)? {
        state.apply(Reading::from_registers(&data.registers()));
    }
    Ok(state.snapshot())
}

#[test]
fn test_truncated_response() {
    let mut msg = vec![0x11, 0x04, 0x50];
    msg.extend_from_slice(&[0xab; 17]);
    assert_eq!(msg.len(), 20);
    assert_eq!(
        frame::decode(&msg),
        Err(FrameError::Truncated { expected: 85, actual: 20 })
    );
}

#[test]
fn test_every_short_buffer_is_truncated() {
    let declared = 0x50usize;
    let mut full = vec![0x11, 0x04, declared as u8];
    full.resize(3 + declared + 2, 0);
    for len in 7..full.len() {
        assert!(
            matches!(frame::decode(&full[..len]), Err(FrameError::Truncated { .. })),
            "length {len}"
        );
    }
    assert!(frame::decode(&full).is_ok());
}

#[test]
fn test_ac_input_and_outlet() {
    let snapshot = derive(&report(AC_INPUT_AND_OUTLET, 420, 130)).unwrap();
    assert_eq!(snapshot.power_source, PowerSource::Grid);
    assert!(snapshot.outputs.ac);
    assert_eq!(snapshot.universal_power_w, 420.0);
    assert_eq!(snapshot.battery_pct, 78.5);
    assert_eq!(snapshot.universal_time_min, 95);
    assert!((snapshot.universal_time_hhmm - 1.35).abs() < 1e-4);
}

#[test]
fn test_no_input_is_battery() {
    let snapshot = derive(&report(0, 0, 130)).unwrap();
    assert_eq!(snapshot.power_source, PowerSource::Battery);
    assert_eq!(snapshot.universal_power_w, 130.0);
    assert!(!snapshot.outputs.ac);
}

#[test]
fn test_grid_with_zero_input_reports_sentinel() {
    let snapshot = derive(&report(AC_INPUT_AND_OUTLET, 0, 130)).unwrap();
    assert_eq!(snapshot.power_source, PowerSource::Grid);
    assert_eq!(snapshot.universal_power_w, SENTINEL_MIN);
    assert_eq!(snapshot.input_w, SENTINEL_MIN);
    assert_eq!(snapshot.time_to_empty_min, SENTINEL_MIN);
}

#[test]
fn test_decode_is_idempotent() {
    let msg = report(AC_INPUT_AND_OUTLET, 420, 130);
    assert_eq!(derive(&msg).unwrap(), derive(&msg).unwrap());
}

#[test]
fn test_short_data_frame_leaves_fields_unavailable() {
    // Only the first four registers made it
    let msg = hex::decode("1104000000500000000000000064").unwrap();
    let snapshot = derive(&msg).unwrap();
    assert_eq!(snapshot.ac_input_w, 100.0);
    assert_eq!(snapshot.output_w, SENTINEL_MIN);
    assert_eq!(snapshot.power_source, PowerSource::Unknown);
}
