//! The decoded device state and the snapshot exported from it

use serde::Serialize;

use crate::metrics;
use crate::registers::{PowerSource, Reading};

/// The on/off state of the switchable outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Outputs {
    /// The primary AC outlet
    pub ac: bool,
    /// The USB bank
    pub usb: bool,
    /// The DC bank
    pub dc: bool,
    /// The auxiliary light
    pub light: bool,
}

/// The last known state of the device, as decoded.
///
/// Quantities the device has not reported are `None`. They only become sentinels
/// when exported through [`DeviceState::snapshot`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceState {
    reading: Reading,
    outputs: Outputs,
    power_source: PowerSource,
}

impl DeviceState {
    /// Replace every register-derived field with the contents of `reading`
    pub fn apply(&mut self, reading: Reading) {
        if let Some(flags) = reading.flags {
            self.outputs = Outputs {
                ac: flags.ac_output,
                usb: flags.usb,
                dc: flags.dc_output,
                light: flags.light,
            };
        }
        self.power_source = reading.power_source();
        self.reading = reading;
    }

    /// Stop claiming to know where power comes from
    pub fn degrade(&mut self) {
        self.power_source = PowerSource::Unknown;
    }

    pub fn outputs(&self) -> Outputs {
        self.outputs
    }

    pub fn power_source(&self) -> PowerSource {
        self.power_source
    }

    /// Export the state with every numeric field strictly positive
    pub fn snapshot(&self) -> DeviceSnapshot {
        let r = &self.reading;
        DeviceSnapshot {
            battery_pct: metrics::battery_percent(r.battery_permille),
            input_w: metrics::floor_sentinel(r.input_w.map(f32::from)),
            ac_input_w: metrics::floor_sentinel(r.ac_input_w.map(f32::from)),
            dc_input_w: metrics::floor_sentinel(r.dc_input_w.map(f32::from)),
            output_w: metrics::floor_sentinel(r.output_w.map(f32::from)),
            time_to_full_min: metrics::floor_sentinel(r.time_to_full_min.map(f32::from)),
            time_to_empty_min: metrics::floor_sentinel(r.time_to_empty_min.map(f32::from)),
            universal_power_w: metrics::universal_power(self.power_source, r.input_w, r.output_w),
            universal_time_min: metrics::universal_time_minutes(r.time_to_full_min, r.time_to_empty_min),
            universal_time_hhmm: metrics::universal_time_hhmm(r.time_to_full_min, r.time_to_empty_min),
            outputs: self.outputs,
            power_source: self.power_source,
        }
    }
}

/// The externally visible state of the power station.
///
/// No numeric field is ever zero; unavailable data is reported as [`metrics::SENTINEL_MIN`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    /// State of charge in %
    pub battery_pct: f32,
    /// Total input power in W
    pub input_w: f32,
    /// AC input power in W
    pub ac_input_w: f32,
    /// DC input power in W
    pub dc_input_w: f32,
    /// Output power in W
    pub output_w: f32,
    pub time_to_full_min: f32,
    pub time_to_empty_min: f32,
    /// Input power on grid, output power on battery
    pub universal_power_w: f32,
    /// Time to full while charging, otherwise time to empty
    pub universal_time_min: u16,
    /// `universal_time_min` as `hours.minutes`
    pub universal_time_hhmm: f32,
    pub outputs: Outputs,
    pub power_source: PowerSource,
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        DeviceState::default().snapshot()
    }
}

#[cfg(test)]
fn reading(flags: u16) -> Reading {
    Reading {
        battery_permille: Some(532),
        ac_input_w: Some(210),
        dc_input_w: Some(0),
        input_w: Some(210),
        output_w: Some(85),
        time_to_full_min: Some(75),
        time_to_empty_min: Some(0),
        flags: Some(crate::registers::StatusFlags::from_bits(flags)),
    }
}

#[test]
fn test_default_snapshot_is_all_sentinels() {
    let snapshot = DeviceSnapshot::default();
    assert_eq!(snapshot.battery_pct, metrics::SENTINEL_MIN);
    assert_eq!(snapshot.input_w, metrics::SENTINEL_MIN);
    assert_eq!(snapshot.output_w, metrics::SENTINEL_MIN);
    assert_eq!(snapshot.universal_power_w, metrics::SENTINEL_MIN);
    assert_eq!(snapshot.universal_time_min, 1);
    assert_eq!(snapshot.power_source, PowerSource::Unknown);
    assert_eq!(snapshot.outputs, Outputs::default());
}

#[test]
fn test_apply_reading() {
    let mut state = DeviceState::default();
    state.apply(reading(0b0000_1010_0000_0010));
    let snapshot = state.snapshot();
    assert_eq!(snapshot.power_source, PowerSource::Grid);
    assert_eq!(snapshot.battery_pct, 53.2);
    assert_eq!(snapshot.universal_power_w, 210.0);
    assert_eq!(snapshot.dc_input_w, metrics::SENTINEL_MIN);
    assert_eq!(snapshot.universal_time_min, 75);
    assert!(snapshot.outputs.ac);
    assert!(snapshot.outputs.usb);
    assert!(!snapshot.outputs.light);
}

#[test]
fn test_degrade_keeps_readings() {
    let mut state = DeviceState::default();
    state.apply(reading(0));
    assert_eq!(state.power_source(), PowerSource::Battery);
    assert_eq!(state.snapshot().universal_power_w, 85.0);

    state.degrade();
    let snapshot = state.snapshot();
    assert_eq!(snapshot.power_source, PowerSource::Unknown);
    assert_eq!(snapshot.universal_power_w, metrics::SENTINEL_MIN);
    assert_eq!(snapshot.output_w, 85.0);
}
