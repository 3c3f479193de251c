//! Externally safe values derived from a reading.
//!
//! Consumers of the snapshot treat zero or a missing field as an error, so every value
//! produced here is strictly positive. "No usable data" is reported as [`SENTINEL_MIN`].

use crate::registers::PowerSource;

/// Reported instead of zero or an unavailable value
pub const SENTINEL_MIN: f32 = 0.01;

pub const TIME_MIN_MINUTES: u16 = 1;
pub const TIME_MAX_MINUTES: u16 = 9999;

pub const HHMM_MIN: f32 = 0.01;
pub const HHMM_MAX: f32 = 99.59;
/// Charging time beyond what `HHMM_MAX` can express
pub const HHMM_UNBOUNDED: f32 = 99.99;

/// Floor a value at the sentinel, mapping unavailable to the sentinel
pub fn floor_sentinel(value: Option<f32>) -> f32 {
    match value {
        Some(v) if v > SENTINEL_MIN => v,
        _ => SENTINEL_MIN,
    }
}

/// Battery percentage from the tenths-of-a-percent register
pub fn battery_percent(permille: Option<u16>) -> f32 {
    floor_sentinel(permille.map(|p| p as f32 / 10.0))
}

/// Input power when on grid, output power when on battery
pub fn universal_power(source: PowerSource, input_w: Option<u16>, output_w: Option<u16>) -> f32 {
    let chosen = match source {
        PowerSource::Grid => input_w,
        PowerSource::Battery => output_w,
        PowerSource::Unknown => None,
    };
    floor_sentinel(chosen.map(f32::from))
}

fn remaining_minutes(time_to_full: Option<u16>, time_to_empty: Option<u16>) -> u16 {
    match time_to_full {
        Some(full) if full > 0 => full,
        _ => time_to_empty.unwrap_or(0),
    }
}

/// Time to full while charging, otherwise time to empty, in minutes
pub fn universal_time_minutes(time_to_full: Option<u16>, time_to_empty: Option<u16>) -> u16 {
    remaining_minutes(time_to_full, time_to_empty).clamp(TIME_MIN_MINUTES, TIME_MAX_MINUTES)
}

/// The same time as [`universal_time_minutes`], encoded as `hours + minutes / 100`.
///
/// A nonzero time to full that does not fit is reported as [`HHMM_UNBOUNDED`].
pub fn universal_time_hhmm(time_to_full: Option<u16>, time_to_empty: Option<u16>) -> f32 {
    let minutes = remaining_minutes(time_to_full, time_to_empty);
    let hours = minutes / 60;
    if hours > 99 {
        return match time_to_full {
            Some(full) if full > 0 => HHMM_UNBOUNDED,
            _ => HHMM_MAX,
        };
    }
    let encoded = hours as f32 + (minutes % 60) as f32 / 100.0;
    encoded.clamp(HHMM_MIN, HHMM_MAX)
}

#[test]
fn test_floor_sentinel() {
    assert_eq!(floor_sentinel(None), SENTINEL_MIN);
    assert_eq!(floor_sentinel(Some(0.0)), SENTINEL_MIN);
    assert_eq!(floor_sentinel(Some(-3.0)), SENTINEL_MIN);
    assert_eq!(floor_sentinel(Some(12.5)), 12.5);
}

#[test]
fn test_battery_percent() {
    assert_eq!(battery_percent(Some(875)), 87.5);
    assert_eq!(battery_percent(Some(0)), SENTINEL_MIN);
    assert_eq!(battery_percent(None), SENTINEL_MIN);
}

#[test]
fn test_universal_power_grid_zero_input() {
    assert_eq!(universal_power(PowerSource::Grid, Some(0), Some(300)), SENTINEL_MIN);
}

#[test]
fn test_universal_power_by_source() {
    assert_eq!(universal_power(PowerSource::Grid, Some(450), Some(120)), 450.0);
    assert_eq!(universal_power(PowerSource::Battery, Some(450), Some(120)), 120.0);
    assert_eq!(universal_power(PowerSource::Unknown, Some(450), Some(120)), SENTINEL_MIN);
    assert_eq!(universal_power(PowerSource::Battery, Some(450), None), SENTINEL_MIN);
}

#[test]
fn test_universal_time_minutes() {
    assert_eq!(universal_time_minutes(Some(90), Some(600)), 90);
    assert_eq!(universal_time_minutes(Some(0), Some(600)), 600);
    assert_eq!(universal_time_minutes(Some(0), Some(0)), 1);
    assert_eq!(universal_time_minutes(None, None), 1);
    assert_eq!(universal_time_minutes(None, Some(60000)), 9999);
}

#[test]
fn test_universal_time_hhmm() {
    assert!((universal_time_hhmm(Some(90), None) - 1.30).abs() < 1e-4);
    assert!((universal_time_hhmm(Some(0), Some(605)) - 10.05).abs() < 1e-4);
    assert_eq!(universal_time_hhmm(Some(0), Some(0)), HHMM_MIN);
    assert_eq!(universal_time_hhmm(Some(0), Some(6000)), 99.59);
    assert_eq!(universal_time_hhmm(Some(6000), Some(30)), HHMM_UNBOUNDED);
    assert!((universal_time_hhmm(Some(5999), None) - HHMM_MAX).abs() < 1e-4);
}
