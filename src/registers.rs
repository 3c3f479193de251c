//! Register layout of the power station's input register block

/// Number of registers requested by every poll
pub const POLL_COUNT: u16 = 80;

pub const REG_AC_INPUT_W: usize = 3;
pub const REG_DC_INPUT_W: usize = 4;
pub const REG_INPUT_W: usize = 6;
pub const REG_OUTPUT_W: usize = 39;
pub const REG_FLAGS: usize = 41;
/// State of charge in tenths of a percent
pub const REG_BATTERY_PERMILLE: usize = 56;
pub const REG_TIME_TO_FULL_MIN: usize = 58;
pub const REG_TIME_TO_EMPTY_MIN: usize = 59;
/// Highest register a [`Reading`] uses
pub const LAST_REGISTER: usize = REG_TIME_TO_EMPTY_MIN;

const FLAG_DC_INPUT: u16 = 1 << 0;
const FLAG_AC_INPUT: u16 = 1 << 1;
const FLAG_USB: u16 = 1 << 9;
const FLAG_DC_OUTPUT: u16 = 1 << 10;
const FLAG_AC_OUTPUT: u16 = 1 << 11;
const FLAG_LIGHT: u16 = 1 << 12;
const FLAG_AC_INPUT_ALT: u16 = 1 << 14;
const FLAG_DC_INPUT_ALT: u16 = 1 << 15;

/// The register values of one report, indexed from zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBlock(Vec<u16>);

impl RegisterBlock {
    /// Read big endian pairs from `data` starting at `offset`. A trailing odd byte is ignored.
    pub fn from_bytes(data: &[u8], offset: usize) -> Self {
        let nums = data
            .get(offset..)
            .unwrap_or_default()
            .chunks_exact(2)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
            .collect();
        Self(nums)
    }

    /// The value of register `index`, or `None` if the report did not reach that far
    pub fn get(&self, index: usize) -> Option<u16> {
        self.0.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Bit-flag decomposition of the status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags {
    pub ac_input: bool,
    pub dc_input: bool,
    pub usb: bool,
    pub dc_output: bool,
    pub ac_output: bool,
    pub light: bool,
}

impl StatusFlags {
    pub fn from_bits(bits: u16) -> Self {
        let set = |mask: u16| bits & mask != 0;
        Self {
            ac_input: set(FLAG_AC_INPUT) || set(FLAG_AC_INPUT_ALT),
            dc_input: set(FLAG_DC_INPUT) || set(FLAG_DC_INPUT_ALT),
            usb: set(FLAG_USB),
            dc_output: set(FLAG_DC_OUTPUT),
            ac_output: set(FLAG_AC_OUTPUT),
            light: set(FLAG_LIGHT),
        }
    }

    /// Where power is coming from.
    ///
    /// `Grid` means an external source is plugged in, not that the battery is charging.
    pub fn power_source(&self) -> PowerSource {
        if self.ac_input || self.dc_input {
            PowerSource::Grid
        } else {
            PowerSource::Battery
        }
    }
}

/// Coarse classification of the current power source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSource {
    Grid,
    Battery,
    #[default]
    Unknown,
}

/// The quantities of interest extracted from one report.
///
/// `None` means the report did not contain the register. A `Some(0)` is a measured zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reading {
    pub battery_permille: Option<u16>,
    pub ac_input_w: Option<u16>,
    pub dc_input_w: Option<u16>,
    pub input_w: Option<u16>,
    pub output_w: Option<u16>,
    pub time_to_full_min: Option<u16>,
    pub time_to_empty_min: Option<u16>,
    pub flags: Option<StatusFlags>,
}

impl Reading {
    pub fn from_registers(registers: &RegisterBlock) -> Self {
        Self {
            battery_permille: registers.get(REG_BATTERY_PERMILLE),
            ac_input_w: registers.get(REG_AC_INPUT_W),
            dc_input_w: registers.get(REG_DC_INPUT_W),
            input_w: registers.get(REG_INPUT_W),
            output_w: registers.get(REG_OUTPUT_W),
            time_to_full_min: registers.get(REG_TIME_TO_FULL_MIN),
            time_to_empty_min: registers.get(REG_TIME_TO_EMPTY_MIN),
            flags: registers.get(REG_FLAGS).map(StatusFlags::from_bits),
        }
    }

    /// `Unknown` when the flag register was missing from the report
    pub fn power_source(&self) -> PowerSource {
        self.flags
            .map(|flags| flags.power_source())
            .unwrap_or(PowerSource::Unknown)
    }
}

#[test]
fn test_register_block_out_of_range() {
    let block = RegisterBlock::from_bytes(&hex::decode("1104000000500001ff").unwrap(), 6);
    assert_eq!(block.len(), 1);
    assert_eq!(block.get(0), Some(1));
    assert_eq!(block.get(1), None);
    assert_eq!(block.get(1000), None);
}

#[test]
fn test_register_block_offset_past_end() {
    let block = RegisterBlock::from_bytes(&[0x11, 0x04], 6);
    assert!(block.is_empty());
}

#[test]
fn test_flags_ac_input_only() {
    let flags = StatusFlags::from_bits(FLAG_AC_INPUT);
    assert!(flags.ac_input);
    assert!(!flags.dc_input);
    assert_eq!(flags.power_source(), PowerSource::Grid);
}

#[test]
fn test_flags_redundant_input_bits() {
    assert!(StatusFlags::from_bits(FLAG_AC_INPUT_ALT).ac_input);
    assert!(StatusFlags::from_bits(FLAG_DC_INPUT_ALT).dc_input);
    assert_eq!(StatusFlags::from_bits(FLAG_DC_INPUT).power_source(), PowerSource::Grid);
}

#[test]
fn test_flags_no_input_is_battery() {
    let flags = StatusFlags::from_bits(FLAG_USB | FLAG_DC_OUTPUT | FLAG_LIGHT);
    assert_eq!(flags.power_source(), PowerSource::Battery);
    assert!(flags.usb);
    assert!(flags.dc_output);
    assert!(!flags.ac_output);
    assert!(flags.light);
}

#[test]
fn test_flags_ac_input_and_outlet() {
    let flags = StatusFlags::from_bits(0b0000_1010_0000_0010);
    assert_eq!(flags.power_source(), PowerSource::Grid);
    assert!(flags.ac_output);
}

#[test]
fn test_reading_without_flags_is_unknown() {
    let block = RegisterBlock::from_bytes(&[0u8; 6 + 2 * 10], 6);
    let reading = Reading::from_registers(&block);
    assert_eq!(reading.flags, None);
    assert_eq!(reading.ac_input_w, Some(0));
    assert_eq!(reading.battery_permille, None);
    assert_eq!(reading.power_source(), PowerSource::Unknown);
}
