//! Shared fixtures for the integration tests

use powerbridge::frame;
use powerbridge::registers::{self, POLL_COUNT};

/// AC input present, USB on, AC outlet on
#[allow(dead_code)]
pub const AC_INPUT_AND_OUTLET: u16 = 0b0000_1010_0000_0010;

/// A full poll response: the request echo followed by every register of the block
#[allow(dead_code)]
pub fn report(flags: u16, input_w: u16, output_w: u16) -> Vec<u8> {
    let mut registers = [0u16; POLL_COUNT as usize];
    registers[registers::REG_AC_INPUT_W] = input_w;
    registers[registers::REG_INPUT_W] = input_w;
    registers[registers::REG_OUTPUT_W] = output_w;
    registers[registers::REG_FLAGS] = flags;
    registers[registers::REG_BATTERY_PERMILLE] = 785;
    registers[registers::REG_TIME_TO_FULL_MIN] = 95;
    registers[registers::REG_TIME_TO_EMPTY_MIN] = 0;

    let mut msg = frame::read_request(0, POLL_COUNT)[..frame::ECHO_LEN].to_vec();
    for r in registers {
        msg.extend_from_slice(&r.to_be_bytes());
    }
    msg
}
