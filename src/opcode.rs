//! Command codes understood by every node.
//!
//! The two most-significant bits of a command select its [`Category`](crate::message::Category):
//!
//! | bits 15..14 | category |
//! |-------------|----------|
//! | `00`        | reserved |
//! | `01`        | SET      |
//! | `10`        | GET      |
//! | `11`        | SEND     |
//!
//! The remaining 14 bits identify the operation.

pub const CATEGORY_SHIFT: u32 = 14;
pub const CATEGORY_MASK: u16 = 0b11 << CATEGORY_SHIFT;
pub const OPERATION_MASK: u16 = !CATEGORY_MASK;

pub const SET: u16 = 0b01 << CATEGORY_SHIFT;
pub const GET: u16 = 0b10 << CATEGORY_SHIFT;
pub const SEND: u16 = 0b11 << CATEGORY_SHIFT;

// Baseline module commands
pub const PING: u16 = GET | 0x001;
pub const GET_TYPE: u16 = GET | 0x002;
pub const GET_TYPE_ALL: u16 = GET | 0x003;
pub const RESTART: u16 = SET | 0x004;
pub const LED: u16 = SET | 0x005;
pub const INTERNAL_TEMPERATURE: u16 = GET | 0x006;
pub const MODULE_ANNOUNCE: u16 = SEND | 0x007;
pub const SET_MASTER: u16 = SET | 0x008;

// Discrete I/O
pub const DIGITAL_WRITE: u16 = SET | 0x010;
pub const DIGITAL_READ: u16 = GET | 0x011;
pub const ATTACH_INPUT_NOTIFY: u16 = SET | 0x012;
pub const DETACH_INPUT_NOTIFY: u16 = SET | 0x013;
pub const INPUT_EVENT: u16 = SEND | 0x014;

// Stepper
pub const STEPPER_ATTACH_LIMIT_SWITCH: u16 = SET | 0x020;
pub const STEPPER_DETACH_LIMIT_SWITCH: u16 = SET | 0x021;
pub const STEPPER_STOP: u16 = SET | 0x022;
pub const STEPPER_EVENT: u16 = SEND | 0x023;
pub const STEPPER_IS_BUSY: u16 = GET | 0x024;

// Stepper motion. param low byte = motor for every stepper command.
pub const STEPPER_MOVE: u16 = SET | 0x025;
pub const STEPPER_RUN: u16 = SET | 0x026;
pub const STEPPER_GO_TO: u16 = SET | 0x027;
pub const STEPPER_GO_TO_DIR: u16 = SET | 0x028;
pub const STEPPER_GO_UNTIL: u16 = SET | 0x029;
pub const STEPPER_RELEASE_SWITCH: u16 = SET | 0x02A;
pub const STEPPER_GO_HOME: u16 = SET | 0x02B;
pub const STEPPER_GO_MARK: u16 = SET | 0x02C;
pub const STEPPER_RESET_POSITION: u16 = SET | 0x02D;
pub const STEPPER_SET_HOME: u16 = SET | 0x02E;
pub const STEPPER_SET_MARK: u16 = SET | 0x02F;
pub const STEPPER_GET_MARK: u16 = GET | 0x030;
pub const STEPPER_GET_POSITION: u16 = GET | 0x031;

// Stepper registers and status
pub const STEPPER_SELECT_STEP_MODE: u16 = GET | 0x032;
pub const STEPPER_SET_PARAM: u16 = SET | 0x033;
pub const STEPPER_GET_PARAM: u16 = GET | 0x034;
pub const STEPPER_SET_ANALOG_VALUE: u16 = GET | 0x035;
pub const STEPPER_GET_ANALOG_VALUE: u16 = GET | 0x036;
pub const STEPPER_READ_STATUS: u16 = GET | 0x037;
pub const STEPPER_GET_STATUS: u16 = GET | 0x038;
pub const STEPPER_FETCH_ALL_STATUS: u16 = SET | 0x039;
pub const STEPPER_GET_FETCHED_STATUS: u16 = GET | 0x03A;

// Stepper driver lines
pub const STEPPER_ATTACH_BUSY_INTERRUPT: u16 = SET | 0x03B;
pub const STEPPER_ATTACH_ERROR_HANDLER: u16 = SET | 0x03C;
pub const STEPPER_ATTACH_FLAG_INTERRUPT: u16 = SET | 0x03D;

// Reserved system commands
pub const SYSTEM: u16 = SET | 0x3F0;
pub const UPDATE_MODE: u16 = SET | 0x3F1;

/// High byte of the `SYSTEM` param: which listener the command targets.
pub const SYSTEM_TARGET_MULTIDROP: u8 = 0x01;
pub const SYSTEM_TARGET_BROADCAST: u8 = 0x02;

/// Low byte of the `SYSTEM` param: what to do with it.
pub const SYSTEM_ACTION_SUSPEND: u8 = 0x00;
pub const SYSTEM_ACTION_RESUME: u8 = 0x01;

/// Sentinel returned by `PING`.
pub const PING_SENTINEL: u32 = 0x0000_00AA;

/// Builds the `SYSTEM` param word from its target and action bytes.
pub const fn system_param(target: u8, action: u8) -> u16 {
    ((target as u16) << 8) | action as u16
}

/// Human-readable name for diagnostics. Unknown codes render as `None`.
pub fn name(command: u16) -> Option<&'static str> {
    let name = match command {
        PING => "PING",
        GET_TYPE => "GET_TYPE",
        GET_TYPE_ALL => "GET_TYPE_ALL",
        RESTART => "RESTART",
        LED => "LED",
        INTERNAL_TEMPERATURE => "INTERNAL_TEMPERATURE",
        MODULE_ANNOUNCE => "MODULE_ANNOUNCE",
        SET_MASTER => "SET_MASTER",
        DIGITAL_WRITE => "DIGITAL_WRITE",
        DIGITAL_READ => "DIGITAL_READ",
        ATTACH_INPUT_NOTIFY => "ATTACH_INPUT_NOTIFY",
        DETACH_INPUT_NOTIFY => "DETACH_INPUT_NOTIFY",
        INPUT_EVENT => "INPUT_EVENT",
        STEPPER_ATTACH_LIMIT_SWITCH => "STEPPER_ATTACH_LIMIT_SWITCH",
        STEPPER_DETACH_LIMIT_SWITCH => "STEPPER_DETACH_LIMIT_SWITCH",
        STEPPER_STOP => "STEPPER_STOP",
        STEPPER_EVENT => "STEPPER_EVENT",
        STEPPER_IS_BUSY => "STEPPER_IS_BUSY",
        STEPPER_MOVE => "STEPPER_MOVE",
        STEPPER_RUN => "STEPPER_RUN",
        STEPPER_GO_TO => "STEPPER_GO_TO",
        STEPPER_GO_TO_DIR => "STEPPER_GO_TO_DIR",
        STEPPER_GO_UNTIL => "STEPPER_GO_UNTIL",
        STEPPER_RELEASE_SWITCH => "STEPPER_RELEASE_SWITCH",
        STEPPER_GO_HOME => "STEPPER_GO_HOME",
        STEPPER_GO_MARK => "STEPPER_GO_MARK",
        STEPPER_RESET_POSITION => "STEPPER_RESET_POSITION",
        STEPPER_SET_HOME => "STEPPER_SET_HOME",
        STEPPER_SET_MARK => "STEPPER_SET_MARK",
        STEPPER_GET_MARK => "STEPPER_GET_MARK",
        STEPPER_GET_POSITION => "STEPPER_GET_POSITION",
        STEPPER_SELECT_STEP_MODE => "STEPPER_SELECT_STEP_MODE",
        STEPPER_SET_PARAM => "STEPPER_SET_PARAM",
        STEPPER_GET_PARAM => "STEPPER_GET_PARAM",
        STEPPER_SET_ANALOG_VALUE => "STEPPER_SET_ANALOG_VALUE",
        STEPPER_GET_ANALOG_VALUE => "STEPPER_GET_ANALOG_VALUE",
        STEPPER_READ_STATUS => "STEPPER_READ_STATUS",
        STEPPER_GET_STATUS => "STEPPER_GET_STATUS",
        STEPPER_FETCH_ALL_STATUS => "STEPPER_FETCH_ALL_STATUS",
        STEPPER_GET_FETCHED_STATUS => "STEPPER_GET_FETCHED_STATUS",
        STEPPER_ATTACH_BUSY_INTERRUPT => "STEPPER_ATTACH_BUSY_INTERRUPT",
        STEPPER_ATTACH_ERROR_HANDLER => "STEPPER_ATTACH_ERROR_HANDLER",
        STEPPER_ATTACH_FLAG_INTERRUPT => "STEPPER_ATTACH_FLAG_INTERRUPT",
        SYSTEM => "SYSTEM",
        UPDATE_MODE => "UPDATE_MODE",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations_do_not_overlap_category_bits() {
        for command in [PING, GET_TYPE, RESTART, LED, DIGITAL_WRITE, STEPPER_EVENT, STEPPER_GO_UNTIL, SYSTEM] {
            assert_ne!(command & CATEGORY_MASK, 0);
            assert_eq!(command & OPERATION_MASK & CATEGORY_MASK, 0);
        }
    }

    #[test]
    fn test_system_param_layout() {
        assert_eq!(system_param(SYSTEM_TARGET_MULTIDROP, SYSTEM_ACTION_RESUME), 0x0101);
        assert_eq!(system_param(SYSTEM_TARGET_BROADCAST, SYSTEM_ACTION_SUSPEND), 0x0200);
    }
}
