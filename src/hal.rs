//! Peripheral capabilities consumed by the node core.
//!
//! Drivers live outside this crate; they are reached only through these
//! traits. Host builds use the recording doubles from [`crate::sim`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Callback installed on an interrupt line. Runs in interrupt context: it
/// must not block nor allocate.
pub type InterruptCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    #[error("channel {0} does not exist")]
    NoSuchChannel(usize),
    #[error("interrupt already armed on channel {0}")]
    AlreadyArmed(usize),
    #[error("temperature sensor unavailable: {0}")]
    Sensor(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LedColor {
    None = 0,
    Red = 1,
    Green = 2,
    Blue = 3,
    Yellow = 4,
    Cyan = 5,
    Purple = 6,
    White = 7,
}

impl LedColor {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LedColor::None),
            1 => Some(LedColor::Red),
            2 => Some(LedColor::Green),
            3 => Some(LedColor::Blue),
            4 => Some(LedColor::Yellow),
            5 => Some(LedColor::Cyan),
            6 => Some(LedColor::Purple),
            7 => Some(LedColor::White),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LedAction {
    On = 0,
    Off = 1,
    Blink = 2,
}

impl LedAction {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LedAction::On),
            1 => Some(LedAction::Off),
            2 => Some(LedAction::Blink),
            _ => None,
        }
    }
}

/// Status lines of the stepper driver chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotorLine {
    Busy,
    Error,
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StopMode {
    SoftStop = 0,
    HardStop = 1,
    SoftHiZ = 2,
    HardHiZ = 3,
}

impl StopMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => StopMode::HardStop,
            2 => StopMode::SoftHiZ,
            3 => StopMode::HardHiZ,
            _ => StopMode::SoftStop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    Reverse = 0,
    Forward = 1,
}

impl Direction {
    /// Any non-zero value drives forward.
    pub fn from_u8(value: u8) -> Self {
        if value == 0 {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }
}

/// What the driver does with its position counter when the switch trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SwitchAction {
    ResetPosition = 0,
    CopyToMark = 8,
}

impl SwitchAction {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SwitchAction::ResetPosition),
            8 => Some(SwitchAction::CopyToMark),
            _ => None,
        }
    }
}

/// Microstepping resolution, full step to 1/128.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StepMode {
    Full = 0,
    Half = 1,
    Quarter = 2,
    Eighth = 3,
    Sixteenth = 4,
    ThirtySecond = 5,
    SixtyFourth = 6,
    OneTwentyEighth = 7,
}

impl StepMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StepMode::Full),
            1 => Some(StepMode::Half),
            2 => Some(StepMode::Quarter),
            3 => Some(StepMode::Eighth),
            4 => Some(StepMode::Sixteenth),
            5 => Some(StepMode::ThirtySecond),
            6 => Some(StepMode::SixtyFourth),
            7 => Some(StepMode::OneTwentyEighth),
            _ => None,
        }
    }
}

/// Motion commands understood by the driver chip. Positions are absolute
/// microsteps, speeds are in the chip's step/tick units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Motion {
    Move { direction: Direction, steps: u32 },
    Run { direction: Direction, speed: u32 },
    GoTo { position: i32 },
    GoToDir { direction: Direction, position: i32 },
    GoUntil { action: SwitchAction, direction: Direction, speed: u32 },
    ReleaseSwitch { action: SwitchAction, direction: Direction },
    GoHome,
    GoMark,
    ResetPosition,
}

/// LED, temperature sensor and discrete I/O of the board.
pub trait Peripherals: Send + Sync {
    fn led_on(&self, color: LedColor);
    fn led_off(&self);
    fn led_blink(&self, color: LedColor, period_ms: u32);

    /// One-time sensor bring-up. Calling it again must be harmless.
    fn temperature_init(&self) -> Result<(), HalError>;
    /// Celsius.
    fn read_temperature(&self) -> f32;

    fn input_count(&self) -> usize;
    fn output_count(&self) -> usize;
    /// Electrical level of a discrete input, `true` = high.
    fn digital_read(&self, input: usize) -> bool;
    fn digital_write(&self, output: usize, level: bool);

    fn arm_interrupt(&self, input: usize, callback: InterruptCallback) -> Result<(), HalError>;
    fn disarm_interrupt(&self, input: usize);
}

/// Stepper driver chip(s) of a stepper board. `motor` is always below
/// [`MotorDriver::motor_count`]; callers check it.
pub trait MotorDriver: Send + Sync {
    fn motor_count(&self) -> usize;
    /// Drives the chip's limit-switch input. `true` = released (pulled high).
    fn set_switch_level(&self, motor: usize, level: bool);

    fn execute(&self, motor: usize, motion: Motion);
    fn stop(&self, motor: usize, mode: StopMode);
    fn is_busy(&self, motor: usize) -> bool;

    fn position(&self, motor: usize) -> i32;
    fn mark(&self, motor: usize) -> i32;
    fn set_home(&self, motor: usize, position: i32);
    fn set_mark(&self, motor: usize, position: i32);

    /// Returns `false` when the chip refuses the mode (motor running).
    fn select_step_mode(&self, motor: usize, mode: StepMode) -> bool;
    /// Raw register access.
    fn set_param(&self, motor: usize, register: u8, value: u32);
    fn param(&self, motor: usize, register: u8) -> u32;
    /// Register access in physical units (steps/s, mA, ...). Returns `false`
    /// when the value is out of range for the register.
    fn set_analog_value(&self, motor: usize, register: u8, value: f32) -> bool;
    fn analog_value(&self, motor: usize, register: u8) -> f32;

    /// Reads the chip status register without clearing it.
    fn read_status(&self, motor: usize) -> u16;
    /// Reads and clears the chip status register.
    fn take_status(&self, motor: usize) -> u16;

    fn arm_line(&self, line: MotorLine, callback: InterruptCallback) -> Result<(), HalError>;
    fn disarm_line(&self, line: MotorLine);
}

pub trait RebootControl: Send + Sync {
    fn restart(&self);
    /// Selects the update partition for the next boot, then restarts.
    fn restart_into_update(&self);
}
