//! Simulated board hardware.
//!
//! Each double records what the core asked of it and lets the caller play
//! the role of the outside world (toggle an input, raise a motor line).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hal::{
    Direction, HalError, InterruptCallback, LedColor, Motion, MotorDriver, MotorLine, Peripherals,
    RebootControl, StepMode, StopMode,
};

type SharedCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LedState {
    Off,
    On(LedColor),
    Blink { color: LedColor, period_ms: u32 },
}

pub struct SimPeripherals {
    led: Mutex<LedState>,
    temperature_bits: AtomicU32,
    temperature_inits: AtomicUsize,
    inputs: Mutex<Vec<bool>>,
    outputs: Mutex<Vec<bool>>,
    interrupts: Mutex<Vec<Option<SharedCallback>>>,
}

impl SimPeripherals {
    /// Inputs start high (released, pulled up).
    pub fn new(input_count: usize, output_count: usize) -> Self {
        Self {
            led: Mutex::new(LedState::Off),
            temperature_bits: AtomicU32::new(25.0f32.to_bits()),
            temperature_inits: AtomicUsize::new(0),
            inputs: Mutex::new(vec![true; input_count]),
            outputs: Mutex::new(vec![false; output_count]),
            interrupts: Mutex::new((0..input_count).map(|_| None).collect()),
        }
    }

    pub fn led(&self) -> LedState {
        *self.led.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_temperature(&self, celsius: f32) {
        self.temperature_bits.store(celsius.to_bits(), Ordering::Relaxed);
    }

    pub fn temperature_inits(&self) -> usize {
        self.temperature_inits.load(Ordering::Relaxed)
    }

    pub fn output(&self, output: usize) -> Option<bool> {
        self.outputs.lock().unwrap_or_else(|e| e.into_inner()).get(output).copied()
    }

    pub fn is_armed(&self, input: usize) -> bool {
        self.interrupts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(input)
            .map_or(false, Option::is_some)
    }

    /// Changes the electrical level of `input` and fires its interrupt if armed.
    pub fn set_input(&self, input: usize, level: bool) {
        {
            let mut inputs = self.inputs.lock().unwrap_or_else(|e| e.into_inner());
            match inputs.get_mut(input) {
                Some(slot) => *slot = level,
                None => return,
            }
        }
        let callback = self
            .interrupts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(input)
            .cloned()
            .flatten();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Peripherals for SimPeripherals {
    fn led_on(&self, color: LedColor) {
        *self.led.lock().unwrap_or_else(|e| e.into_inner()) = LedState::On(color);
    }

    fn led_off(&self) {
        *self.led.lock().unwrap_or_else(|e| e.into_inner()) = LedState::Off;
    }

    fn led_blink(&self, color: LedColor, period_ms: u32) {
        *self.led.lock().unwrap_or_else(|e| e.into_inner()) = LedState::Blink { color, period_ms };
    }

    fn temperature_init(&self) -> Result<(), HalError> {
        self.temperature_inits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read_temperature(&self) -> f32 {
        f32::from_bits(self.temperature_bits.load(Ordering::Relaxed))
    }

    fn input_count(&self) -> usize {
        self.inputs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn output_count(&self) -> usize {
        self.outputs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn digital_read(&self, input: usize) -> bool {
        self.inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(input)
            .copied()
            .unwrap_or(false)
    }

    fn digital_write(&self, output: usize, level: bool) {
        if let Some(slot) = self.outputs.lock().unwrap_or_else(|e| e.into_inner()).get_mut(output) {
            *slot = level;
        }
    }

    fn arm_interrupt(&self, input: usize, callback: InterruptCallback) -> Result<(), HalError> {
        let mut interrupts = self.interrupts.lock().unwrap_or_else(|e| e.into_inner());
        let slot = interrupts.get_mut(input).ok_or(HalError::NoSuchChannel(input))?;
        if slot.is_some() {
            return Err(HalError::AlreadyArmed(input));
        }
        *slot = Some(Arc::from(callback));
        debug!("interrupt armed on input {}", input);
        Ok(())
    }

    fn disarm_interrupt(&self, input: usize) {
        if let Some(slot) = self.interrupts.lock().unwrap_or_else(|e| e.into_inner()).get_mut(input) {
            *slot = None;
        }
    }
}

#[derive(Debug, Clone)]
struct MotorState {
    position: i32,
    home: i32,
    mark: i32,
    step_mode: StepMode,
    registers: HashMap<u8, u32>,
    analog: HashMap<u8, f32>,
}

impl Default for MotorState {
    fn default() -> Self {
        Self {
            position: 0,
            home: 0,
            mark: 0,
            step_mode: StepMode::Full,
            registers: HashMap::new(),
            analog: HashMap::new(),
        }
    }
}

pub struct SimMotors {
    switch_levels: Mutex<Vec<bool>>,
    busy: Vec<AtomicBool>,
    status: Vec<AtomicU32>,
    state: Mutex<Vec<MotorState>>,
    motions: Mutex<Vec<(usize, Motion)>>,
    stops: Mutex<Vec<(usize, StopMode)>>,
    lines: Mutex<[Option<SharedCallback>; 3]>,
}

impl SimMotors {
    pub fn new(motor_count: usize) -> Self {
        Self {
            switch_levels: Mutex::new(vec![true; motor_count]),
            busy: (0..motor_count).map(|_| AtomicBool::new(false)).collect(),
            status: (0..motor_count).map(|_| AtomicU32::new(0)).collect(),
            state: Mutex::new(vec![MotorState::default(); motor_count]),
            motions: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            lines: Mutex::new([None, None, None]),
        }
    }

    /// Every motion command received, in order.
    pub fn motions(&self) -> Vec<(usize, Motion)> {
        self.motions.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn step_mode(&self, motor: usize) -> Option<StepMode> {
        self.lock_state().get(motor).map(|m| m.step_mode)
    }

    pub fn is_line_armed(&self, line: MotorLine) -> bool {
        self.lines.lock().unwrap_or_else(|e| e.into_inner())[line_index(line)].is_some()
    }

    pub fn switch_level(&self, motor: usize) -> Option<bool> {
        self.switch_levels.lock().unwrap_or_else(|e| e.into_inner()).get(motor).copied()
    }

    pub fn stops(&self) -> Vec<(usize, StopMode)> {
        self.stops.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_busy(&self, motor: usize, busy: bool) {
        if let Some(flag) = self.busy.get(motor) {
            flag.store(busy, Ordering::Relaxed);
        }
    }

    pub fn set_status(&self, motor: usize, status: u16) {
        if let Some(word) = self.status.get(motor) {
            word.store(u32::from(status), Ordering::Relaxed);
        }
    }

    /// Pulses a status line, firing its interrupt if armed.
    pub fn pulse(&self, line: MotorLine) {
        let callback = self.lines.lock().unwrap_or_else(|e| e.into_inner())[line_index(line)].clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, Vec<MotorState>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_motor<T: Default>(&self, motor: usize, f: impl FnOnce(&mut MotorState) -> T) -> T {
        self.lock_state().get_mut(motor).map(f).unwrap_or_default()
    }
}

fn line_index(line: MotorLine) -> usize {
    match line {
        MotorLine::Busy => 0,
        MotorLine::Error => 1,
        MotorLine::Flag => 2,
    }
}

impl MotorDriver for SimMotors {
    fn motor_count(&self) -> usize {
        self.busy.len()
    }

    fn set_switch_level(&self, motor: usize, level: bool) {
        if let Some(slot) = self.switch_levels.lock().unwrap_or_else(|e| e.into_inner()).get_mut(motor) {
            *slot = level;
        }
    }

    fn execute(&self, motor: usize, motion: Motion) {
        debug!("motor {}: {:?}", motor, motion);
        self.motions.lock().unwrap_or_else(|e| e.into_inner()).push((motor, motion));
        let running = matches!(motion, Motion::Run { .. } | Motion::GoUntil { .. });
        self.with_motor(motor, |m| {
            m.position = match motion {
                Motion::Move { direction: Direction::Forward, steps } => m.position.wrapping_add(steps as i32),
                Motion::Move { direction: Direction::Reverse, steps } => m.position.wrapping_sub(steps as i32),
                Motion::GoTo { position } | Motion::GoToDir { position, .. } => position,
                Motion::GoHome => m.home,
                Motion::GoMark => m.mark,
                Motion::ResetPosition => 0,
                Motion::Run { .. } | Motion::GoUntil { .. } | Motion::ReleaseSwitch { .. } => m.position,
            };
        });
        if running {
            self.set_busy(motor, true);
        }
    }

    fn stop(&self, motor: usize, mode: StopMode) {
        self.stops.lock().unwrap_or_else(|e| e.into_inner()).push((motor, mode));
        self.set_busy(motor, false);
    }

    fn is_busy(&self, motor: usize) -> bool {
        self.busy.get(motor).map_or(false, |b| b.load(Ordering::Relaxed))
    }

    fn position(&self, motor: usize) -> i32 {
        self.with_motor(motor, |m| m.position)
    }

    fn mark(&self, motor: usize) -> i32 {
        self.with_motor(motor, |m| m.mark)
    }

    fn set_home(&self, motor: usize, position: i32) {
        self.with_motor(motor, |m| m.home = position);
    }

    fn set_mark(&self, motor: usize, position: i32) {
        self.with_motor(motor, |m| m.mark = position);
    }

    fn select_step_mode(&self, motor: usize, mode: StepMode) -> bool {
        // the chip only accepts a new resolution while stopped
        if self.is_busy(motor) {
            return false;
        }
        self.with_motor(motor, |m| {
            m.step_mode = mode;
            true
        })
    }

    fn set_param(&self, motor: usize, register: u8, value: u32) {
        self.with_motor(motor, |m| {
            m.registers.insert(register, value);
        });
    }

    fn param(&self, motor: usize, register: u8) -> u32 {
        self.with_motor(motor, |m| m.registers.get(&register).copied().unwrap_or(0))
    }

    fn set_analog_value(&self, motor: usize, register: u8, value: f32) -> bool {
        if !value.is_finite() || value < 0.0 {
            return false;
        }
        self.with_motor(motor, |m| {
            m.analog.insert(register, value);
            true
        })
    }

    fn analog_value(&self, motor: usize, register: u8) -> f32 {
        self.with_motor(motor, |m| m.analog.get(&register).copied().unwrap_or(0.0))
    }

    fn read_status(&self, motor: usize) -> u16 {
        self.status.get(motor).map_or(0, |s| s.load(Ordering::Relaxed) as u16)
    }

    fn take_status(&self, motor: usize) -> u16 {
        self.status
            .get(motor)
            .map_or(0, |s| s.swap(0, Ordering::Relaxed) as u16)
    }

    fn arm_line(&self, line: MotorLine, callback: InterruptCallback) -> Result<(), HalError> {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let index = line_index(line);
        if lines[index].is_some() {
            return Err(HalError::AlreadyArmed(index));
        }
        lines[index] = Some(Arc::from(callback));
        Ok(())
    }

    fn disarm_line(&self, line: MotorLine) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner())[line_index(line)] = None;
    }
}

#[derive(Debug, Default)]
pub struct SimReboot {
    restarts: AtomicUsize,
    updates: AtomicUsize,
}

impl SimReboot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }
}

impl RebootControl for SimReboot {
    fn restart(&self) {
        debug!("simulated restart");
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    fn restart_into_update(&self) {
        debug!("simulated restart into update partition");
        self.updates.fetch_add(1, Ordering::Relaxed);
    }
}
