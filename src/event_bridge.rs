//! Interrupt-to-task bridge.
//!
//! Interrupt callbacks only ever OR one bit into a shared [`EventSignal`].
//! A single consumer task swaps the whole set out at once and turns each bit
//! into a local hardware action and/or a SEND notification to the master.
//!
//! Bits are edge-triggered: an interrupt landing while a batch is being
//! handled shows up on the next wake, while bursts before the swap coalesce
//! into one wake. Bits are handled in priority order
//! busy > error > flag > input 0 > input 1 > ... and only the
//! highest-priority input bit of a batch is acted on.

use std::sync::{Arc, Mutex};

use static_assertions::const_assert;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use core::sync::atomic::{AtomicU32, Ordering};

use crate::hal::{HalError, MotorDriver, MotorLine, Peripherals};
use crate::identity::NodeIdentity;
use crate::message::Message;
use crate::opcode;
use crate::transport::FrameSink;

pub const MAX_INPUTS: usize = 16;
const FIRST_INPUT_BIT: u32 = 3;

/// Driver status lines, in handling order.
pub const MOTOR_LINES: [MotorLine; 3] = [MotorLine::Busy, MotorLine::Error, MotorLine::Flag];

const_assert!(FIRST_INPUT_BIT as usize + MAX_INPUTS <= 32);

/// Released limit switch level on the driver chip.
const SWITCH_RELEASED: bool = true;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Busy,
    Error,
    Flag,
    Input(u8),
}

impl EventSource {
    /// Bit of this source in the signal. Inputs from [`MAX_INPUTS`] up have
    /// no bit and map to `0`.
    pub fn bit(self) -> u32 {
        match self {
            EventSource::Busy => 1 << 0,
            EventSource::Error => 1 << 1,
            EventSource::Flag => 1 << 2,
            EventSource::Input(n) if usize::from(n) < MAX_INPUTS => 1 << (FIRST_INPUT_BIT + u32::from(n)),
            EventSource::Input(_) => 0,
        }
    }
}

impl From<MotorLine> for EventSource {
    fn from(line: MotorLine) -> Self {
        match line {
            MotorLine::Busy => EventSource::Busy,
            MotorLine::Error => EventSource::Error,
            MotorLine::Flag => EventSource::Flag,
        }
    }
}

/// Lock-free set of pending event bits plus the wake-up of the consumer.
#[derive(Debug, Default)]
pub struct EventSignal {
    bits: AtomicU32,
    wake: Notify,
}

impl EventSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt-context entry point: sets one bit, never clears.
    ///
    /// The bit update is a single atomic OR. The wake-up goes through tokio's
    /// `Notify`, which takes a short internal lock; that is fine for the host
    /// callbacks used here, but a target build has to wake the consumer with
    /// a primitive that is safe to call from an ISR (a task notification).
    #[inline]
    pub fn raise(&self, source: EventSource) {
        let bit = source.bit();
        if bit == 0 {
            return;
        }
        self.bits.fetch_or(bit, Ordering::AcqRel);
        self.wake.notify_one();
    }

    /// Reads and clears the whole set in one atomic exchange.
    #[inline]
    pub fn take(&self) -> u32 {
        self.bits.swap(0, Ordering::AcqRel)
    }

    pub fn pending(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// Blocks until at least one bit is set, then takes the set.
    pub async fn wait(&self) -> u32 {
        loop {
            let bits = self.take();
            if bits != 0 {
                return bits;
            }
            // notify_one keeps a permit, so a raise between take and here still wakes us
            self.wake.notified().await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("input {0} cannot be monitored")]
    NoSuchInput(u8),
    #[error("no motor driver on this board")]
    NoMotorDriver,
    #[error("motor {0} does not exist")]
    NoSuchMotor(u8),
    #[error(transparent)]
    Hal(#[from] HalError),
}

/// Routing of one monitored input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Association {
    /// Motor whose limit-switch line follows the input.
    pub target: Option<u8>,
    /// Emit an `INPUT_EVENT` to the master on each edge.
    pub notify: bool,
}

pub struct EventBridge {
    signal: Arc<EventSignal>,
    associations: Mutex<[Option<Association>; MAX_INPUTS]>,
    /// Signal bits of the motor lines currently armed.
    armed_lines: Mutex<u32>,
    peripherals: Arc<dyn Peripherals>,
    motors: Option<Arc<dyn MotorDriver>>,
    identity: Arc<NodeIdentity>,
    outbound: Arc<dyn FrameSink>,
}

impl EventBridge {
    pub fn new(
        peripherals: Arc<dyn Peripherals>,
        motors: Option<Arc<dyn MotorDriver>>,
        identity: Arc<NodeIdentity>,
        outbound: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            signal: Arc::new(EventSignal::new()),
            associations: Mutex::new([None; MAX_INPUTS]),
            armed_lines: Mutex::new(0),
            peripherals,
            motors,
            identity,
            outbound,
        }
    }

    pub fn signal(&self) -> &Arc<EventSignal> {
        &self.signal
    }

    pub fn association(&self, input: u8) -> Option<Association> {
        self.lock_associations().get(usize::from(input)).copied().flatten()
    }

    /// Starts monitoring `input`. Does nothing if it is already monitored.
    pub fn attach(&self, input: u8, target: Option<u8>, notify: bool) -> Result<(), BridgeError> {
        if usize::from(input) >= self.peripherals.input_count().min(MAX_INPUTS) {
            return Err(BridgeError::NoSuchInput(input));
        }
        if let Some(motor) = target {
            let motors = self.motors.as_ref().ok_or(BridgeError::NoMotorDriver)?;
            if usize::from(motor) >= motors.motor_count() {
                return Err(BridgeError::NoSuchMotor(motor));
            }
        }

        let mut associations = self.lock_associations();
        let slot = &mut associations[usize::from(input)];
        if slot.is_some() {
            return Ok(());
        }
        let signal = Arc::clone(&self.signal);
        let source = EventSource::Input(input);
        self.peripherals
            .arm_interrupt(usize::from(input), Box::new(move || signal.raise(source)))?;
        *slot = Some(Association { target, notify });
        debug!("input {} attached (target {:?}, notify {})", input, target, notify);
        Ok(())
    }

    /// Stops monitoring `input`, releasing its target first. No-op when unattached.
    pub fn detach(&self, input: u8) {
        let mut associations = self.lock_associations();
        let Some(slot) = associations.get_mut(usize::from(input)) else {
            return;
        };
        let Some(association) = slot.take() else {
            return;
        };
        if let (Some(motor), Some(motors)) = (association.target, self.motors.as_ref()) {
            motors.set_switch_level(usize::from(motor), SWITCH_RELEASED);
        }
        self.peripherals.disarm_interrupt(usize::from(input));
        debug!("input {} detached", input);
    }

    /// Arms one status line of the motor driver. Arming it again does nothing.
    pub fn arm_motor_line(&self, line: MotorLine) -> Result<(), BridgeError> {
        let motors = self.motors.as_ref().ok_or(BridgeError::NoMotorDriver)?;
        let source = EventSource::from(line);
        let mut armed = self.lock_armed_lines();
        if *armed & source.bit() != 0 {
            return Ok(());
        }
        let signal = Arc::clone(&self.signal);
        motors.arm_line(line, Box::new(move || signal.raise(source)))?;
        *armed |= source.bit();
        debug!("{:?} line armed", line);
        Ok(())
    }

    pub fn is_motor_line_armed(&self, line: MotorLine) -> bool {
        *self.lock_armed_lines() & EventSource::from(line).bit() != 0
    }

    /// Disarms every motor line armed through [`EventBridge::arm_motor_line`].
    pub fn disarm_motor_lines(&self) {
        let mut armed = self.lock_armed_lines();
        if let Some(motors) = self.motors.as_ref() {
            for line in MOTOR_LINES {
                if *armed & EventSource::from(line).bit() != 0 {
                    motors.disarm_line(line);
                    debug!("{:?} line disarmed", line);
                }
            }
        }
        *armed = 0;
    }

    /// Spawns the consumer task. It runs until aborted.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let bits = bridge.signal.wait().await;
                bridge.handle(bits);
            }
        })
    }

    /// Acts on one batch of bits taken from the signal.
    pub fn handle(&self, bits: u32) {
        for line in MOTOR_LINES {
            if bits & EventSource::from(line).bit() != 0 {
                self.on_motor_line(line);
            }
        }

        let inputs = bits >> FIRST_INPUT_BIT;
        if inputs != 0 {
            let input = inputs.trailing_zeros() as u8;
            if inputs.count_ones() > 1 {
                debug!("inputs 0b{:b} raised together, handling input {} only", inputs, input);
            }
            self.on_input(input);
        }
    }

    fn on_motor_line(&self, line: MotorLine) {
        let Some(motors) = self.motors.as_ref() else {
            warn!("{:?} event without motor driver", line);
            return;
        };
        let code: u8 = match line {
            MotorLine::Busy => 0,
            MotorLine::Error => 1,
            MotorLine::Flag => 2,
        };
        for motor in 0..motors.motor_count() {
            let payload = match line {
                MotorLine::Busy => u32::from(motors.is_busy(motor)),
                MotorLine::Error | MotorLine::Flag => u32::from(motors.take_status(motor)),
            };
            let param = (u16::from(motor as u8) << 8) | u16::from(code);
            self.notify_master(opcode::STEPPER_EVENT, param, payload);
        }
    }

    fn on_input(&self, input: u8) {
        // the input may have been detached since the interrupt fired
        let Some(association) = self.association(input) else {
            return;
        };
        let level = self.peripherals.digital_read(usize::from(input));
        if let (Some(motor), Some(motors)) = (association.target, self.motors.as_ref()) {
            // switch line is active low: an active (high) input pulls it down
            motors.set_switch_level(usize::from(motor), !level);
        }
        if association.notify {
            self.notify_master(opcode::INPUT_EVENT, u16::from(input), u32::from(level));
        }
    }

    fn notify_master(&self, command: u16, param: u16, payload: u32) {
        let master = self.identity.master_id();
        let message = Message::with_payload(command, master, param, payload);
        if let Err(e) = self.outbound.send(&message, master) {
            error!("cannot notify master {}: {}", master, e);
        }
    }

    fn lock_armed_lines(&self) -> std::sync::MutexGuard<'_, u32> {
        self.armed_lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_associations(&self) -> std::sync::MutexGuard<'_, [Option<Association>; MAX_INPUTS]> {
        self.associations.lock().unwrap_or_else(|e| e.into_inner())
    }
}
