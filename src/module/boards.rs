//! Board variants. The variant is picked once at startup from the
//! configured [`BoardType`]; all of them expose the same [`Board`] surface.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::{BoardType, Hardware, Module, ModuleError};
use crate::event_bridge::{EventBridge, MAX_INPUTS};
use crate::hal::{Direction, Motion, MotorDriver, MotorLine, StepMode, StopMode, SwitchAction};
use crate::message::Message;
use crate::opcode;
use crate::table::{CommandTable, TableError};

pub trait Board: Send + Sync {
    fn board_type(&self) -> BoardType;

    /// Checks the detected hardware against the board profile and arms what
    /// the board needs. A count mismatch is logged, never fatal.
    fn init(&self, hardware: &Hardware, _bridge: &EventBridge) -> Result<(), ModuleError> {
        check_profile(self.board_type(), hardware);
        Ok(())
    }

    /// Releases every monitored input and motor line, then switches the LED off.
    fn deinit(&self, hardware: &Hardware, bridge: &EventBridge) {
        for input in 0..MAX_INPUTS as u8 {
            bridge.detach(input);
        }
        bridge.disarm_motor_lines();
        hardware.peripherals.led_off();
    }

    /// Registers the handlers specific to this board, keyed to the module id.
    fn register_handlers(&self, module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError>;
}

pub struct CoreBoard(BoardType);
pub struct DiscreteBoard(BoardType);
pub struct MixedBoard(BoardType);
pub struct RelayBoard(BoardType);
pub struct StepperBoard(BoardType);

pub enum BoardKind {
    Core(CoreBoard),
    Discrete(DiscreteBoard),
    Mixed(MixedBoard),
    Relay(RelayBoard),
    Stepper(StepperBoard),
}

impl BoardKind {
    pub fn for_type(board_type: BoardType) -> Self {
        match board_type {
            BoardType::Core | BoardType::CoreLite => BoardKind::Core(CoreBoard(board_type)),
            BoardType::Discrete | BoardType::DiscreteVe => {
                BoardKind::Discrete(DiscreteBoard(board_type))
            }
            BoardType::Mixed => BoardKind::Mixed(MixedBoard(board_type)),
            BoardType::RelayLp | BoardType::RelayHp => BoardKind::Relay(RelayBoard(board_type)),
            BoardType::Stepper | BoardType::StepperVe => BoardKind::Stepper(StepperBoard(board_type)),
        }
    }

    fn inner(&self) -> &dyn Board {
        match self {
            BoardKind::Core(board) => board,
            BoardKind::Discrete(board) => board,
            BoardKind::Mixed(board) => board,
            BoardKind::Relay(board) => board,
            BoardKind::Stepper(board) => board,
        }
    }
}

impl Board for BoardKind {
    fn board_type(&self) -> BoardType {
        self.inner().board_type()
    }

    fn init(&self, hardware: &Hardware, bridge: &EventBridge) -> Result<(), ModuleError> {
        self.inner().init(hardware, bridge)
    }

    fn deinit(&self, hardware: &Hardware, bridge: &EventBridge) {
        self.inner().deinit(hardware, bridge)
    }

    fn register_handlers(&self, module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
        self.inner().register_handlers(module, table)
    }
}

impl Board for CoreBoard {
    fn board_type(&self) -> BoardType {
        self.0
    }

    fn register_handlers(&self, module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
        register_digital_read(module, table)?;
        register_digital_write(module, table)
    }
}

impl Board for DiscreteBoard {
    fn board_type(&self) -> BoardType {
        self.0
    }

    fn register_handlers(&self, module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
        register_digital_read(module, table)?;
        register_digital_write(module, table)?;
        register_input_notify(module, table)
    }
}

impl Board for MixedBoard {
    fn board_type(&self) -> BoardType {
        self.0
    }

    fn register_handlers(&self, module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
        register_digital_read(module, table)?;
        register_digital_write(module, table)?;
        register_input_notify(module, table)
    }
}

impl Board for RelayBoard {
    fn board_type(&self) -> BoardType {
        self.0
    }

    fn register_handlers(&self, module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
        register_digital_write(module, table)
    }
}

impl Board for StepperBoard {
    fn board_type(&self) -> BoardType {
        self.0
    }

    /// Driver lines stay unarmed until the master asks for them.
    fn init(&self, hardware: &Hardware, _bridge: &EventBridge) -> Result<(), ModuleError> {
        check_profile(self.0, hardware);
        if hardware.motors.is_none() {
            error!("{}: no motor driver, motor commands disabled", self.0);
        }
        Ok(())
    }

    fn register_handlers(&self, module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
        let id = module.identity().id();
        register_digital_read(module, table)?;

        // the requester of an attach becomes the target of the events
        let m = Arc::clone(module);
        table.register(opcode::STEPPER_ATTACH_LIMIT_SWITCH, id, move |msg: &Message, source| {
            m.set_master(source);
            let (input, motor, notify) = (msg.param_lo(), msg.param_hi(), msg.payload() & 1 != 0);
            if let Err(e) = m.bridge().attach(input, Some(motor), notify) {
                warn!("cannot attach limit switch {} to motor {}: {}", input, motor, e);
            }
            0
        })?;

        let m = Arc::clone(module);
        table.register(opcode::STEPPER_DETACH_LIMIT_SWITCH, id, move |msg: &Message, source| {
            m.set_master(source);
            m.bridge().detach(msg.param_lo());
            0
        })?;

        for (command, line) in [
            (opcode::STEPPER_ATTACH_BUSY_INTERRUPT, MotorLine::Busy),
            (opcode::STEPPER_ATTACH_ERROR_HANDLER, MotorLine::Error),
            (opcode::STEPPER_ATTACH_FLAG_INTERRUPT, MotorLine::Flag),
        ] {
            let m = Arc::clone(module);
            table.register(command, id, move |_, source| {
                m.set_master(source);
                if let Err(e) = m.bridge().arm_motor_line(line) {
                    warn!("cannot arm {:?} line: {}", line, e);
                }
                0
            })?;
        }

        register_motor(module, table, opcode::STEPPER_STOP, |motors, motor, msg| {
            motors.stop(motor, StopMode::from_u8(msg.param_hi()));
            0
        })?;
        register_motor(module, table, opcode::STEPPER_IS_BUSY, |motors, motor, _| {
            u32::from(motors.is_busy(motor))
        })?;

        register_motion(module, table)?;
        register_registers(module, table)?;
        register_status(module, table)
    }
}

/// Motion commands. param byte 1 carries the direction; GO_UNTIL and
/// RELEASE_SWITCH split it into action (nibble 3) and direction (nibble 2).
fn register_motion(module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
    let direction = |msg: &Message| Direction::from_u8(msg.param_hi());

    register_motor(module, table, opcode::STEPPER_MOVE, move |motors, motor, msg| {
        motors.execute(motor, Motion::Move { direction: direction(msg), steps: msg.payload() });
        0
    })?;
    register_motor(module, table, opcode::STEPPER_RUN, move |motors, motor, msg| {
        motors.execute(motor, Motion::Run { direction: direction(msg), speed: msg.payload() });
        0
    })?;
    register_motor(module, table, opcode::STEPPER_GO_TO, |motors, motor, msg| {
        motors.execute(motor, Motion::GoTo { position: msg.payload() as i32 });
        0
    })?;
    register_motor(module, table, opcode::STEPPER_GO_TO_DIR, move |motors, motor, msg| {
        let position = msg.payload() as i32;
        motors.execute(motor, Motion::GoToDir { direction: direction(msg), position });
        0
    })?;
    register_motor(module, table, opcode::STEPPER_GO_UNTIL, |motors, motor, msg| {
        if let Some(action) = switch_action(msg) {
            let direction = Direction::from_u8(msg.param_nibble(2));
            motors.execute(motor, Motion::GoUntil { action, direction, speed: msg.payload() });
        }
        0
    })?;
    register_motor(module, table, opcode::STEPPER_RELEASE_SWITCH, |motors, motor, msg| {
        if let Some(action) = switch_action(msg) {
            let direction = Direction::from_u8(msg.param_nibble(2));
            motors.execute(motor, Motion::ReleaseSwitch { action, direction });
        }
        0
    })?;

    for (command, motion) in [
        (opcode::STEPPER_GO_HOME, Motion::GoHome),
        (opcode::STEPPER_GO_MARK, Motion::GoMark),
        (opcode::STEPPER_RESET_POSITION, Motion::ResetPosition),
    ] {
        register_motor(module, table, command, move |motors, motor, _| {
            motors.execute(motor, motion);
            0
        })?;
    }

    register_motor(module, table, opcode::STEPPER_SET_HOME, |motors, motor, msg| {
        motors.set_home(motor, msg.payload() as i32);
        0
    })?;
    register_motor(module, table, opcode::STEPPER_SET_MARK, |motors, motor, msg| {
        motors.set_mark(motor, msg.payload() as i32);
        0
    })?;
    register_motor(module, table, opcode::STEPPER_GET_MARK, |motors, motor, _| {
        motors.mark(motor) as u32
    })?;
    register_motor(module, table, opcode::STEPPER_GET_POSITION, |motors, motor, _| {
        motors.position(motor) as u32
    })
}

/// Register access. param byte 1 is the register (or step mode). Analog
/// values travel as the bit pattern of an `f32`, like the temperature.
fn register_registers(module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
    register_motor(module, table, opcode::STEPPER_SELECT_STEP_MODE, |motors, motor, msg| {
        match StepMode::from_u8(msg.param_hi()) {
            Some(mode) => u32::from(motors.select_step_mode(motor, mode)),
            None => {
                warn!("invalid step mode {}", msg.param_hi());
                0
            }
        }
    })?;
    register_motor(module, table, opcode::STEPPER_SET_PARAM, |motors, motor, msg| {
        motors.set_param(motor, msg.param_hi(), msg.payload());
        0
    })?;
    register_motor(module, table, opcode::STEPPER_GET_PARAM, |motors, motor, msg| {
        motors.param(motor, msg.param_hi())
    })?;
    register_motor(module, table, opcode::STEPPER_SET_ANALOG_VALUE, |motors, motor, msg| {
        u32::from(motors.set_analog_value(motor, msg.param_hi(), msg.payload_f32()))
    })?;
    register_motor(module, table, opcode::STEPPER_GET_ANALOG_VALUE, |motors, motor, msg| {
        motors.analog_value(motor, msg.param_hi()).to_bits()
    })
}

fn register_status(module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
    let id = module.identity().id();

    register_motor(module, table, opcode::STEPPER_READ_STATUS, |motors, motor, _| {
        u32::from(motors.read_status(motor))
    })?;
    register_motor(module, table, opcode::STEPPER_GET_STATUS, |motors, motor, _| {
        u32::from(motors.take_status(motor))
    })?;

    // snapshot of every motor, taken in one go and read back per motor
    let motor_count = module.hardware().motors.as_ref().map_or(0, |m| m.motor_count());
    let fetched: Arc<[AtomicU16]> = (0..motor_count).map(|_| AtomicU16::new(0)).collect();

    let m = Arc::clone(module);
    let snapshot = Arc::clone(&fetched);
    table.register(opcode::STEPPER_FETCH_ALL_STATUS, id, move |_, _| {
        if let Some(motors) = m.hardware().motors.as_deref() {
            for (motor, slot) in snapshot.iter().enumerate() {
                slot.store(motors.take_status(motor), Ordering::Relaxed);
            }
            debug!("fetched status of {} motors", snapshot.len());
        }
        0
    })?;

    table.register(opcode::STEPPER_GET_FETCHED_STATUS, id, move |msg: &Message, _| {
        match fetched.get(usize::from(msg.param_lo())) {
            Some(slot) => u32::from(slot.load(Ordering::Relaxed)),
            None => {
                warn!("no fetched status for motor {}", msg.param_lo());
                0
            }
        }
    })
}

fn switch_action(msg: &Message) -> Option<SwitchAction> {
    let action = SwitchAction::from_u8(msg.param_nibble(3));
    if action.is_none() {
        warn!("invalid switch action {}", msg.param_nibble(3));
    }
    action
}

/// Registers a handler that runs only for an existing motor, picked by
/// param byte 0. Anything else is logged and answers `0`.
fn register_motor<F>(module: &Arc<Module>, table: &CommandTable, command: u16, handler: F) -> Result<(), TableError>
where
    F: Fn(&dyn MotorDriver, usize, &Message) -> u32 + Send + Sync + 'static,
{
    let m = Arc::clone(module);
    table.register(command, module.identity().id(), move |msg: &Message, _| {
        let motor = usize::from(msg.param_lo());
        match m.hardware().motors.as_deref() {
            Some(motors) if motor < motors.motor_count() => handler(motors, motor, msg),
            _ => {
                let name = opcode::name(command).unwrap_or("stepper command");
                warn!("{} for unknown motor {}", name, motor);
                0
            }
        }
    })
}

fn check_profile(board_type: BoardType, hardware: &Hardware) {
    let expected = board_type.profile();
    let inputs = hardware.peripherals.input_count();
    let outputs = hardware.peripherals.output_count();
    let motors = hardware.motors.as_ref().map_or(0, |m| m.motor_count());
    if (inputs, outputs, motors) != (expected.inputs, expected.outputs, expected.motors) {
        error!(
            "{}: detected {} inputs / {} outputs / {} motors, expected {} / {} / {}",
            board_type, inputs, outputs, motors, expected.inputs, expected.outputs, expected.motors
        );
    }
}

fn register_digital_read(module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
    let m = Arc::clone(module);
    table.register(opcode::DIGITAL_READ, module.identity().id(), move |msg: &Message, _| {
        let input = usize::from(msg.param_lo());
        let peripherals = &m.hardware().peripherals;
        if input >= peripherals.input_count() {
            warn!("read of unknown input {}", input);
            return 0;
        }
        u32::from(peripherals.digital_read(input))
    })
}

fn register_digital_write(module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
    let m = Arc::clone(module);
    table.register(opcode::DIGITAL_WRITE, module.identity().id(), move |msg: &Message, _| {
        let output = usize::from(msg.param_lo());
        let peripherals = &m.hardware().peripherals;
        if output >= peripherals.output_count() {
            warn!("write of unknown output {}", output);
            return 0;
        }
        peripherals.digital_write(output, msg.payload() != 0);
        0
    })
}

fn register_input_notify(module: &Arc<Module>, table: &CommandTable) -> Result<(), TableError> {
    let id = module.identity().id();

    let m = Arc::clone(module);
    table.register(opcode::ATTACH_INPUT_NOTIFY, id, move |msg: &Message, _| {
        if let Err(e) = m.bridge().attach(msg.param_lo(), None, true) {
            warn!("cannot monitor input {}: {}", msg.param_lo(), e);
        }
        0
    })?;

    let m = Arc::clone(module);
    table.register(opcode::DETACH_INPUT_NOTIFY, id, move |msg: &Message, _| {
        m.bridge().detach(msg.param_lo());
        0
    })
}
