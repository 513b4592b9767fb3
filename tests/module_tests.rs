mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, Rig};
use ionode::hal::{Direction, LedColor, Motion, MotorLine, StepMode, StopMode, SwitchAction};
use ionode::identity::{NodeIdentity, UNDEFINED_ID};
use ionode::loopback::{LoopbackBus, SentFrame};
use ionode::message::Message;
use ionode::module::{BoardType, Module};
use ionode::opcode;
use ionode::sim::LedState;
use ionode::store::StoreError;
use ionode::table::CommandTable;

const ID: u8 = 4;
const MASTER: u8 = 1;

struct Bench {
    rig: Rig,
    bus: Arc<LoopbackBus>,
    table: CommandTable,
    module: Arc<Module>,
}

impl Bench {
    fn new(board_type: BoardType) -> Self {
        Self::with_delay(board_type, Duration::from_millis(100))
    }

    fn with_delay(board_type: BoardType, delay: Duration) -> Self {
        let rig = Rig::for_board(board_type);
        let bus = LoopbackBus::new();
        let port = bus.attach(ID);
        port.init().unwrap();
        let module = Arc::new(
            Module::new(
                board_type,
                rig.hardware.clone(),
                Arc::new(NodeIdentity::new(ID, MASTER)),
                Arc::new(port),
            )
            .with_restart_delay(delay),
        );
        let table = CommandTable::new();
        module.attach(&table).unwrap();
        Self { rig, bus, table, module }
    }

    fn run(&self, message: Message) -> u32 {
        self.table.dispatch(&message, MASTER)
    }
}

#[test]
fn test_ping_returns_sentinel() {
    let bench = Bench::new(BoardType::Core);
    assert_eq!(bench.run(Message::new(opcode::PING, ID)), opcode::PING_SENTINEL);
}

#[test]
fn test_get_type_reports_board() {
    for board_type in BoardType::ALL {
        let bench = Bench::new(board_type);
        assert_eq!(bench.run(Message::new(opcode::GET_TYPE, ID)), board_type as u32);
        assert!(bench.bus.sent().is_empty());
    }
}

#[test]
fn test_get_type_all_announces_to_requester() {
    let bench = Bench::new(BoardType::Stepper);
    let result = bench.table.dispatch(&Message::new(opcode::GET_TYPE_ALL, ID), 7);

    assert_eq!(result, BoardType::Stepper as u32);
    assert_eq!(
        bench.bus.sent(),
        vec![SentFrame {
            sender: ID,
            dest: 7,
            message: Message::with_payload(opcode::MODULE_ANNOUNCE, 7, u16::from(ID), BoardType::Stepper as u32),
        }]
    );
}

#[test]
fn test_led_actions() {
    let bench = Bench::new(BoardType::Core);
    let led = |color: LedColor, action: u8, period| {
        Message::with_payload(opcode::LED, ID, u16::from_le_bytes([color as u8, action]), period)
    };

    bench.run(led(LedColor::Blue, 0, 0));
    assert_eq!(bench.rig.peripherals.led(), LedState::On(LedColor::Blue));

    bench.run(led(LedColor::Red, 2, 300));
    assert_eq!(
        bench.rig.peripherals.led(),
        LedState::Blink { color: LedColor::Red, period_ms: 300 }
    );

    // unknown action byte leaves the LED alone
    bench.run(led(LedColor::Red, 9, 0));
    assert!(matches!(bench.rig.peripherals.led(), LedState::Blink { .. }));

    bench.run(led(LedColor::None, 1, 0));
    assert_eq!(bench.rig.peripherals.led(), LedState::Off);
}

#[test]
fn test_temperature_is_bit_exact_and_initializes_once() {
    let bench = Bench::new(BoardType::Core);
    bench.rig.peripherals.set_temperature(23.5);
    assert_eq!(bench.rig.peripherals.temperature_inits(), 0);

    let first = bench.run(Message::new(opcode::INTERNAL_TEMPERATURE, ID));
    let second = bench.run(Message::new(opcode::INTERNAL_TEMPERATURE, ID));

    assert_eq!(f32::from_bits(first), 23.5);
    assert_eq!(first, second);
    assert_eq!(bench.rig.peripherals.temperature_inits(), 1);

    let mut reply = Message::new(opcode::INTERNAL_TEMPERATURE, MASTER);
    reply.set_payload(first);
    assert_eq!(reply.payload_f32(), 23.5);
}

#[test]
fn test_hardware_id_round_trip() {
    let bench = Bench::new(BoardType::Core);
    assert_eq!(bench.module.get_hardware_id(), UNDEFINED_ID);

    bench.module.set_hardware_id(42).unwrap();
    assert_eq!(bench.module.get_hardware_id(), 42);
    assert_eq!(bench.module.identity().id(), 42);

    bench.rig.store.erase();
    assert_eq!(bench.module.get_hardware_id(), UNDEFINED_ID);
}

#[test]
fn test_failed_write_keeps_new_id_in_memory() {
    let bench = Bench::new(BoardType::Core);
    bench.module.set_hardware_id(12).unwrap();
    bench.rig.store.set_fail_writes(true);

    assert!(matches!(bench.module.set_hardware_id(13), Err(StoreError::Write { .. })));
    assert_eq!(bench.module.identity().id(), 13);
    assert_eq!(bench.module.get_hardware_id(), 12);
}

#[test]
fn test_failed_read_yields_undefined_id() {
    let bench = Bench::new(BoardType::Core);
    bench.module.set_hardware_id(12).unwrap();
    bench.rig.store.set_fail_reads(true);
    assert_eq!(bench.module.get_hardware_id(), UNDEFINED_ID);
}

#[tokio::test]
async fn test_restart_waits_for_delay() {
    let bench = Bench::with_delay(BoardType::Core, Duration::from_millis(100));
    assert_eq!(bench.run(Message::new(opcode::RESTART, ID)), 0);
    assert_eq!(bench.rig.reboot.restarts(), 0);
    assert!(eventually(|| bench.rig.reboot.restarts() == 1).await);
    assert_eq!(bench.rig.reboot.updates(), 0);
}

#[tokio::test]
async fn test_update_mode_boots_update_partition() {
    let bench = Bench::with_delay(BoardType::Core, Duration::from_millis(10));
    bench.run(Message::new(opcode::UPDATE_MODE, ID));
    assert!(eventually(|| bench.rig.reboot.updates() == 1).await);
    assert_eq!(bench.rig.reboot.restarts(), 0);
}

#[test]
fn test_restart_outside_runtime_is_immediate() {
    let bench = Bench::with_delay(BoardType::Core, Duration::from_secs(60));
    bench.run(Message::new(opcode::RESTART, ID));
    assert_eq!(bench.rig.reboot.restarts(), 1);
}

#[test]
fn test_set_master_takes_payload() {
    let bench = Bench::new(BoardType::Core);
    bench.run(Message::with_payload(opcode::SET_MASTER, ID, 0, 3));
    assert_eq!(bench.module.identity().master_id(), 3);
}

#[test]
fn test_digital_io_handlers() {
    let bench = Bench::new(BoardType::Discrete);
    bench.run(Message::with_payload(opcode::DIGITAL_WRITE, ID, 2, 1));
    assert_eq!(bench.rig.peripherals.output(2), Some(true));

    bench.rig.peripherals.set_input(3, false);
    assert_eq!(bench.run(Message::with_param(opcode::DIGITAL_READ, ID, 3)), 0);
    bench.rig.peripherals.set_input(3, true);
    assert_eq!(bench.run(Message::with_param(opcode::DIGITAL_READ, ID, 3)), 1);

    // out of range channels are ignored
    assert_eq!(bench.run(Message::with_param(opcode::DIGITAL_READ, ID, 40)), 0);
    bench.run(Message::with_payload(opcode::DIGITAL_WRITE, ID, 40, 1));
}

#[test]
fn test_boards_register_their_own_handlers() {
    let relay = Bench::new(BoardType::RelayHp);
    assert!(relay.table.contains(opcode::DIGITAL_WRITE, ID));
    assert!(!relay.table.contains(opcode::DIGITAL_READ, ID));
    assert!(!relay.table.contains(opcode::ATTACH_INPUT_NOTIFY, ID));

    let core = Bench::new(BoardType::CoreLite);
    assert!(core.table.contains(opcode::DIGITAL_READ, ID));
    assert!(!core.table.contains(opcode::ATTACH_INPUT_NOTIFY, ID));

    let mixed = Bench::new(BoardType::Mixed);
    assert!(mixed.table.contains(opcode::ATTACH_INPUT_NOTIFY, ID));
    assert!(!mixed.table.contains(opcode::STEPPER_STOP, ID));

    let stepper = Bench::new(BoardType::StepperVe);
    for command in [
        opcode::STEPPER_ATTACH_LIMIT_SWITCH,
        opcode::STEPPER_DETACH_LIMIT_SWITCH,
        opcode::STEPPER_STOP,
        opcode::STEPPER_IS_BUSY,
    ] {
        assert!(stepper.table.contains(command, ID));
    }

    for bench in [&relay, &core, &mixed, &stepper] {
        for (_, address) in bench.table.list() {
            assert_eq!(address, ID);
        }
    }
}

#[test]
fn test_stepper_stop_and_busy() {
    let bench = Bench::new(BoardType::Stepper);
    bench.rig.motors().set_busy(1, true);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_IS_BUSY, ID, 1)), 1);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_IS_BUSY, ID, 0)), 0);

    bench.run(Message::with_param(opcode::STEPPER_STOP, ID, 0x0101));
    assert_eq!(bench.rig.motors().stops(), vec![(1, StopMode::HardStop)]);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_IS_BUSY, ID, 1)), 0);

    // unknown motor
    bench.run(Message::with_param(opcode::STEPPER_STOP, ID, 0x0005));
    assert_eq!(bench.rig.motors().stops().len(), 1);
}

#[test]
fn test_limit_switch_attach_via_command() {
    let bench = Bench::new(BoardType::Stepper);
    // input 2 drives motor 1, notify bit set
    bench.run(Message::with_payload(opcode::STEPPER_ATTACH_LIMIT_SWITCH, ID, 0x0102, 1));

    let association = bench.module.bridge().association(2).unwrap();
    assert_eq!(association.target, Some(1));
    assert!(association.notify);
    assert!(bench.rig.peripherals.is_armed(2));

    bench.run(Message::with_param(opcode::STEPPER_DETACH_LIMIT_SWITCH, ID, 2));
    assert!(bench.module.bridge().association(2).is_none());
    assert!(!bench.rig.peripherals.is_armed(2));
}

#[test]
fn test_stepper_without_driver_still_attaches() {
    let mut rig = Rig::for_board(BoardType::Stepper);
    rig.hardware.motors = None;
    let bus = LoopbackBus::new();
    let port = bus.attach(ID);
    port.init().unwrap();
    let module = Arc::new(Module::new(
        BoardType::Stepper,
        rig.hardware.clone(),
        Arc::new(NodeIdentity::new(ID, MASTER)),
        Arc::new(port),
    ));
    let table = CommandTable::new();

    assert!(module.attach(&table).is_ok());
    assert_eq!(table.dispatch(&Message::with_param(opcode::STEPPER_IS_BUSY, ID, 0), MASTER), 0);
}

#[test]
fn test_detach_clears_handlers_and_inputs() {
    let bench = Bench::new(BoardType::Discrete);
    bench.run(Message::with_param(opcode::ATTACH_INPUT_NOTIFY, ID, 1));
    bench.run(Message::with_param(opcode::LED, ID, u16::from(LedColor::Green as u8)));
    assert!(bench.rig.peripherals.is_armed(1));

    bench.module.detach(&bench.table);

    assert!(bench.table.is_empty());
    assert!(!bench.rig.peripherals.is_armed(1));
    assert_eq!(bench.rig.peripherals.led(), LedState::Off);
}

#[test]
fn test_board_names() {
    assert_eq!(BoardType::from_name("OIStepperVE"), Some(BoardType::StepperVe));
    assert_eq!(BoardType::from_name("relaylp"), Some(BoardType::RelayLp));
    assert_eq!(BoardType::from_name("OIToaster"), None);
    assert_eq!(BoardType::from_i32(13), Some(BoardType::Stepper));
    assert_eq!(BoardType::from_i32(5), None);
    assert_eq!(BoardType::Discrete.to_string(), "OIDiscrete");
}

#[test]
fn test_stepper_motion_commands() {
    let bench = Bench::new(BoardType::Stepper);
    let position = |motor: u16| bench.run(Message::with_param(opcode::STEPPER_GET_POSITION, ID, motor)) as i32;

    bench.run(Message::with_payload(opcode::STEPPER_SET_HOME, ID, 1, (-200i32) as u32));
    // motor 1 forward, then back
    bench.run(Message::with_payload(opcode::STEPPER_MOVE, ID, 0x0101, 400));
    assert_eq!(position(1), 400);
    bench.run(Message::with_payload(opcode::STEPPER_MOVE, ID, 0x0001, 1000));
    assert_eq!(position(1), -600);
    bench.run(Message::with_param(opcode::STEPPER_GO_HOME, ID, 1));
    assert_eq!(position(1), -200);

    // motor 0: action in nibble 3, direction in nibble 2
    bench.run(Message::with_payload(opcode::STEPPER_GO_UNTIL, ID, 0x8100, 1500));
    // unknown action is dropped
    bench.run(Message::with_payload(opcode::STEPPER_GO_UNTIL, ID, 0x3100, 1500));
    // unknown motor is dropped
    bench.run(Message::with_payload(opcode::STEPPER_GO_TO, ID, 0x0007, 10));

    assert_eq!(
        bench.rig.motors().motions(),
        vec![
            (1, Motion::Move { direction: Direction::Forward, steps: 400 }),
            (1, Motion::Move { direction: Direction::Reverse, steps: 1000 }),
            (1, Motion::GoHome),
            (
                0,
                Motion::GoUntil { action: SwitchAction::CopyToMark, direction: Direction::Forward, speed: 1500 }
            ),
        ]
    );
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_IS_BUSY, ID, 0)), 1);
    assert_eq!(position(0), 0);
}

#[test]
fn test_stepper_mark_and_reset() {
    let bench = Bench::new(BoardType::StepperVe);
    bench.run(Message::with_payload(opcode::STEPPER_SET_MARK, ID, 0, (-35i32) as u32));
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_GET_MARK, ID, 0)) as i32, -35);

    bench.run(Message::with_param(opcode::STEPPER_GO_MARK, ID, 0));
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_GET_POSITION, ID, 0)) as i32, -35);

    bench.run(Message::with_param(opcode::STEPPER_RESET_POSITION, ID, 0));
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_GET_POSITION, ID, 0)), 0);
}

#[test]
fn test_stepper_registers() {
    let bench = Bench::new(BoardType::Stepper);

    // register 9 of motor 1
    bench.run(Message::with_payload(opcode::STEPPER_SET_PARAM, ID, 0x0901, 0x29));
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_GET_PARAM, ID, 0x0901)), 0x29);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_GET_PARAM, ID, 0x0900)), 0);

    let get = Message::with_param(opcode::STEPPER_GET_ANALOG_VALUE, ID, 0x0500);
    let mut set = Message::with_param(opcode::STEPPER_SET_ANALOG_VALUE, ID, 0x0500);
    set.set_payload_f32(412.5);
    assert_eq!(bench.run(set), 1);
    assert_eq!(f32::from_bits(bench.run(get)), 412.5);

    set.set_payload_f32(-1.0);
    assert_eq!(bench.run(set), 0);
    assert_eq!(f32::from_bits(bench.run(get)), 412.5);

    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_SELECT_STEP_MODE, ID, 0x0700)), 1);
    assert_eq!(bench.rig.motors().step_mode(0), Some(StepMode::OneTwentyEighth));
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_SELECT_STEP_MODE, ID, 0x0900)), 0);

    // refused while running
    bench.rig.motors().set_busy(0, true);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_SELECT_STEP_MODE, ID, 0x0200)), 0);
    assert_eq!(bench.rig.motors().step_mode(0), Some(StepMode::OneTwentyEighth));
}

#[test]
fn test_stepper_status_reads() {
    let bench = Bench::new(BoardType::Stepper);
    let motors = bench.rig.motors();

    motors.set_status(0, 0x7E03);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_READ_STATUS, ID, 0)), 0x7E03);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_READ_STATUS, ID, 0)), 0x7E03);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_GET_STATUS, ID, 0)), 0x7E03);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_READ_STATUS, ID, 0)), 0);

    motors.set_status(0, 0x0001);
    motors.set_status(1, 0x0203);
    bench.run(Message::new(opcode::STEPPER_FETCH_ALL_STATUS, ID));
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_GET_FETCHED_STATUS, ID, 1)), 0x0203);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_GET_FETCHED_STATUS, ID, 0)), 0x0001);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_READ_STATUS, ID, 1)), 0);
    assert_eq!(bench.run(Message::with_param(opcode::STEPPER_GET_FETCHED_STATUS, ID, 5)), 0);
}

#[test]
fn test_attach_interrupt_commands_report_to_requester() {
    let bench = Bench::new(BoardType::Stepper);
    let requester = 9;
    assert!(!bench.rig.motors().is_line_armed(MotorLine::Busy));

    bench.table.dispatch(&Message::new(opcode::STEPPER_ATTACH_BUSY_INTERRUPT, ID), requester);
    bench.table.dispatch(&Message::new(opcode::STEPPER_ATTACH_BUSY_INTERRUPT, ID), requester);
    bench.table.dispatch(&Message::new(opcode::STEPPER_ATTACH_ERROR_HANDLER, ID), requester);
    assert_eq!(bench.module.identity().master_id(), requester);
    assert!(bench.rig.motors().is_line_armed(MotorLine::Busy));
    assert!(bench.rig.motors().is_line_armed(MotorLine::Error));
    assert!(!bench.rig.motors().is_line_armed(MotorLine::Flag));

    bench.rig.motors().pulse(MotorLine::Busy);
    let bridge = bench.module.bridge();
    bridge.handle(bridge.signal().take());
    let sent = bench.bus.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .all(|f| f.dest == requester && f.message.command() == opcode::STEPPER_EVENT));

    bench.module.detach(&bench.table);
    assert!(!bench.rig.motors().is_line_armed(MotorLine::Busy));
    assert!(!bench.rig.motors().is_line_armed(MotorLine::Error));
}
