pub mod boards;

pub use boards::{Board, BoardKind};

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::event_bridge::EventBridge;
use crate::hal::{LedAction, LedColor, MotorDriver, Peripherals, RebootControl};
use crate::identity::NodeIdentity;
use crate::message::Message;
use crate::opcode;
use crate::store::{HardwareIdStore, NvStore, StoreError};
use crate::table::{CommandTable, TableError};
use crate::transport::FrameSink;

pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum BoardType {
    Core = 3,
    CoreLite = 4,
    Discrete = 7,
    DiscreteVe = 8,
    Mixed = 10,
    RelayLp = 11,
    RelayHp = 12,
    Stepper = 13,
    StepperVe = 14,
}

/// Channel counts a board is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardProfile {
    pub inputs: usize,
    pub outputs: usize,
    pub motors: usize,
}

impl BoardType {
    pub const ALL: [BoardType; 9] = [
        BoardType::Core,
        BoardType::CoreLite,
        BoardType::Discrete,
        BoardType::DiscreteVe,
        BoardType::Mixed,
        BoardType::RelayLp,
        BoardType::RelayHp,
        BoardType::Stepper,
        BoardType::StepperVe,
    ];

    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as i32 == value)
    }

    pub fn name(self) -> &'static str {
        match self {
            BoardType::Core => "OICore",
            BoardType::CoreLite => "OICoreLite",
            BoardType::Discrete => "OIDiscrete",
            BoardType::DiscreteVe => "OIDiscreteVE",
            BoardType::Mixed => "OIMixed",
            BoardType::RelayLp => "OIRelayLP",
            BoardType::RelayHp => "OIRelayHP",
            BoardType::Stepper => "OIStepper",
            BoardType::StepperVe => "OIStepperVE",
        }
    }

    /// Case-insensitive lookup by product name, with or without the `OI` prefix.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        let wanted = wanted.strip_prefix("oi").unwrap_or(&wanted);
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name()[2..].eq_ignore_ascii_case(wanted))
    }

    pub fn profile(self) -> BoardProfile {
        let (inputs, outputs, motors) = match self {
            BoardType::Core => (4, 4, 0),
            BoardType::CoreLite => (2, 2, 0),
            BoardType::Discrete | BoardType::DiscreteVe => (10, 8, 0),
            BoardType::Mixed => (4, 4, 0),
            BoardType::RelayLp | BoardType::RelayHp => (0, 4, 0),
            BoardType::Stepper => (4, 0, 2),
            BoardType::StepperVe => (4, 0, 1),
        };
        BoardProfile { inputs, outputs, motors }
    }
}

impl core::fmt::Display for BoardType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("handler registration failed: {0}")]
    Table(#[from] TableError),
    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

/// Drivers a module runs on.
#[derive(Clone)]
pub struct Hardware {
    pub peripherals: Arc<dyn Peripherals>,
    pub motors: Option<Arc<dyn MotorDriver>>,
    pub reboot: Arc<dyn RebootControl>,
    pub store: Arc<dyn NvStore>,
}

/// One node's module: identity, persisted hardware id and baseline handlers.
pub struct Module {
    board: BoardKind,
    hardware: Hardware,
    identity: Arc<NodeIdentity>,
    bridge: Arc<EventBridge>,
    outbound: Arc<dyn FrameSink>,
    temperature_ready: OnceLock<()>,
    restart_delay: Duration,
}

impl Module {
    pub fn new(
        board_type: BoardType,
        hardware: Hardware,
        identity: Arc<NodeIdentity>,
        outbound: Arc<dyn FrameSink>,
    ) -> Self {
        let bridge = Arc::new(EventBridge::new(
            Arc::clone(&hardware.peripherals),
            hardware.motors.clone(),
            Arc::clone(&identity),
            Arc::clone(&outbound),
        ));
        Self {
            board: BoardKind::for_type(board_type),
            hardware,
            identity,
            bridge,
            outbound,
            temperature_ready: OnceLock::new(),
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn board(&self) -> &BoardKind {
        &self.board
    }

    pub fn board_type(&self) -> BoardType {
        self.board.board_type()
    }

    pub fn identity(&self) -> &Arc<NodeIdentity> {
        &self.identity
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.bridge
    }

    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    /// Brings the board up and registers every handler under the current id.
    pub fn attach(self: &Arc<Self>, table: &CommandTable) -> Result<(), ModuleError> {
        self.board.init(&self.hardware, &self.bridge)?;
        self.register_baseline(table)?;
        self.board.register_handlers(self, table)?;
        info!(
            "{} module attached as node {} ({} commands)",
            self.board_type(),
            self.identity.id(),
            table.len()
        );
        Ok(())
    }

    pub fn detach(&self, table: &CommandTable) {
        for (command, address) in table.list() {
            if address == self.identity.id() {
                table.unregister(command, address);
            }
        }
        self.board.deinit(&self.hardware, &self.bridge);
    }

    fn register_baseline(self: &Arc<Self>, table: &CommandTable) -> Result<(), TableError> {
        let id = self.identity.id();

        table.register(opcode::PING, id, |_, _| Module::ping())?;

        let module = Arc::clone(self);
        table.register(opcode::GET_TYPE, id, move |_, _| module.get_type() as u32)?;

        let module = Arc::clone(self);
        table.register(opcode::GET_TYPE_ALL, id, move |_, source| module.get_type_all(source))?;

        let module = Arc::clone(self);
        table.register(opcode::RESTART, id, move |_, _| {
            module.restart();
            0
        })?;

        let module = Arc::clone(self);
        table.register(opcode::UPDATE_MODE, id, move |_, _| {
            module.update_mode();
            0
        })?;

        let module = Arc::clone(self);
        table.register(opcode::LED, id, move |msg: &Message, _| {
            match (LedColor::from_u8(msg.param_lo()), LedAction::from_u8(msg.param_hi())) {
                (Some(color), Some(action)) => module.led(color, action, msg.payload()),
                _ => warn!("invalid LED request param=0x{:04X}", msg.param()),
            }
            0
        })?;

        let module = Arc::clone(self);
        table.register(opcode::INTERNAL_TEMPERATURE, id, move |_, _| {
            module.internal_temperature()
        })?;

        let module = Arc::clone(self);
        table.register(opcode::SET_MASTER, id, move |msg: &Message, _| {
            module.set_master(msg.payload() as u8);
            0
        })?;

        Ok(())
    }

    pub fn ping() -> u32 {
        opcode::PING_SENTINEL
    }

    pub fn get_type(&self) -> i32 {
        self.board_type() as i32
    }

    /// Announces this module to `requester` with a SEND frame, then returns the type.
    pub fn get_type_all(&self, requester: u8) -> u32 {
        let board_type = self.get_type() as u32;
        let announce = Message::with_payload(
            opcode::MODULE_ANNOUNCE,
            requester,
            u16::from(self.identity.id()),
            board_type,
        );
        if let Err(e) = self.outbound.send(&announce, requester) {
            error!("cannot announce to node {}: {}", requester, e);
        }
        board_type
    }

    /// Resets the board after a short delay so the in-flight echo can leave.
    pub fn restart(&self) {
        info!("restarting in {:?}", self.restart_delay);
        self.reboot_later(|reboot| reboot.restart());
    }

    /// Like [`Module::restart`], but boots into the update partition.
    pub fn update_mode(&self) {
        info!("entering update mode in {:?}", self.restart_delay);
        self.reboot_later(|reboot| reboot.restart_into_update());
    }

    /// Runs `action` on the runtime once the restart delay has passed. Outside
    /// a runtime nothing can still be in flight, so it runs at once.
    fn reboot_later(&self, action: impl FnOnce(&dyn RebootControl) + Send + 'static) {
        let reboot = Arc::clone(&self.hardware.reboot);
        let delay = self.restart_delay;
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    action(reboot.as_ref());
                });
            }
            Err(_) => {
                warn!("no runtime to defer the reboot, rebooting now");
                action(reboot.as_ref());
            }
        }
    }

    pub fn led(&self, color: LedColor, action: LedAction, period_ms: u32) {
        let peripherals = &self.hardware.peripherals;
        match action {
            LedAction::On => peripherals.led_on(color),
            LedAction::Off => peripherals.led_off(),
            LedAction::Blink => peripherals.led_blink(color, period_ms),
        }
    }

    /// Board temperature in Celsius, as the bit pattern of an `f32`.
    pub fn internal_temperature(&self) -> u32 {
        self.temperature_ready.get_or_init(|| {
            if let Err(e) = self.hardware.peripherals.temperature_init() {
                error!("temperature sensor init failed: {}", e);
            }
        });
        // bit reinterpretation, the receiver applies f32::from_bits
        self.hardware.peripherals.read_temperature().to_bits()
    }

    pub fn set_master(&self, master_id: u8) {
        info!("master set to node {}", master_id);
        self.identity.set_master_id(master_id);
    }

    pub fn get_hardware_id(&self) -> u8 {
        HardwareIdStore::new(self.hardware.store.as_ref()).load()
    }

    /// Persists `id` and adopts it at once. A failed write is logged and
    /// returned, but the in-memory id keeps the new value.
    pub fn set_hardware_id(&self, id: u8) -> Result<(), StoreError> {
        self.identity.set_id(id);
        HardwareIdStore::new(self.hardware.store.as_ref()).save(id)
    }
}
