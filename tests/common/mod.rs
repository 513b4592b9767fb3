#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use ionode::hal::MotorDriver;
use ionode::module::{BoardType, Hardware};
use ionode::sim::{SimMotors, SimPeripherals, SimReboot};
use ionode::store::MemoryStore;

const POLL_LIMIT: Duration = Duration::from_secs(2);
const POLL_STEP: Duration = Duration::from_millis(5);

/// Simulated board with handles on every double.
pub struct Rig {
    pub hardware: Hardware,
    pub peripherals: Arc<SimPeripherals>,
    pub motors: Option<Arc<SimMotors>>,
    pub reboot: Arc<SimReboot>,
    pub store: Arc<MemoryStore>,
}

impl Rig {
    pub fn for_board(board_type: BoardType) -> Self {
        let profile = board_type.profile();
        let peripherals = Arc::new(SimPeripherals::new(profile.inputs, profile.outputs));
        let motors = (profile.motors > 0).then(|| Arc::new(SimMotors::new(profile.motors)));
        let reboot = Arc::new(SimReboot::new());
        let store = Arc::new(MemoryStore::new());
        let hardware = Hardware {
            peripherals: peripherals.clone(),
            motors: motors.clone().map(|m| m as Arc<dyn MotorDriver>),
            reboot: reboot.clone(),
            store: store.clone(),
        };
        Self {
            hardware,
            peripherals,
            motors,
            reboot,
            store,
        }
    }

    pub fn motors(&self) -> &SimMotors {
        self.motors.as_deref().expect("board has no motors")
    }
}

/// Polls `condition` on the runtime until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + POLL_LIMIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(POLL_STEP).await;
    }
    condition()
}

/// Gives spawned listeners time to drain whatever is queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
