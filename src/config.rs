//! Node configuration, loaded from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{BROADCAST_ID, UNDEFINED_ID};
use crate::module::{BoardType, DEFAULT_RESTART_DELAY};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown board type '{0}'")]
    UnknownBoard(String),
    #[error("node id {0} is reserved")]
    ReservedId(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Board product name, e.g. `"OIStepper"` or `"discrete"`.
    pub board: String,
    /// Id used when the store holds none.
    pub default_id: u8,
    pub master_id: u8,
    /// Run the broadcast-only listener as well.
    pub broadcast_bus: bool,
    pub restart_delay_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            board: BoardType::Core.name().to_string(),
            default_id: 1,
            master_id: UNDEFINED_ID,
            broadcast_bus: true,
            restart_delay_ms: DEFAULT_RESTART_DELAY.as_millis() as u64,
        }
    }
}

impl NodeConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.board_type()?;
        if self.default_id == BROADCAST_ID {
            return Err(ConfigError::ReservedId(self.default_id));
        }
        Ok(())
    }

    pub fn board_type(&self) -> Result<BoardType, ConfigError> {
        BoardType::from_name(&self.board).ok_or_else(|| ConfigError::UnknownBoard(self.board.clone()))
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}
