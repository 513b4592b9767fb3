//! Non-volatile byte store and the hardware id kept in it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::identity::UNDEFINED_ID;

/// NVS namespace holding the node identity.
pub const IDENTITY_NAMESPACE: &str = "oi_identity";

/// Key of the persisted hardware id.
pub const HARDWARE_ID_KEY: &str = "hw_id";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("failed to open namespace {0}")]
    Open(String),
    #[error("failed to read {key}: {reason}")]
    Read { key: String, reason: String },
    #[error("failed to write {key}: {reason}")]
    Write { key: String, reason: String },
    #[error("failed to commit namespace {0}")]
    Commit(String),
}

/// Byte-granular persistent key/value storage.
///
/// `read` yields `Ok(None)` for a key that was never written.
pub trait NvStore: Send + Sync {
    fn read(&self, namespace: &str, key: &str) -> Result<Option<u8>, StoreError>;
    fn write(&self, namespace: &str, key: &str, value: u8) -> Result<(), StoreError>;
}

/// Hardware id persistence on top of an [`NvStore`].
pub struct HardwareIdStore<'a> {
    store: &'a dyn NvStore,
}

impl<'a> HardwareIdStore<'a> {
    pub fn new(store: &'a dyn NvStore) -> Self {
        Self { store }
    }

    /// Persisted id, or [`UNDEFINED_ID`] when missing or unreadable.
    pub fn load(&self) -> u8 {
        match self.store.read(IDENTITY_NAMESPACE, HARDWARE_ID_KEY) {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!("no hardware id stored, using undefined id");
                UNDEFINED_ID
            }
            Err(e) => {
                error!("cannot read hardware id: {}", e);
                UNDEFINED_ID
            }
        }
    }

    pub fn save(&self, id: u8) -> Result<(), StoreError> {
        self.store
            .write(IDENTITY_NAMESPACE, HARDWARE_ID_KEY, id)
            .map_err(|e| {
                error!("cannot write hardware id {}: {}", id, e);
                e
            })?;
        info!("hardware id {} stored", id);
        Ok(())
    }
}

/// Volatile [`NvStore`] for hosts and tests. Writes can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<(String, String), u8>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Removes every key of every namespace.
    pub fn erase(&self) {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl NvStore for MemoryStore {
    fn read(&self, namespace: &str, key: &str) -> Result<Option<u8>, StoreError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StoreError::Read {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(&(namespace.to_string(), key.to_string())).copied())
    }

    fn write(&self, namespace: &str, key: &str, value: u8) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Write {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }
}
