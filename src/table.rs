//! Command table: maps `(command, address)` to a handler.
//!
//! Lookup policy for an inbound message:
//!
//! - one entry for the command: it runs whatever the message address,
//! - several entries: the one registered for the message address runs,
//! - nothing matches: no-op returning `0`.
//!
//! The first case serves module-type-generic handlers, the second lets
//! several logical owners in one process register the same opcode.

use std::sync::{Arc, RwLock};

use heapless::Vec;
use thiserror::Error;
use tracing::{debug, warn};

use crate::message::Message;

pub const MAX_COMMAND_ENTRIES: usize = 64;

/// A command handler. Receives the message and the id of the node it came
/// from, returns the result word (`0` when nothing meaningful exists).
pub type Handler = Arc<dyn Fn(&Message, u8) -> u32 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("command 0x{command:04X} already registered for address {address}")]
    AlreadyRegistered { command: u16, address: u8 },
    #[error("command table full")]
    Full,
}

struct Entry {
    command: u16,
    address: u8,
    handler: Handler,
}

pub struct CommandTable {
    entries: RwLock<Vec<Entry, MAX_COMMAND_ENTRIES>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Inserts a handler. Only an identical `(command, address)` pair is rejected.
    pub fn register<F>(&self, command: u16, address: u8, handler: F) -> Result<(), TableError>
    where
        F: Fn(&Message, u8) -> u32 + Send + Sync + 'static,
    {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.iter().any(|e| e.command == command && e.address == address) {
            return Err(TableError::AlreadyRegistered { command, address });
        }
        entries
            .push(Entry {
                command,
                address,
                handler: Arc::new(handler),
            })
            .map_err(|_| TableError::Full)?;
        debug!("registered command 0x{:04X} for address {}", command, address);
        Ok(())
    }

    /// Removes every entry for `command`, whatever address it was registered with.
    pub fn unregister(&self, command: u16, _address: u8) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| e.command != command);
    }

    pub fn contains(&self, command: u16, address: u8) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().any(|e| e.command == command && e.address == address)
    }

    /// Resolves the handler for `message` and runs it.
    ///
    /// The lock is held only while the handler is looked up, so a handler may
    /// itself register or unregister entries.
    pub fn dispatch(&self, message: &Message, source: u8) -> u32 {
        match self.resolve(message) {
            Some(handler) => handler(message, source),
            None => {
                warn!("no handler for {}", message);
                0
            }
        }
    }

    fn resolve(&self, message: &Message) -> Option<Handler> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut candidates = entries.iter().filter(|e| e.command == message.command());
        let first = candidates.next()?;
        match candidates.next() {
            None => Some(Arc::clone(&first.handler)),
            Some(_) => entries
                .iter()
                .find(|e| e.command == message.command() && e.address == message.address())
                .map(|e| Arc::clone(&e.handler)),
        }
    }

    /// Snapshot of the registered `(command, address)` pairs, in registration order.
    pub fn list(&self) -> Listing {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut keys = Vec::new();
        for entry in entries.iter() {
            // capacities match, push cannot fail
            let _ = keys.push((entry.command, entry.address));
        }
        Listing { keys, position: 0 }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.list()).finish()
    }
}

/// Finite iterator over table keys. Cloning it restarts from the same snapshot.
#[derive(Debug, Clone)]
pub struct Listing {
    keys: Vec<(u16, u8), MAX_COMMAND_ENTRIES>,
    position: usize,
}

impl Listing {
    /// Rewinds to the first key.
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for Listing {
    type Item = (u16, u8);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.keys.get(self.position).copied()?;
        self.position += 1;
        Some(key)
    }
}
