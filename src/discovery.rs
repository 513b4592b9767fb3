//! Master-side bus scan.
//!
//! A broadcast `GET_TYPE_ALL` makes every node answer with a `MODULE_ANNOUNCE`
//! addressed to the requester (param = responder id, payload = board type).
//! [`Discovery`] collects those announcements.

use std::sync::{Arc, Mutex};

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::identity::BROADCAST_ID;
use crate::message::Message;
use crate::module::BoardType;
use crate::opcode;
use crate::table::{CommandTable, TableError};
use crate::transport::{FrameSink, TransportError};

pub const MAX_DISCOVERED: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub node: u8,
    pub board_type: BoardType,
}

#[derive(Debug, Default)]
pub struct Discovery {
    found: Mutex<ArrayVec<Announcement, MAX_DISCOVERED>>,
}

impl Discovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers the `MODULE_ANNOUNCE` collector under the master's id.
    pub fn register(self: &Arc<Self>, table: &CommandTable, master_id: u8) -> Result<(), TableError> {
        let discovery = Arc::clone(self);
        table.register(opcode::MODULE_ANNOUNCE, master_id, move |msg: &Message, _| {
            discovery.record(msg.param_lo(), msg.payload());
            0
        })
    }

    /// Sends the broadcast scan request. Answers arrive asynchronously.
    pub fn scan(&self, sink: &dyn FrameSink) -> Result<(), TransportError> {
        self.clear();
        info!("scanning bus for modules");
        sink.send(&Message::new(opcode::GET_TYPE_ALL, BROADCAST_ID), BROADCAST_ID)
    }

    pub fn record(&self, node: u8, raw_type: u32) {
        let Some(board_type) = i32::try_from(raw_type).ok().and_then(BoardType::from_i32) else {
            warn!("node {} announced unknown board type {}", node, raw_type);
            return;
        };
        let mut found = self.lock();
        if let Some(entry) = found.iter_mut().find(|a| a.node == node) {
            entry.board_type = board_type;
            return;
        }
        if found.try_push(Announcement { node, board_type }).is_err() {
            warn!("discovery list full, dropping node {}", node);
            return;
        }
        info!("found {} at node {}", board_type, node);
    }

    /// Announcements received since the last scan, ordered by node id.
    pub fn found(&self) -> Vec<Announcement> {
        let mut found = self.lock().to_vec();
        found.sort_by_key(|a| a.node);
        found
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ArrayVec<Announcement, MAX_DISCOVERED>> {
        self.found.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_dedups_and_ignores_unknown_types() {
        let discovery = Discovery::new();
        discovery.record(4, BoardType::Stepper as u32);
        discovery.record(2, BoardType::Core as u32);
        discovery.record(4, BoardType::StepperVe as u32);
        discovery.record(7, 999);

        let found = discovery.found();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], Announcement { node: 2, board_type: BoardType::Core });
        assert_eq!(found[1].board_type, BoardType::StepperVe);
    }

    #[test]
    fn test_collector_reads_param_and_payload() {
        let discovery = Discovery::new();
        let table = CommandTable::new();
        discovery.register(&table, 1).unwrap();

        let announce = Message::with_payload(opcode::MODULE_ANNOUNCE, 1, 9, BoardType::Mixed as u32);
        assert_eq!(table.dispatch(&announce, 9), 0);
        assert_eq!(
            discovery.found(),
            vec![Announcement { node: 9, board_type: BoardType::Mixed }]
        );
    }
}
