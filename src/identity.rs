use core::sync::atomic::{AtomicU8, Ordering};

/// Destination matched by every node on a bus.
pub const BROADCAST_ID: u8 = 0xFF;

/// Id reported when no hardware id has ever been persisted.
pub const UNDEFINED_ID: u8 = 0x00;

/// Volatile identity of a node, read concurrently by both listeners.
///
/// Stale reads for one frame are tolerated; every write is a single atomic
/// store so no update is ever lost.
#[derive(Debug)]
pub struct NodeIdentity {
    id: AtomicU8,
    master_id: AtomicU8,
}

impl NodeIdentity {
    pub const fn new(id: u8, master_id: u8) -> Self {
        Self {
            id: AtomicU8::new(id),
            master_id: AtomicU8::new(master_id),
        }
    }

    #[inline]
    pub fn id(&self) -> u8 {
        self.id.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_id(&self, id: u8) {
        self.id.store(id, Ordering::Release);
    }

    #[inline]
    pub fn master_id(&self) -> u8 {
        self.master_id.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_master_id(&self, master_id: u8) {
        self.master_id.store(master_id, Ordering::Release);
    }

    /// True when `address` names this node or every node.
    #[inline]
    pub fn accepts(&self, address: u8) -> bool {
        address == BROADCAST_ID || address == self.id()
    }
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self::new(UNDEFINED_ID, UNDEFINED_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_own_and_broadcast_only() {
        let identity = NodeIdentity::new(7, 1);
        assert!(identity.accepts(7));
        assert!(identity.accepts(BROADCAST_ID));
        assert!(!identity.accepts(8));

        identity.set_id(8);
        assert!(identity.accepts(8));
        assert!(!identity.accepts(7));
    }
}
