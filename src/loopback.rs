//! In-memory bus shared by several nodes of one process.
//!
//! Each node attaches a [`LoopbackPort`] under its driver address. A frame
//! sent to `dest` reaches the port attached as `dest`, or every other port
//! when `dest` is the broadcast id. Every send is recorded so callers can
//! inspect exact traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::identity::BROADCAST_ID;
use crate::message::{Message, RawFrame};
use crate::transport::{
    BroadcastTransport, FrameSink, InboundFrame, MultidropTransport, TransportError,
};

/// One recorded transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentFrame {
    pub sender: u8,
    pub dest: u8,
    pub message: Message,
}

struct PortSlot {
    tx: UnboundedSender<InboundFrame>,
    open: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct LoopbackBus {
    ports: Mutex<HashMap<u8, PortSlot>>,
    log: Mutex<Vec<SentFrame>>,
}

impl LoopbackBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attaches a closed port answering to driver address `node`.
    /// A previous port with the same address is replaced.
    pub fn attach(self: &Arc<Self>, node: u8) -> LoopbackPort {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        self.ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node, PortSlot { tx, open: Arc::clone(&open) });
        LoopbackPort {
            bus: Arc::clone(self),
            node,
            open,
            rx: tokio::sync::Mutex::new(rx),
            stats: PortStats::default(),
        }
    }

    /// Every frame sent on the bus so far, oldest first.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Frames sent by `sender`, oldest first.
    pub fn sent_by(&self, sender: u8) -> Vec<SentFrame> {
        self.sent().into_iter().filter(|f| f.sender == sender).collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Puts raw bytes on the wire as if `source` had sent them, bypassing the codec.
    pub fn inject(&self, source: u8, dest: u8, bytes: RawFrame) {
        self.deliver(source, dest, bytes);
    }

    fn transmit(&self, sender: u8, message: &Message, dest: u8) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentFrame { sender, dest, message: *message });
        trace!("bus {} -> {}: {}", sender, dest, message);
        self.deliver(sender, dest, message.encode());
    }

    fn deliver(&self, source: u8, dest: u8, bytes: RawFrame) {
        let ports = self.ports.lock().unwrap_or_else(|e| e.into_inner());
        let frame = InboundFrame { bytes, source };
        for (&node, slot) in ports.iter() {
            let addressed = if dest == BROADCAST_ID { node != source } else { node == dest };
            if addressed && slot.open.load(Ordering::Acquire) {
                // a dropped receiver behaves like an unplugged node
                let _ = slot.tx.send(frame);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PortStats {
    pub inits: AtomicUsize,
    pub deinits: AtomicUsize,
    pub flushes: AtomicUsize,
    pub queue_resets: AtomicUsize,
}

/// A node's connection to a [`LoopbackBus`]. Implements both transports.
pub struct LoopbackPort {
    bus: Arc<LoopbackBus>,
    node: u8,
    open: Arc<AtomicBool>,
    rx: tokio::sync::Mutex<UnboundedReceiver<InboundFrame>>,
    stats: PortStats,
}

impl LoopbackPort {
    pub fn node(&self) -> u8 {
        self.node
    }

    pub fn stats(&self) -> &PortStats {
        &self.stats
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn init(&self) -> Result<(), TransportError> {
        self.open.store(true, Ordering::Release);
        self.stats.inits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn deinit(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::Release);
        self.stats.deinits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn receive(&self) -> Option<InboundFrame> {
        self.rx.lock().await.recv().await
    }

    /// Number of frames waiting in the receive queue.
    pub fn pending(&self) -> usize {
        self.rx.try_lock().map(|rx| rx.len()).unwrap_or(0)
    }

    pub fn flush(&self) {
        // delivery is synchronous, nothing is ever left in flight
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset_receive_queue(&self) {
        if let Ok(mut rx) = self.rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
        self.stats.queue_resets.fetch_add(1, Ordering::Relaxed);
    }
}

impl FrameSink for LoopbackPort {
    fn send(&self, message: &Message, dest: u8) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotInitialized);
        }
        self.bus.transmit(self.node, message, dest);
        Ok(())
    }
}

impl MultidropTransport for LoopbackPort {
    fn init(&self) -> Result<(), TransportError> {
        LoopbackPort::init(self)
    }

    fn receive(&self) -> impl core::future::Future<Output = Option<InboundFrame>> + Send {
        LoopbackPort::receive(self)
    }

    fn flush(&self) {
        LoopbackPort::flush(self)
    }

    fn reset_receive_queue(&self) {
        LoopbackPort::reset_receive_queue(self)
    }
}

impl BroadcastTransport for LoopbackPort {
    fn init(&self) -> Result<(), TransportError> {
        LoopbackPort::init(self)
    }

    fn deinit(&self) -> Result<(), TransportError> {
        LoopbackPort::deinit(self)
    }

    fn receive(&self) -> impl core::future::Future<Output = Option<InboundFrame>> + Send {
        LoopbackPort::receive(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode;

    #[tokio::test]
    async fn test_unicast_reaches_only_destination() {
        let bus = LoopbackBus::new();
        let a = bus.attach(1);
        let b = bus.attach(2);
        let c = bus.attach(3);
        for port in [&a, &b, &c] {
            port.init().unwrap();
        }

        a.send(&Message::new(opcode::PING, 2), 2).unwrap();
        let frame = b.receive().await.unwrap();
        assert_eq!(frame.source, 1);
        assert_eq!(Message::decode(&frame.bytes).unwrap().command(), opcode::PING);
        assert_eq!(c.pending(), 0);
        assert_eq!(a.pending(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender_and_closed_ports() {
        let bus = LoopbackBus::new();
        let a = bus.attach(1);
        let b = bus.attach(2);
        let c = bus.attach(3);
        a.init().unwrap();
        b.init().unwrap();

        a.send(&Message::new(opcode::INPUT_EVENT, BROADCAST_ID), BROADCAST_ID).unwrap();
        assert_eq!(a.pending(), 0);
        assert_eq!(b.pending(), 1);
        assert_eq!(c.pending(), 0);
        assert_eq!(bus.sent().len(), 1);
    }

    #[test]
    fn test_closed_port_cannot_send() {
        let bus = LoopbackBus::new();
        let a = bus.attach(1);
        assert_eq!(
            a.send(&Message::new(opcode::PING, 2), 2),
            Err(TransportError::NotInitialized)
        );
        assert!(bus.sent().is_empty());
    }
}
