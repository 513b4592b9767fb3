//! Bus transports as seen by the routing engine.
//!
//! Bring-up, framing and flow control belong to the drivers. The core only
//! needs to send a message to a node and to wait for the next raw frame.

use core::future::Future;

use thiserror::Error;

use crate::message::{Message, RawFrame};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport initialization failed: {0}")]
    Init(String),
    #[error("failed to send to node {dest}: {reason}")]
    Send { dest: u8, reason: String },
    #[error("transport not initialized")]
    NotInitialized,
}

/// A frame as delivered by a driver: raw bytes plus the sending node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundFrame {
    pub bytes: RawFrame,
    pub source: u8,
}

/// Outbound half of a transport. Object safe so handlers can hold one.
pub trait FrameSink: Send + Sync {
    fn send(&self, message: &Message, dest: u8) -> Result<(), TransportError>;
}

/// Addressed multidrop bus carrying all three categories.
///
/// `receive` must be cancel-safe: the listener drops the future when it is
/// suspended and no frame may be lost by doing so.
pub trait MultidropTransport: FrameSink + 'static {
    fn init(&self) -> Result<(), TransportError>;
    fn receive(&self) -> impl Future<Output = Option<InboundFrame>> + Send;
    /// Waits until every queued outbound frame left the driver.
    fn flush(&self);
    /// Drops every frame received but not yet handed out.
    fn reset_receive_queue(&self);
}

/// Broadcast bus carrying SEND traffic only. Same cancel-safety rule.
pub trait BroadcastTransport: FrameSink + 'static {
    fn init(&self) -> Result<(), TransportError>;
    fn deinit(&self) -> Result<(), TransportError>;
    fn receive(&self) -> impl Future<Output = Option<InboundFrame>> + Send;
}
