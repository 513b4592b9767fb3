//! Routing engine: one listener task per transport.
//!
//! The multidrop listener serves all three categories:
//!
//! - `SET`: echo the frame to its sender (address rewritten to our id)
//!   unless it was broadcast, then dispatch,
//! - `GET`: dispatch, then reply to the sender with the result as payload
//!   unless it was broadcast,
//! - `SEND`: dispatch only.
//!
//! The two replies are addressed differently: a `SET` echo carries the
//! responder's id, a `GET` reply carries the requester's. Older firmware
//! put the responder's id in `GET` replies too, so a peer talking to both
//! should identify the responder by the frame source, never by the address.
//!
//! The broadcast listener accepts `SEND` only. Both drop frames addressed to
//! another node without a word.
//!
//! Each listener is `running` or `suspended`. Suspension cancels the pending
//! receive; resuming the multidrop listener flushes the driver and discards
//! frames queued meanwhile, resuming the broadcast listener re-initializes
//! its transport.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::identity::{NodeIdentity, BROADCAST_ID};
use crate::message::{Category, Message};
use crate::opcode;
use crate::table::{CommandTable, TableError};
use crate::transport::{
    BroadcastTransport, FrameSink, InboundFrame, MultidropTransport, TransportError,
};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("multidrop transport bring-up failed: {0}")]
    Multidrop(TransportError),
    #[error("broadcast transport bring-up failed: {0}")]
    Broadcast(TransportError),
    #[error("system handler registration failed: {0}")]
    Table(#[from] TableError),
    #[error("routing engine already started")]
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Listener {
    Multidrop,
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerState {
    Running,
    Suspended,
}

/// Shared handle to the run state of both listeners.
#[derive(Debug, Clone)]
pub struct ListenerControl {
    multidrop: Arc<watch::Sender<ListenerState>>,
    broadcast: Arc<watch::Sender<ListenerState>>,
}

impl ListenerControl {
    pub fn new() -> Self {
        Self {
            multidrop: Arc::new(watch::Sender::new(ListenerState::Running)),
            broadcast: Arc::new(watch::Sender::new(ListenerState::Running)),
        }
    }

    fn sender(&self, listener: Listener) -> &watch::Sender<ListenerState> {
        match listener {
            Listener::Multidrop => &self.multidrop,
            Listener::Broadcast => &self.broadcast,
        }
    }

    pub fn state(&self, listener: Listener) -> ListenerState {
        *self.sender(listener).borrow()
    }

    pub fn suspend(&self, listener: Listener) {
        self.set(listener, ListenerState::Suspended);
    }

    pub fn resume(&self, listener: Listener) {
        self.set(listener, ListenerState::Running);
    }

    fn set(&self, listener: Listener, state: ListenerState) {
        let previous = self.sender(listener).send_replace(state);
        if previous != state {
            debug!("{:?} listener -> {:?}", listener, state);
        }
    }

    fn subscribe(&self, listener: Listener) -> watch::Receiver<ListenerState> {
        self.sender(listener).subscribe()
    }

    /// Applies a `SYSTEM` param word. Unknown words are ignored with a warning.
    pub fn apply_system_param(&self, param: u16) {
        let [target, action] = param.to_be_bytes();
        let listener = match target {
            opcode::SYSTEM_TARGET_MULTIDROP => Listener::Multidrop,
            opcode::SYSTEM_TARGET_BROADCAST => Listener::Broadcast,
            _ => {
                warn!("unknown system target 0x{:02X}", target);
                return;
            }
        };
        match action {
            opcode::SYSTEM_ACTION_SUSPEND => self.suspend(listener),
            opcode::SYSTEM_ACTION_RESUME => self.resume(listener),
            _ => warn!("unknown system action 0x{:02X}", action),
        }
    }
}

impl Default for ListenerControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame counters shared by both listeners.
#[derive(Debug, Default)]
pub struct RoutingStats {
    pub received: AtomicU32,
    pub malformed: AtomicU32,
    pub unaddressed: AtomicU32,
    pub rejected: AtomicU32,
    pub dispatched: AtomicU32,
}

impl RoutingStats {
    fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Router {
    identity: Arc<NodeIdentity>,
    table: Arc<CommandTable>,
    stats: Arc<RoutingStats>,
}

impl Router {
    /// Decodes and gates a frame. `None` when it is not for us.
    fn accept(&self, frame: &InboundFrame) -> Option<Message> {
        RoutingStats::bump(&self.stats.received);
        let message = match Message::decode(&frame.bytes) {
            Ok(message) => message,
            Err(e) => {
                RoutingStats::bump(&self.stats.malformed);
                warn!("dropping frame from node {}: {}", frame.source, e);
                return None;
            }
        };
        if !self.identity.accepts(message.address()) {
            RoutingStats::bump(&self.stats.unaddressed);
            return None;
        }
        Some(message)
    }

    fn dispatch(&self, message: &Message, source: u8) -> u32 {
        RoutingStats::bump(&self.stats.dispatched);
        self.table.dispatch(message, source)
    }

    fn route_multidrop(&self, sink: &dyn FrameSink, frame: InboundFrame) {
        let Some(message) = self.accept(&frame) else {
            return;
        };
        let source = frame.source;
        let broadcast = message.address() == BROADCAST_ID;
        debug!("multidrop <- {}: {}", source, message);

        match message.category() {
            Some(Category::Set) => {
                if !broadcast {
                    let mut echo = message;
                    echo.set_address(self.identity.id());
                    if let Err(e) = sink.send(&echo, source) {
                        error!("echo to node {} failed: {}", source, e);
                    }
                }
                self.dispatch(&message, source);
            }
            Some(Category::Get) => {
                let result = self.dispatch(&message, source);
                if !broadcast {
                    let mut reply = message;
                    // requester's address, not ours: see the module docs
                    reply.set_address(source);
                    reply.set_payload(result);
                    if let Err(e) = sink.send(&reply, source) {
                        error!("reply to node {} failed: {}", source, e);
                    }
                }
            }
            Some(Category::Send) => {
                self.dispatch(&message, source);
            }
            None => {
                RoutingStats::bump(&self.stats.rejected);
                warn!("unsupported category on multidrop: {}", message);
            }
        }
    }

    fn route_broadcast(&self, frame: InboundFrame) {
        let Some(message) = self.accept(&frame) else {
            return;
        };
        debug!("broadcast <- {}: {}", frame.source, message);
        if message.category() == Some(Category::Send) {
            self.dispatch(&message, frame.source);
        } else {
            RoutingStats::bump(&self.stats.rejected);
            warn!("non-SEND frame on broadcast bus dropped: {}", message);
        }
    }
}

pub struct RoutingEngine<M: MultidropTransport, B: BroadcastTransport> {
    router: Arc<Router>,
    multidrop: Arc<M>,
    broadcast: Option<Arc<B>>,
    control: ListenerControl,
    tasks: Vec<JoinHandle<()>>,
}

impl<M: MultidropTransport, B: BroadcastTransport> RoutingEngine<M, B> {
    pub fn new(
        identity: Arc<NodeIdentity>,
        table: Arc<CommandTable>,
        multidrop: Arc<M>,
        broadcast: Option<Arc<B>>,
    ) -> Self {
        Self {
            router: Arc::new(Router {
                identity,
                table,
                stats: Arc::new(RoutingStats::default()),
            }),
            multidrop,
            broadcast,
            control: ListenerControl::new(),
            tasks: Vec::new(),
        }
    }

    pub fn control(&self) -> &ListenerControl {
        &self.control
    }

    pub fn stats(&self) -> &Arc<RoutingStats> {
        &self.router.stats
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Brings both transports up, registers the `SYSTEM` handler and spawns
    /// the listeners. Transport failures are fatal.
    pub fn start(&mut self) -> Result<(), RoutingError> {
        if self.is_running() {
            return Err(RoutingError::AlreadyStarted);
        }
        self.multidrop.init().map_err(RoutingError::Multidrop)?;
        if let Some(broadcast) = &self.broadcast {
            broadcast.init().map_err(RoutingError::Broadcast)?;
        }

        let control = self.control.clone();
        let id = self.router.identity.id();
        if !self.router.table.contains(opcode::SYSTEM, id) {
            self.router.table.register(opcode::SYSTEM, id, move |msg: &Message, _| {
                control.apply_system_param(msg.param());
                0
            })?;
        }

        self.tasks.push(tokio::spawn(run_multidrop(
            Arc::clone(&self.router),
            Arc::clone(&self.multidrop),
            self.control.subscribe(Listener::Multidrop),
        )));
        if let Some(broadcast) = &self.broadcast {
            self.tasks.push(tokio::spawn(run_broadcast(
                Arc::clone(&self.router),
                Arc::clone(broadcast),
                self.control.subscribe(Listener::Broadcast),
            )));
        }
        info!(
            "routing engine started for node {} ({} listener(s))",
            id,
            self.tasks.len()
        );
        Ok(())
    }

    /// Tears both listener tasks down.
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("routing engine stopped");
    }
}

impl<M: MultidropTransport, B: BroadcastTransport> Drop for RoutingEngine<M, B> {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn run_multidrop<M: MultidropTransport>(
    router: Arc<Router>,
    transport: Arc<M>,
    mut state: watch::Receiver<ListenerState>,
) {
    loop {
        if *state.borrow_and_update() == ListenerState::Suspended {
            info!("multidrop listener suspended");
            if state.wait_for(|s| *s == ListenerState::Running).await.is_err() {
                return;
            }
            // frames buffered while suspended are stale
            transport.flush();
            transport.reset_receive_queue();
            info!("multidrop listener resumed");
        }

        let frame = tokio::select! {
            frame = transport.receive() => frame,
            changed = state.changed() => {
                if changed.is_err() {
                    return;
                }
                continue;
            }
        };
        match frame {
            Some(frame) => router.route_multidrop(transport.as_ref(), frame),
            None => tokio::task::yield_now().await,
        }
    }
}

async fn run_broadcast<B: BroadcastTransport>(
    router: Arc<Router>,
    transport: Arc<B>,
    mut state: watch::Receiver<ListenerState>,
) {
    loop {
        if *state.borrow_and_update() == ListenerState::Suspended {
            if let Err(e) = transport.deinit() {
                error!("broadcast transport deinit failed: {}", e);
            }
            info!("broadcast listener suspended");
            if state.wait_for(|s| *s == ListenerState::Running).await.is_err() {
                return;
            }
            if let Err(e) = transport.init() {
                error!("broadcast transport re-init failed: {}", e);
            }
            info!("broadcast listener resumed");
        }

        let frame = tokio::select! {
            frame = transport.receive() => frame,
            changed = state.changed() => {
                if changed.is_err() {
                    return;
                }
                continue;
            }
        };
        match frame {
            Some(frame) => router.route_broadcast(frame),
            None => tokio::task::yield_now().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_param_drives_listener_state() {
        let control = ListenerControl::new();
        assert_eq!(control.state(Listener::Multidrop), ListenerState::Running);

        control.apply_system_param(opcode::system_param(
            opcode::SYSTEM_TARGET_MULTIDROP,
            opcode::SYSTEM_ACTION_SUSPEND,
        ));
        assert_eq!(control.state(Listener::Multidrop), ListenerState::Suspended);
        assert_eq!(control.state(Listener::Broadcast), ListenerState::Running);

        control.apply_system_param(opcode::system_param(
            opcode::SYSTEM_TARGET_BROADCAST,
            opcode::SYSTEM_ACTION_SUSPEND,
        ));
        assert_eq!(control.state(Listener::Broadcast), ListenerState::Suspended);

        control.apply_system_param(opcode::system_param(
            opcode::SYSTEM_TARGET_MULTIDROP,
            opcode::SYSTEM_ACTION_RESUME,
        ));
        assert_eq!(control.state(Listener::Multidrop), ListenerState::Running);

        // unknown target leaves everything alone
        control.apply_system_param(0x0700);
        assert_eq!(control.state(Listener::Broadcast), ListenerState::Suspended);
    }
}
