//! Bus master endpoint.
//!
//! The master issues requests and collects what comes back. It does not run
//! the node routing protocol: `SET`/`GET` frames reaching it are echoes and
//! replies, matched to the pending request by source and command, while
//! `SEND` notifications addressed to it are dispatched to its own table
//! (discovery collector, input and stepper events).
//!
//! The node core never times out, so [`Master::request`] applies its own.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::discovery::Discovery;
use crate::identity::BROADCAST_ID;
use crate::message::{Category, Message};
use crate::table::{CommandTable, TableError};
use crate::transport::{InboundFrame, MultidropTransport, TransportError};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum MasterError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("no answer from node {dest} to 0x{command:04X}")]
    Timeout { command: u16, dest: u8 },
}

/// A frame received by the master together with its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub source: u8,
    pub message: Message,
}

#[derive(Default)]
struct Inbox {
    responses: Mutex<Vec<Received>>,
    notifications: Mutex<Vec<Received>>,
    arrived: Notify,
}

impl Inbox {
    fn push_response(&self, received: Received) {
        self.responses.lock().unwrap_or_else(|e| e.into_inner()).push(received);
        self.arrived.notify_waiters();
    }

    fn take_response(&self, source: u8, command: u16) -> Option<Message> {
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        let index = responses
            .iter()
            .position(|r| r.source == source && r.message.command() == command)?;
        Some(responses.remove(index).message)
    }
}

pub struct Master<M: MultidropTransport> {
    id: u8,
    transport: Arc<M>,
    table: Arc<CommandTable>,
    discovery: Arc<Discovery>,
    inbox: Arc<Inbox>,
    task: Option<JoinHandle<()>>,
}

impl<M: MultidropTransport> Master<M> {
    pub fn new(id: u8, transport: Arc<M>) -> Result<Self, MasterError> {
        let table = Arc::new(CommandTable::new());
        let discovery = Discovery::new();
        discovery.register(&table, id)?;
        Ok(Self {
            id,
            transport,
            table,
            discovery,
            inbox: Arc::new(Inbox::default()),
            task: None,
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Handlers for notifications addressed to the master.
    pub fn table(&self) -> &Arc<CommandTable> {
        &self.table
    }

    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    pub fn start(&mut self) -> Result<(), MasterError> {
        if self.task.is_some() {
            return Ok(());
        }
        self.transport.init()?;
        let (id, transport, table, inbox) = (
            self.id,
            Arc::clone(&self.transport),
            Arc::clone(&self.table),
            Arc::clone(&self.inbox),
        );
        self.task = Some(tokio::spawn(async move {
            loop {
                match transport.receive().await {
                    Some(frame) => receive_frame(id, &table, &inbox, frame),
                    None => tokio::task::yield_now().await,
                }
            }
        }));
        info!("master {} listening", self.id);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Sends without waiting for anything back.
    pub fn send(&self, message: Message, dest: u8) -> Result<(), MasterError> {
        self.transport.send(&message, dest)?;
        Ok(())
    }

    /// Sends `message` to `dest` and waits for its echo (`SET`) or reply (`GET`).
    pub async fn request(
        &self,
        message: Message,
        dest: u8,
        timeout: Duration,
    ) -> Result<Message, MasterError> {
        let command = message.command();
        let deadline = tokio::time::Instant::now() + timeout;
        self.transport.send(&message, dest)?;
        loop {
            let arrived = self.inbox.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();
            if let Some(answer) = self.inbox.take_response(dest, command) {
                return Ok(answer);
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return Err(MasterError::Timeout { command, dest });
            }
        }
    }

    /// Broadcasts a type scan. See [`Discovery`].
    pub fn scan(&self) -> Result<(), MasterError> {
        self.discovery.scan(self.transport.as_ref())?;
        Ok(())
    }

    /// `SEND` notifications received so far, oldest first.
    pub fn notifications(&self) -> Vec<Received> {
        self.inbox
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl<M: MultidropTransport> Drop for Master<M> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_frame(id: u8, table: &CommandTable, inbox: &Inbox, frame: InboundFrame) {
    let Ok(message) = Message::decode(&frame.bytes) else {
        warn!("master dropped malformed frame from node {}", frame.source);
        return;
    };
    let received = Received { source: frame.source, message };
    match message.category() {
        Some(Category::Send) => {
            if message.address() != id && message.address() != BROADCAST_ID {
                return;
            }
            debug!("master <- {}: {}", frame.source, message);
            inbox
                .notifications
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(received);
            table.dispatch(&message, frame.source);
        }
        // echoes carry the responder's id, so only the source identifies them
        Some(Category::Set | Category::Get) => inbox.push_response(received),
        None => warn!("master dropped frame with reserved category: {}", message),
    }
}
