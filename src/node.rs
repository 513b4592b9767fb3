//! One addressable board instance: module, command table, event bridge and
//! routing engine wired together with an explicit `create` / `start` / `stop`
//! lifecycle.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{ConfigError, NodeConfig};
use crate::identity::{NodeIdentity, UNDEFINED_ID};
use crate::module::{Hardware, Module, ModuleError};
use crate::routing::{ListenerControl, RoutingEngine, RoutingError, RoutingStats};
use crate::store::HardwareIdStore;
use crate::table::CommandTable;
use crate::transport::{BroadcastTransport, FrameSink, MultidropTransport};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("module: {0}")]
    Module(#[from] ModuleError),
    #[error("routing: {0}")]
    Routing(#[from] RoutingError),
}

pub struct Node<M: MultidropTransport, B: BroadcastTransport> {
    identity: Arc<NodeIdentity>,
    table: Arc<CommandTable>,
    module: Arc<Module>,
    routing: RoutingEngine<M, B>,
    bridge_task: Option<JoinHandle<()>>,
}

impl<M: MultidropTransport, B: BroadcastTransport> Node<M, B> {
    /// Builds the node. The id comes from the store, or from the config
    /// when the store holds none. Nothing runs until [`Node::start`].
    pub fn create(
        config: &NodeConfig,
        hardware: Hardware,
        multidrop: Arc<M>,
        broadcast: Option<Arc<B>>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let board_type = config.board_type()?;

        let stored = HardwareIdStore::new(hardware.store.as_ref()).load();
        let id = if stored == UNDEFINED_ID { config.default_id } else { stored };
        let identity = Arc::new(NodeIdentity::new(id, config.master_id));
        let table = Arc::new(CommandTable::new());

        let outbound: Arc<dyn FrameSink> = multidrop.clone();
        let module = Arc::new(
            Module::new(board_type, hardware, Arc::clone(&identity), outbound)
                .with_restart_delay(config.restart_delay()),
        );
        let broadcast = if config.broadcast_bus { broadcast } else { None };
        let routing = RoutingEngine::new(Arc::clone(&identity), Arc::clone(&table), multidrop, broadcast);

        Ok(Self {
            identity,
            table,
            module,
            routing,
            bridge_task: None,
        })
    }

    pub fn id(&self) -> u8 {
        self.identity.id()
    }

    pub fn identity(&self) -> &Arc<NodeIdentity> {
        &self.identity
    }

    pub fn table(&self) -> &Arc<CommandTable> {
        &self.table
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn control(&self) -> &ListenerControl {
        self.routing.control()
    }

    pub fn stats(&self) -> &Arc<RoutingStats> {
        self.routing.stats()
    }

    pub fn is_running(&self) -> bool {
        self.routing.is_running()
    }

    /// Registers the handlers, starts the event consumer and brings the
    /// transports up. A transport failure undoes the attach and is returned.
    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.is_running() {
            return Err(RoutingError::AlreadyStarted.into());
        }
        self.module.attach(&self.table)?;
        if let Err(e) = self.routing.start() {
            self.module.detach(&self.table);
            return Err(e.into());
        }
        self.bridge_task = Some(self.module.bridge().spawn());
        info!("node {} up as {}", self.id(), self.module.board_type());
        Ok(())
    }

    pub fn stop(&mut self) {
        self.routing.stop();
        if let Some(task) = self.bridge_task.take() {
            task.abort();
        }
        self.module.detach(&self.table);
        info!("node {} down", self.id());
    }
}

impl<M: MultidropTransport, B: BroadcastTransport> Drop for Node<M, B> {
    fn drop(&mut self) {
        if let Some(task) = self.bridge_task.take() {
            task.abort();
        }
    }
}
