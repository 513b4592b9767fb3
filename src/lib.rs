//! # I/O Node Core
//!
//! Messaging core of a modular industrial I/O node: every board on the bus
//! runs the same frame protocol, keyed by 16-bit command codes and 8-bit node
//! addresses, with board-specific handlers plugged into a shared dispatcher.
//!
//! ## Features
//!
//! - **Fixed 9-byte frames**: command, address, packed parameter word, 32-bit payload
//! - **Command categories**: SET (echoed), GET (answered), SEND (one-way)
//! - **Command table**: handlers keyed by (command, address), bounded capacity
//! - **Board variants**: core, discrete, mixed, relay and stepper boards behind one trait
//! - **Event bridge**: interrupt bits funneled into one consumer task
//! - **Listener control**: suspend/resume of each bus listener without replaying stale frames
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ionode::config::NodeConfig;
//! use ionode::loopback::{LoopbackBus, LoopbackPort};
//! use ionode::module::Hardware;
//! use ionode::node::Node;
//! use ionode::sim::{SimPeripherals, SimReboot};
//! use ionode::store::MemoryStore;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = LoopbackBus::new();
//! let hardware = Hardware {
//!     peripherals: Arc::new(SimPeripherals::new(4, 4)),
//!     motors: None,
//!     reboot: Arc::new(SimReboot::new()),
//!     store: Arc::new(MemoryStore::new()),
//! };
//! let config = NodeConfig { default_id: 3, broadcast_bus: false, ..NodeConfig::default() };
//! let mut node: Node<LoopbackPort, LoopbackPort> =
//!     Node::create(&config, hardware, Arc::new(bus.attach(3)), None)?;
//! node.start()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`message`] / [`opcode`] - wire envelope and command codes
//! - [`table`] - handler registry and dispatch policy
//! - [`module`] - node identity, baseline handlers and board variants
//! - [`event_bridge`] - interrupt-to-task signaling
//! - [`routing`] - per-transport listeners and the echo/reply protocol
//! - [`node`] - lifecycle wiring of all of the above
//! - [`master`] / [`discovery`] - requester side of the bus
//! - [`loopback`] / [`sim`] - in-process bus and hardware doubles

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod discovery;
pub mod event_bridge;
pub mod hal;
pub mod identity;
pub mod loopback;
pub mod master;
pub mod message;
pub mod module;
pub mod node;
pub mod opcode;
pub mod routing;
pub mod sim;
pub mod store;
pub mod table;
pub mod transport;

pub use identity::{NodeIdentity, BROADCAST_ID, UNDEFINED_ID};
pub use message::{Category, Message};
pub use module::{BoardType, Module};
pub use node::Node;
pub use routing::{Listener, ListenerControl, RoutingEngine};
pub use table::CommandTable;
