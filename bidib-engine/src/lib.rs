//! # bidib-engine
//!
//! Transmission engine for the BiDiB serial link.
//!
//! This crate provides:
//! - The node transmission table (sequence numbers, credit, stall flags)
//! - The shared outgoing packet buffer
//! - The send path with per-node flow control
//! - The receiver thread and inbound dispatch
//! - Session start-up, handshake and teardown
//!
//! The engine only sees raw bytes: a [`ByteSource`] and a [`ByteSink`] are
//! supplied by whatever opens the physical port.

pub mod config;
pub mod error;
pub mod link;
pub mod node_table;
pub mod outgoing;
mod receiver;
pub mod send;
pub mod session;
mod stall;
pub mod stats;
pub mod transport;
pub mod uplink;

pub use config::{ConfigError, EngineConfig, FlowControlConfig, LinkConfig, SessionConfig};
pub use error::EngineError;
pub use link::Link;
pub use node_table::{NodeState, NodeTable, PendingMessage, SeqCheck};
pub use outgoing::OutgoingPacketBuffer;
pub use send::SendOutcome;
pub use session::Session;
pub use stats::{LinkStats, LinkStatsSnapshot};
pub use transport::{ByteSink, ByteSource, FlaggedSource, IoSink, IoSource};
pub use uplink::UplinkQueue;
