//! Shared state of one serial link.

use crate::config::EngineConfig;
use crate::node_table::{NodeState, NodeTable};
use crate::outgoing::OutgoingPacketBuffer;
use crate::stats::LinkStats;
use crate::transport::ByteSink;
use crate::uplink::UplinkQueue;
use bidib_protocol::NodeAddress;
use std::sync::Arc;

/// Everything the send path, the receiver thread and the flush thread share.
///
/// Lock order: outgoing buffer, then node table. The uplink queues are only
/// locked on their own.
pub struct Link {
    config: EngineConfig,
    pub(crate) table: NodeTable,
    pub(crate) outgoing: OutgoingPacketBuffer,
    uplink: UplinkQueue,
    errors: UplinkQueue,
    pub(crate) stats: Arc<LinkStats>,
}

impl Link {
    pub fn new(config: EngineConfig, sink: Box<dyn ByteSink>) -> Self {
        let stats = Arc::new(LinkStats::new());
        let table = NodeTable::new(
            config.flow_control.default_credit,
            config.flow_control.honor_reported_capacity,
        );
        let outgoing =
            OutgoingPacketBuffer::new(sink, config.link.max_packet_size, stats.clone());
        Self {
            config,
            table,
            outgoing,
            uplink: UplinkQueue::new(),
            errors: UplinkQueue::new(),
            stats,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    /// Decoded inbound messages.
    pub fn uplink(&self) -> &UplinkQueue {
        &self.uplink
    }

    /// Decoded inbound error reports.
    pub fn errors(&self) -> &UplinkQueue {
        &self.errors
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn node_state(&self, addr: NodeAddress) -> Option<NodeState> {
        self.table.state(addr)
    }

    /// Writes the packet under construction, if any.
    pub fn flush(&self) {
        self.outgoing.flush();
    }

    /// Forgets all per-node state, queued inbound messages and any unsent
    /// packet.
    pub fn reset(&self) {
        self.outgoing.discard();
        self.table.reset();
        self.uplink.clear();
        self.errors.clear();
    }
}
