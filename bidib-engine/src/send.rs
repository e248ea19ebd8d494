//! Send path: sequencing, flow control and hand-off to the packet buffer.

use crate::error::EngineError;
use crate::link::Link;
use crate::node_table::PendingMessage;
use crate::outgoing::{framed_len, PacketWriter};
use crate::stats::LinkStats;
use bidib_protocol::{ActionId, Message, MessageType, NodeAddress, MAGIC};
use bytes::Bytes;

/// What happened to a message handed to [`Link::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Appended to the packet under construction with this sequence number.
    /// It reaches the wire with the next flush.
    Buffered { seq: u8 },
    /// Held back because the node is stalled, out of credit or already has
    /// messages waiting. It is sent once the node can take it.
    Queued,
}

impl Link {
    /// Sends a message to `address`, or queues it when flow control holds it
    /// back.
    ///
    /// Messages that can never fit a packet are rejected before any state
    /// changes.
    pub fn send(
        &self,
        address: NodeAddress,
        msg_type: MessageType,
        payload: impl Into<Bytes>,
        action_id: Option<ActionId>,
    ) -> Result<SendOutcome, EngineError> {
        let payload = payload.into();
        self.check_fits(address, msg_type, &payload)?;

        let pending = PendingMessage::new(msg_type, payload, action_id);
        let mut writer = self.outgoing.lock();
        if !self.table.admit(address, pending.consumes_credit()) {
            self.table.enqueue_pending(address, pending);
            LinkStats::incr(&self.stats.messages_queued);
            tracing::debug!(%address, %msg_type, "message queued");
            return Ok(SendOutcome::Queued);
        }
        let seq = self.transmit(&mut writer, address, pending);
        Ok(SendOutcome::Buffered { seq })
    }

    /// Appends a message without consulting flow control.
    pub(crate) fn send_unchecked(
        &self,
        address: NodeAddress,
        msg_type: MessageType,
        payload: Bytes,
    ) -> Result<u8, EngineError> {
        self.check_fits(address, msg_type, &payload)?;
        let mut writer = self.outgoing.lock();
        Ok(self.transmit(
            &mut writer,
            address,
            PendingMessage::new(msg_type, payload, None),
        ))
    }

    fn check_fits(
        &self,
        address: NodeAddress,
        msg_type: MessageType,
        payload: &Bytes,
    ) -> Result<(), EngineError> {
        // A sequence number equal to MAGIC escapes to two bytes.
        let probe = Message::new(address, msg_type)
            .with_seq(MAGIC)
            .with_payload(payload.clone());
        let body = probe.encode()?;
        let size = framed_len(&body);
        let max = self.config().link.max_packet_size;
        if size > max {
            return Err(EngineError::Capacity { size, max });
        }
        Ok(())
    }

    /// Assigns the sequence number and appends the message. The caller holds
    /// the buffer lock and has already accounted for credit.
    pub(crate) fn transmit(
        &self,
        writer: &mut PacketWriter,
        address: NodeAddress,
        pending: PendingMessage,
    ) -> u8 {
        let seq = self.table.next_sequence(address);
        let consumes_credit = pending.consumes_credit();
        let msg = pending.into_message(address, seq);
        match msg.encode() {
            Ok(body) => {
                writer.append(&body);
                if consumes_credit {
                    self.table
                        .record_outstanding(address, seq, msg.msg_type, msg.action_id);
                }
                tracing::trace!(%address, seq, msg_type = %msg.msg_type, "message buffered");
            }
            Err(e) => {
                tracing::error!(%address, seq, error = %e, "dropping unencodable message");
            }
        }
        seq
    }

    /// Transmits messages released from one node's pending queue.
    pub(crate) fn transmit_drained(
        &self,
        writer: &mut PacketWriter,
        address: NodeAddress,
        drained: Vec<PendingMessage>,
    ) {
        if drained.is_empty() {
            return;
        }
        tracing::debug!(%address, count = drained.len(), "releasing pending messages");
        for pending in drained {
            self.transmit(writer, address, pending);
        }
    }
}
