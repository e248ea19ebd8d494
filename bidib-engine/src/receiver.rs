//! Receiver thread and inbound dispatch.

use crate::link::Link;
use crate::node_table::SeqCheck;
use crate::stats::LinkStats;
use crate::transport::ByteSource;
use bidib_protocol::{Message, MessageType, PacketAssembler, ProtocolError};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Runs the receive loop until `running` is cleared.
pub(crate) fn run_receiver(
    link: Arc<Link>,
    mut source: Box<dyn ByteSource>,
    running: Arc<AtomicBool>,
) {
    let poll = link.config().link.receive_poll_interval();
    let mut assembler = PacketAssembler::new();
    let mut noise_seen = 0;

    tracing::debug!("Receiver started (poll_interval={:?})", poll);

    while running.load(Ordering::Acquire) {
        let byte = source.read_byte();
        if let Some(result) = byte.and_then(|b| assembler.push(b)) {
            link.handle_packet(result);
        }

        let noise = assembler.noise_bytes();
        if noise != noise_seen {
            LinkStats::add(&link.stats.noise_bytes, noise - noise_seen);
            tracing::trace!(skipped = noise - noise_seen, "dropped bytes outside packets");
            noise_seen = noise;
        }

        if byte.is_none() {
            std::thread::sleep(poll);
        }
    }

    tracing::debug!("Receiver stopped");
}

impl Link {
    /// Handles one completed packet from the assembler.
    pub fn handle_packet(&self, result: Result<Vec<Message>, ProtocolError>) {
        match result {
            Ok(messages) => {
                LinkStats::incr(&self.stats.packets_received);
                tracing::debug!(messages = messages.len(), "packet received");
                for msg in messages {
                    self.dispatch(msg);
                }
            }
            Err(e @ ProtocolError::CrcMismatch { .. }) => {
                LinkStats::incr(&self.stats.crc_errors);
                tracing::debug!(error = %e, "packet discarded");
            }
            Err(e) => {
                LinkStats::incr(&self.stats.framing_errors);
                tracing::debug!(error = %e, "packet discarded");
            }
        }
    }

    /// Routes one inbound message.
    ///
    /// Every uplink type other than STALL, NODE_NEW and NODE_LOST is taken
    /// as the answer to the node's oldest outstanding request: it returns a
    /// credit and carries that request's action id. An unsolicited event
    /// from a node with requests in flight is therefore correlated with the
    /// wrong request and frees credit early.
    fn dispatch(&self, mut msg: Message) {
        let address = msg.address;
        LinkStats::incr(&self.stats.messages_received);

        if let SeqCheck::Gap { expected, actual } =
            self.table.observe_received_seq(address, msg.seq)
        {
            LinkStats::incr(&self.stats.sequence_gaps);
            tracing::debug!(%address, expected, actual, "inbound sequence gap");
        }

        match msg.msg_type {
            MessageType::STALL => {
                self.handle_stall(&msg);
                return;
            }
            MessageType::PKT_CAPACITY => {
                if let Some(&capacity) = msg.payload.first() {
                    let mut writer = self.outgoing.lock();
                    let drained = self.table.learn_capacity(address, capacity);
                    self.transmit_drained(&mut writer, address, drained);
                    tracing::debug!(%address, capacity, "packet capacity reported");
                }
            }
            MessageType::NODE_NEW | MessageType::NODE_LOST => {
                let version = msg.payload.first().copied().unwrap_or(0);
                let ack = Bytes::copy_from_slice(&[version]);
                if let Err(e) = self.send(address, MessageType::NODE_CHANGED_ACK, ack, None) {
                    tracing::warn!(%address, error = %e, "failed to acknowledge node change");
                }
                tracing::info!(%address, msg_type = %msg.msg_type, version, "node table changed");
            }
            _ => {}
        }

        if msg.msg_type.is_uplink() && !msg.msg_type.is_spontaneous() {
            let mut writer = self.outgoing.lock();
            let released = self.table.release_credit(address);
            msg.action_id = released.action_id;
            self.transmit_drained(&mut writer, address, released.drained);
        }

        if msg.msg_type.is_error() {
            tracing::debug!(%address, msg_type = %msg.msg_type, "error report received");
            self.errors().push(msg);
        } else {
            self.uplink().push(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::transport::memory::MemoryPort;
    use bidib_protocol::{crc8, encode_packet, escape, NodeAddress, MAGIC};

    const CMD: MessageType = MessageType::new(0x30);
    const ANSWER: MessageType = MessageType::new(0xB0);

    fn addr(s: &str) -> NodeAddress {
        s.parse().unwrap()
    }

    fn link(port: &MemoryPort, credit: u8) -> Link {
        let mut config = EngineConfig::default();
        config.flow_control.default_credit = credit;
        Link::new(config, Box::new(port.sink()))
    }

    fn receive(link: &Link, bytes: &[u8]) {
        let mut assembler = PacketAssembler::new();
        for result in assembler.push_slice(bytes) {
            link.handle_packet(result);
        }
    }

    fn uplink(address: &str, seq: u8, ty: MessageType, payload: &[u8]) -> Message {
        Message::new(addr(address), ty)
            .with_seq(seq)
            .with_payload(payload.to_vec())
    }

    fn written(port: &MemoryPort) -> Vec<Message> {
        PacketAssembler::new()
            .push_slice(&port.take_written().concat())
            .into_iter()
            .flat_map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_responses_release_pending_in_order() {
        let port = MemoryPort::new();
        let link = link(&port, 3);
        let node = addr("1");
        for id in 1..=6 {
            link.send(node, CMD, Bytes::new(), Some(id)).unwrap();
        }
        link.flush();
        let first: Vec<u8> = written(&port).iter().map(|m| m.seq).collect();
        assert_eq!(first, vec![1, 2, 3]);

        let answers: Vec<Message> = (1..=3).map(|s| uplink("1", s, ANSWER, &[])).collect();
        receive(&link, &encode_packet(&answers).unwrap());
        link.flush();

        let released = written(&port);
        let seqs: Vec<u8> = released.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![4, 5, 6]);
        let actions: Vec<_> = released.iter().map(|m| m.action_id).collect();
        // Action ids stay local and are not transmitted.
        assert_eq!(actions, vec![None, None, None]);

        let correlated: Vec<_> = link.uplink().drain().iter().map(|m| m.action_id).collect();
        assert_eq!(correlated, vec![Some(1), Some(2), Some(3)]);
        assert_eq!(link.table().pending_len(node), 0);
    }

    #[test]
    fn test_error_messages_use_error_queue() {
        let port = MemoryPort::new();
        let link = link(&port, 4);
        let packet = encode_packet(&[
            uplink("0", 1, MessageType::SYS_PONG, &[]),
            uplink("0", 2, MessageType::SYS_ERROR, &[0x01]),
        ])
        .unwrap();
        receive(&link, &packet);

        assert_eq!(link.uplink().pop().unwrap().msg_type, MessageType::SYS_PONG);
        assert_eq!(link.errors().pop().unwrap().msg_type, MessageType::SYS_ERROR);
    }

    #[test]
    fn test_stall_is_not_queued() {
        let port = MemoryPort::new();
        let link = link(&port, 4);
        receive(
            &link,
            &encode_packet(&[uplink("2", 1, MessageType::STALL, &[1])]).unwrap(),
        );
        assert!(link.uplink().is_empty());
        assert!(link.table().is_stalled(addr("2")));
        assert_eq!(
            link.send(addr("2.1"), CMD, Bytes::new(), None).unwrap(),
            crate::SendOutcome::Queued
        );
    }

    #[test]
    fn test_corrupted_packet_counted_and_dropped() {
        let port = MemoryPort::new();
        let link = link(&port, 4);
        let body = uplink("0", 1, MessageType::SYS_PONG, &[]).encode().unwrap();
        let mut stream = vec![MAGIC];
        stream.extend(escape(&body));
        stream.extend(escape(&[crc8(&body) ^ 0x80]));
        stream.push(MAGIC);
        stream.extend_from_slice(
            &encode_packet(&[uplink("0", 2, MessageType::SYS_PONG, &[])]).unwrap(),
        );
        receive(&link, &stream);

        assert_eq!(link.uplink().len(), 1);
        let snap = link.stats().snapshot();
        assert_eq!(snap.crc_errors, 1);
        assert_eq!(snap.packets_received, 1);
    }

    #[test]
    fn test_node_new_is_acknowledged() {
        let port = MemoryPort::new();
        let link = link(&port, 4);
        receive(
            &link,
            &encode_packet(&[uplink("0", 1, MessageType::NODE_NEW, &[0x07, 0x03])]).unwrap(),
        );
        link.flush();

        let sent = written(&port);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type, MessageType::NODE_CHANGED_ACK);
        assert_eq!(sent[0].payload.as_ref(), &[0x07]);
        assert_eq!(link.uplink().pop().unwrap().msg_type, MessageType::NODE_NEW);
    }

    #[test]
    fn test_capacity_report_raises_credit() {
        let port = MemoryPort::new();
        let link = link(&port, 1);
        let node = addr("5");
        link.send(node, CMD, Bytes::new(), None).unwrap();
        link.send(node, CMD, Bytes::new(), None).unwrap();
        assert_eq!(link.table().pending_len(node), 1);

        receive(
            &link,
            &encode_packet(&[uplink("5", 1, MessageType::PKT_CAPACITY, &[32])]).unwrap(),
        );
        // The report is a response too and releases the first request.
        let state = link.node_state(node).unwrap();
        assert_eq!(state.credit_capacity, 8);
        assert_eq!(state.pending, 0);
        assert_eq!(state.outstanding, 1);
    }

    #[test]
    fn test_noise_counted_on_busy_source() {
        let port = MemoryPort::new();
        let link = Arc::new(link(&port, 4));
        let running = Arc::new(AtomicBool::new(true));

        // The source never runs dry; it stops the loop on its last byte.
        let mut bytes = vec![0x11, 0x22, 0x33, 0x44].into_iter();
        let stop = running.clone();
        let source = move || {
            let byte = bytes.next();
            if bytes.len() == 0 {
                stop.store(false, Ordering::Release);
            }
            byte
        };
        run_receiver(link.clone(), Box::new(source), running);

        assert_eq!(link.stats().snapshot().noise_bytes, 4);
    }

    #[test]
    fn test_sequence_gap_counted() {
        let port = MemoryPort::new();
        let link = link(&port, 4);
        let packet = encode_packet(&[
            uplink("1", 1, MessageType::SYS_PONG, &[]),
            uplink("1", 4, MessageType::SYS_PONG, &[]),
        ])
        .unwrap();
        receive(&link, &packet);
        assert_eq!(link.stats().snapshot().sequence_gaps, 1);
    }
}
