//! Stall signalling from the far end.

use crate::link::Link;
use bidib_protocol::Message;

impl Link {
    /// Applies an inbound STALL message: a non-zero first payload byte stalls
    /// the node and its subtree, zero (or no payload) releases it and sends
    /// everything that queued up meanwhile.
    pub(crate) fn handle_stall(&self, msg: &Message) {
        let address = msg.address;
        let stalled = msg.payload.first().is_some_and(|&b| b != 0);

        if stalled {
            self.table.set_stall(address, true);
            tracing::warn!(%address, "node stalled");
            return;
        }

        let mut writer = self.outgoing.lock();
        let drained = self.table.set_stall(address, false);
        tracing::info!(%address, released = drained.len(), "node unstalled");
        for (node, pending) in drained {
            self.transmit(&mut writer, node, pending);
        }
        writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::link::Link;
    use crate::transport::memory::MemoryPort;
    use crate::SendOutcome;
    use bidib_protocol::{encode_packet, Message, MessageType, NodeAddress, PacketAssembler};
    use bytes::Bytes;

    const CMD: MessageType = MessageType::new(0x30);

    fn addr(s: &str) -> NodeAddress {
        s.parse().unwrap()
    }

    fn stall(address: &str, on: bool) -> Message {
        Message::new(addr(address), MessageType::STALL).with_payload(vec![on as u8])
    }

    #[test]
    fn test_stall_then_unstall_flushes_subtree() {
        let port = MemoryPort::new();
        let link = Link::new(EngineConfig::default(), Box::new(port.sink()));

        link.handle_stall(&stall("1", true));
        assert!(link.table().is_stalled(addr("1")));
        link.send(addr("1"), CMD, Bytes::new(), Some(1)).unwrap();
        link.send(addr("1.4"), CMD, Bytes::new(), Some(2)).unwrap();
        link.send(addr("2"), CMD, Bytes::new(), Some(3)).unwrap();
        assert_eq!(link.table().total_pending(), 2);

        link.handle_stall(&stall("1", false));
        // The unstall wrote the buffered message to node 2 along with the
        // released ones.
        let packets = port.written();
        assert_eq!(packets.len(), 1);
        let messages: Vec<_> = PacketAssembler::new()
            .push_slice(&packets[0])
            .into_iter()
            .flat_map(|r| r.unwrap())
            .map(|m| m.address.to_string())
            .collect();
        assert_eq!(messages, vec!["2", "1", "1.4"]);
        assert!(!link.table().is_stalled(addr("1.4")));
    }

    #[test]
    fn test_unstall_drain_counts_against_credit() {
        let port = MemoryPort::new();
        let mut config = EngineConfig::default();
        config.flow_control.default_credit = 2;
        let link = Link::new(config, Box::new(port.sink()));
        let node = addr("1");

        for id in 1..=2 {
            link.send(node, CMD, Bytes::new(), Some(id)).unwrap();
        }
        link.handle_stall(&stall("1", true));
        for id in 3..=5 {
            assert_eq!(
                link.send(node, CMD, Bytes::new(), Some(id)).unwrap(),
                SendOutcome::Queued
            );
        }
        link.handle_stall(&stall("1", false));
        assert_eq!(link.node_state(node).unwrap().outstanding, 5);

        let answers: Vec<Message> = (1..=2)
            .map(|seq| Message::new(node, MessageType::new(0xB0)).with_seq(seq))
            .collect();
        for result in PacketAssembler::new().push_slice(&encode_packet(&answers).unwrap()) {
            link.handle_packet(result);
        }

        let state = link.node_state(node).unwrap();
        assert_eq!(state.outstanding, 3);
        assert_eq!(state.credit_available, 0);
        assert_eq!(
            link.send(node, CMD, Bytes::new(), Some(6)).unwrap(),
            SendOutcome::Queued
        );
        assert!(link.node_state(node).unwrap().outstanding <= 3);
    }

    #[test]
    fn test_stall_without_payload_releases() {
        let port = MemoryPort::new();
        let link = Link::new(EngineConfig::default(), Box::new(port.sink()));
        link.handle_stall(&stall("3", true));
        link.handle_stall(&Message::new(addr("3"), MessageType::STALL));
        assert!(!link.table().is_stalled(addr("3")));
    }
}
