//! Queues of decoded inbound messages.

use bidib_protocol::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Thread-safe FIFO of inbound messages, consumed by polling.
#[derive(Debug, Default)]
pub struct UplinkQueue {
    messages: Mutex<VecDeque<Message>>,
}

impl UplinkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, msg: Message) {
        self.messages.lock().push_back(msg);
    }

    /// Removes the oldest message, if any. Never blocks on an empty queue.
    pub fn pop(&self) -> Option<Message> {
        self.messages.lock().pop_front()
    }

    /// Removes the oldest message matching `pred`, leaving the rest in order.
    pub fn pop_matching(&self, pred: impl Fn(&Message) -> bool) -> Option<Message> {
        let mut messages = self.messages.lock();
        let index = messages.iter().position(pred)?;
        messages.remove(index)
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Removes and returns all queued messages in arrival order.
    pub fn drain(&self) -> Vec<Message> {
        self.messages.lock().drain(..).collect()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidib_protocol::{MessageType, NodeAddress};

    fn msg(seq: u8, ty: MessageType) -> Message {
        Message::new(NodeAddress::ROOT, ty).with_seq(seq)
    }

    #[test]
    fn test_fifo() {
        let queue = UplinkQueue::new();
        assert!(queue.pop().is_none());
        queue.push(msg(1, MessageType::SYS_PONG));
        queue.push(msg(2, MessageType::SYS_PONG));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().seq, 1);
        assert_eq!(queue.pop().unwrap().seq, 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_matching_keeps_order() {
        let queue = UplinkQueue::new();
        queue.push(msg(1, MessageType::SYS_PONG));
        queue.push(msg(2, MessageType::SYS_MAGIC));
        queue.push(msg(3, MessageType::SYS_PONG));

        let magic = queue.pop_matching(|m| m.msg_type == MessageType::SYS_MAGIC);
        assert_eq!(magic.unwrap().seq, 2);
        assert!(queue
            .pop_matching(|m| m.msg_type == MessageType::STALL)
            .is_none());

        let rest: Vec<u8> = queue.drain().iter().map(|m| m.seq).collect();
        assert_eq!(rest, vec![1, 3]);
    }
}
