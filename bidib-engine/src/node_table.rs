//! Per-node transmission state: sequence counters, credit, stall flags and
//! pending queues.
//!
//! One mutex guards the whole table. Records are created on first use and
//! live until [`NodeTable::reset`].

use bidib_protocol::{ActionId, Message, MessageType, NodeAddress};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Smallest encoded message, used to turn a reported byte capacity into a
/// message credit.
const MIN_MESSAGE_BYTES: u8 = 4;

/// A message held back by flow control. Its sequence number is assigned when
/// it is finally transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub msg_type: MessageType,
    pub payload: Bytes,
    pub action_id: Option<ActionId>,
}

impl PendingMessage {
    pub fn new(msg_type: MessageType, payload: Bytes, action_id: Option<ActionId>) -> Self {
        Self {
            msg_type,
            payload,
            action_id,
        }
    }

    pub fn consumes_credit(&self) -> bool {
        self.msg_type.expects_response()
    }

    pub fn into_message(self, address: NodeAddress, seq: u8) -> Message {
        Message {
            address,
            seq,
            msg_type: self.msg_type,
            payload: self.payload,
            action_id: self.action_id,
        }
    }
}

/// A transmitted message still waiting for its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outstanding {
    pub seq: u8,
    pub msg_type: MessageType,
    pub action_id: Option<ActionId>,
}

#[derive(Debug)]
struct NodeRecord {
    last_seq: u8,
    credit_capacity: u8,
    /// Credit taken by transmitted requests. An unstall drain may push this
    /// past `credit_capacity`; the node then gets nothing new until enough
    /// answers bring it back under.
    credit_in_use: usize,
    stalled: bool,
    pending: VecDeque<PendingMessage>,
    outstanding: VecDeque<Outstanding>,
    last_received_seq: Option<u8>,
}

impl NodeRecord {
    fn new(credit: u8, stalled: bool) -> Self {
        Self {
            last_seq: 0,
            credit_capacity: credit,
            credit_in_use: 0,
            stalled,
            pending: VecDeque::new(),
            outstanding: VecDeque::new(),
            last_received_seq: None,
        }
    }

    fn credit_available(&self) -> u8 {
        let in_use = u8::try_from(self.credit_in_use).unwrap_or(u8::MAX);
        self.credit_capacity.saturating_sub(in_use)
    }

    /// Pops pending messages in order while the node may take them.
    fn drain_ready(&mut self) -> Vec<PendingMessage> {
        let mut drained = Vec::new();
        while !self.stalled {
            let Some(front) = self.pending.front() else {
                break;
            };
            if front.consumes_credit() {
                if self.credit_available() == 0 {
                    break;
                }
                self.credit_in_use += 1;
            }
            if let Some(msg) = self.pending.pop_front() {
                drained.push(msg);
            }
        }
        drained
    }
}

/// Result of [`NodeTable::release_credit`].
#[derive(Debug, Default)]
pub struct Released {
    /// Correlation token of the request the response answered.
    pub action_id: Option<ActionId>,
    /// Pending messages that may now be transmitted, in order.
    pub drained: Vec<PendingMessage>,
}

/// Outcome of checking an inbound sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// First sequenced message seen from the node.
    First,
    InOrder,
    /// The node sent sequence 0 and restarts counting.
    Reset,
    /// Messages were lost between the previous and this one.
    Gap { expected: u8, actual: u8 },
}

/// Snapshot of one node's transmission state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub address: NodeAddress,
    pub last_seq: u8,
    pub credit_capacity: u8,
    pub credit_available: u8,
    pub stalled: bool,
    pub pending: usize,
    pub outstanding: usize,
}

/// Shared node transmission table.
pub struct NodeTable {
    records: Mutex<HashMap<NodeAddress, NodeRecord>>,
    default_credit: u8,
    honor_reported_capacity: bool,
}

impl NodeTable {
    pub fn new(default_credit: u8, honor_reported_capacity: bool) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            default_credit: default_credit.max(1),
            honor_reported_capacity,
        }
    }

    pub fn default_credit(&self) -> u8 {
        self.default_credit
    }

    /// Returns the record for `addr`, creating it on first use. A new record
    /// starts stalled when a known ancestor is stalled.
    fn record<'a>(
        records: &'a mut HashMap<NodeAddress, NodeRecord>,
        addr: NodeAddress,
        credit: u8,
    ) -> &'a mut NodeRecord {
        let inherited = !records.contains_key(&addr)
            && records
                .iter()
                .any(|(known, rec)| rec.stalled && known.is_ancestor_of(&addr));
        records
            .entry(addr)
            .or_insert_with(|| NodeRecord::new(credit, inherited))
    }

    /// Issues the next sequence number for `addr`: 1, 2, ..., 255, 1, ...
    pub fn next_sequence(&self, addr: NodeAddress) -> u8 {
        let mut records = self.records.lock();
        let rec = Self::record(&mut records, addr, self.default_credit);
        rec.last_seq = if rec.last_seq == u8::MAX {
            1
        } else {
            rec.last_seq + 1
        };
        rec.last_seq
    }

    /// Takes one unit of credit if the node is not stalled, has nothing
    /// pending and has credit left.
    pub fn try_reserve_credit(&self, addr: NodeAddress) -> bool {
        self.admit(addr, true)
    }

    /// Decides whether a message may be transmitted now. Messages that do not
    /// consume credit are still held back by a stall or by older pending
    /// messages, so per-node order is kept.
    pub fn admit(&self, addr: NodeAddress, consumes_credit: bool) -> bool {
        let mut records = self.records.lock();
        let rec = Self::record(&mut records, addr, self.default_credit);
        if rec.stalled || !rec.pending.is_empty() {
            return false;
        }
        if consumes_credit {
            if rec.credit_available() == 0 {
                return false;
            }
            rec.credit_in_use += 1;
        }
        true
    }

    pub fn enqueue_pending(&self, addr: NodeAddress, msg: PendingMessage) {
        let mut records = self.records.lock();
        Self::record(&mut records, addr, self.default_credit)
            .pending
            .push_back(msg);
    }

    pub fn record_outstanding(
        &self,
        addr: NodeAddress,
        seq: u8,
        msg_type: MessageType,
        action_id: Option<ActionId>,
    ) {
        let mut records = self.records.lock();
        Self::record(&mut records, addr, self.default_credit)
            .outstanding
            .push_back(Outstanding {
                seq,
                msg_type,
                action_id,
            });
    }

    /// Returns one unit of credit after a response from `addr` and hands
    /// back the pending messages that may be transmitted now.
    pub fn release_credit(&self, addr: NodeAddress) -> Released {
        let mut records = self.records.lock();
        let rec = Self::record(&mut records, addr, self.default_credit);
        let action_id = rec.outstanding.pop_front().and_then(|o| o.action_id);
        rec.credit_in_use = rec.credit_in_use.saturating_sub(1);
        Released {
            action_id,
            drained: rec.drain_ready(),
        }
    }

    /// Sets or clears the stall flag on `addr` and every known descendant.
    ///
    /// Clearing returns every pending message of the subtree, ignoring
    /// credit, ordered by address and FIFO within a node. The drained
    /// requests still count against each node's credit.
    pub fn set_stall(&self, addr: NodeAddress, stalled: bool) -> Vec<(NodeAddress, PendingMessage)> {
        let mut records = self.records.lock();
        Self::record(&mut records, addr, self.default_credit);

        let mut subtree: Vec<NodeAddress> = records
            .keys()
            .filter(|known| addr.is_prefix_of(known))
            .copied()
            .collect();
        subtree.sort();

        let mut drained = Vec::new();
        for node in subtree {
            let Some(rec) = records.get_mut(&node) else {
                continue;
            };
            rec.stalled = stalled;
            if stalled {
                continue;
            }
            for msg in rec.pending.drain(..) {
                if msg.consumes_credit() {
                    rec.credit_in_use += 1;
                }
                drained.push((node, msg));
            }
        }
        drained
    }

    /// Tracks the sequence number of an inbound message from `addr`.
    pub fn observe_received_seq(&self, addr: NodeAddress, seq: u8) -> SeqCheck {
        let mut records = self.records.lock();
        let rec = Self::record(&mut records, addr, self.default_credit);
        if seq == 0 {
            rec.last_received_seq = None;
            return SeqCheck::Reset;
        }
        let check = match rec.last_received_seq {
            None => SeqCheck::First,
            Some(last) => {
                let expected = if last == u8::MAX { 1 } else { last + 1 };
                if seq == expected {
                    SeqCheck::InOrder
                } else {
                    SeqCheck::Gap {
                        expected,
                        actual: seq,
                    }
                }
            }
        };
        rec.last_received_seq = Some(seq);
        check
    }

    /// Adopts the packet capacity a node reported, in bytes.
    ///
    /// Returns the pending messages the new credit admits. A report of 0, or
    /// any report while reported capacities are ignored, keeps the current
    /// credit.
    pub fn learn_capacity(&self, addr: NodeAddress, reported_bytes: u8) -> Vec<PendingMessage> {
        if !self.honor_reported_capacity || reported_bytes == 0 {
            return Vec::new();
        }
        let capacity = (reported_bytes / MIN_MESSAGE_BYTES).max(1);

        let mut records = self.records.lock();
        let rec = Self::record(&mut records, addr, self.default_credit);
        rec.credit_capacity = capacity;
        rec.drain_ready()
    }

    pub fn is_stalled(&self, addr: NodeAddress) -> bool {
        self.records
            .lock()
            .get(&addr)
            .map(|rec| rec.stalled)
            .unwrap_or(false)
    }

    pub fn pending_len(&self, addr: NodeAddress) -> usize {
        self.records
            .lock()
            .get(&addr)
            .map(|rec| rec.pending.len())
            .unwrap_or(0)
    }

    pub fn credit_available(&self, addr: NodeAddress) -> Option<u8> {
        self.records
            .lock()
            .get(&addr)
            .map(|rec| rec.credit_available())
    }

    pub fn state(&self, addr: NodeAddress) -> Option<NodeState> {
        self.records.lock().get(&addr).map(|rec| NodeState {
            address: addr,
            last_seq: rec.last_seq,
            credit_capacity: rec.credit_capacity,
            credit_available: rec.credit_available(),
            stalled: rec.stalled,
            pending: rec.pending.len(),
            outstanding: rec.outstanding.len(),
        })
    }

    /// Addresses with a record, sorted.
    pub fn known_nodes(&self) -> Vec<NodeAddress> {
        let mut nodes: Vec<_> = self.records.lock().keys().copied().collect();
        nodes.sort();
        nodes
    }

    /// Total number of pending messages across all nodes.
    pub fn total_pending(&self) -> usize {
        self.records.lock().values().map(|rec| rec.pending.len()).sum()
    }

    /// Drops every record.
    pub fn reset(&self) {
        self.records.lock().clear();
    }
}
