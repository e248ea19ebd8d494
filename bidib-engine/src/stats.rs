//! Link statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the send path, the packet buffer and the receiver.
#[derive(Debug, Default)]
pub struct LinkStats {
    pub(crate) packets_written: AtomicU64,
    pub(crate) bytes_written: AtomicU64,
    pub(crate) write_errors: AtomicU64,
    pub(crate) messages_sent: AtomicU64,
    pub(crate) messages_queued: AtomicU64,
    pub(crate) packets_received: AtomicU64,
    pub(crate) messages_received: AtomicU64,
    pub(crate) crc_errors: AtomicU64,
    pub(crate) framing_errors: AtomicU64,
    pub(crate) noise_bytes: AtomicU64,
    pub(crate) sequence_gaps: AtomicU64,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            packets_written: self.packets_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            crc_errors: self.crc_errors.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            noise_bytes: self.noise_bytes.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`LinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatsSnapshot {
    /// Packets handed to the sink successfully.
    pub packets_written: u64,
    /// Bytes handed to the sink successfully.
    pub bytes_written: u64,
    /// Sink writes that failed; the packet is lost.
    pub write_errors: u64,
    /// Messages appended to an outgoing packet.
    pub messages_sent: u64,
    /// Messages held back by flow control or a stall.
    pub messages_queued: u64,
    /// Packets received with a valid checksum.
    pub packets_received: u64,
    /// Messages decoded from valid packets.
    pub messages_received: u64,
    /// Packets dropped for a checksum mismatch.
    pub crc_errors: u64,
    /// Packets dropped for any other framing problem.
    pub framing_errors: u64,
    /// Bytes skipped while waiting for a packet start.
    pub noise_bytes: u64,
    /// Inbound messages whose sequence number skipped ahead.
    pub sequence_gaps: u64,
}
