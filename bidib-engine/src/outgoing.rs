//! Outgoing packet buffer.
//!
//! Messages are escaped into one shared buffer until the packet is flushed
//! explicitly, by the flush thread, or because the next message would push
//! the framed packet past the size limit. The sink is only ever written
//! while the buffer lock is held, so packets never interleave.

use crate::stats::LinkStats;
use crate::transport::ByteSink;
use bidib_protocol::{escape_into, escaped_len, Crc8, MAGIC};
use bytes::{BufMut, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Worst-case bytes after the last message: escaped CRC and closing magic.
pub const PACKET_TRAILER_MAX: usize = 3;

/// Worst-case framed size of a packet holding only `raw_body`.
pub fn framed_len(raw_body: &[u8]) -> usize {
    1 + escaped_len(raw_body) + PACKET_TRAILER_MAX
}

/// The packet under construction plus the sink it is written to.
pub struct PacketWriter {
    buf: BytesMut,
    crc: Crc8,
    messages: usize,
    max_packet_size: usize,
    sink: Box<dyn ByteSink>,
    stats: Arc<LinkStats>,
}

impl PacketWriter {
    fn new(sink: Box<dyn ByteSink>, max_packet_size: usize, stats: Arc<LinkStats>) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_packet_size),
            crc: Crc8::new(),
            messages: 0,
            max_packet_size,
            sink,
            stats,
        }
    }

    /// Appends one unescaped message (length byte first).
    ///
    /// Closes and writes the current packet first if the message would not
    /// fit behind it.
    pub fn append(&mut self, raw_body: &[u8]) {
        let needed = escaped_len(raw_body);
        if self.messages > 0 && self.buf.len() + needed + PACKET_TRAILER_MAX > self.max_packet_size
        {
            tracing::trace!(
                buffered = self.buf.len(),
                needed,
                "packet full, flushing before append"
            );
            self.flush();
        }
        if self.buf.is_empty() {
            self.buf.put_u8(MAGIC);
        }
        escape_into(raw_body, &mut self.buf);
        self.crc.update(raw_body);
        self.messages += 1;
        LinkStats::incr(&self.stats.messages_sent);
    }

    /// Closes the current packet and writes it to the sink. Does nothing when
    /// no message is buffered.
    pub fn flush(&mut self) {
        if self.messages == 0 {
            return;
        }
        let crc = self.crc.take();
        escape_into(&[crc], &mut self.buf);
        self.buf.put_u8(MAGIC);

        match self.sink.write_all(&self.buf) {
            Ok(()) => {
                LinkStats::incr(&self.stats.packets_written);
                LinkStats::add(&self.stats.bytes_written, self.buf.len() as u64);
                tracing::debug!(
                    messages = self.messages,
                    bytes = self.buf.len(),
                    "packet written"
                );
            }
            Err(e) => {
                LinkStats::incr(&self.stats.write_errors);
                tracing::warn!(
                    error = %e,
                    messages = self.messages,
                    "failed to write packet, dropped"
                );
            }
        }
        self.buf.clear();
        self.messages = 0;
    }

    /// Messages in the packet under construction.
    pub fn buffered_messages(&self) -> usize {
        self.messages
    }

    /// Framed bytes buffered so far, leading magic included.
    pub fn buffered_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Drops the packet under construction without writing it.
    fn discard(&mut self) {
        self.buf.clear();
        self.crc = Crc8::new();
        self.messages = 0;
    }
}

/// Mutex-guarded [`PacketWriter`].
pub struct OutgoingPacketBuffer {
    inner: Mutex<PacketWriter>,
}

impl OutgoingPacketBuffer {
    pub fn new(sink: Box<dyn ByteSink>, max_packet_size: usize, stats: Arc<LinkStats>) -> Self {
        Self {
            inner: Mutex::new(PacketWriter::new(sink, max_packet_size, stats)),
        }
    }

    /// Locks the buffer. Callers that also need the node table must take this
    /// lock first.
    pub fn lock(&self) -> MutexGuard<'_, PacketWriter> {
        self.inner.lock()
    }

    pub fn append(&self, raw_body: &[u8]) {
        self.inner.lock().append(raw_body);
    }

    pub fn flush(&self) {
        self.inner.lock().flush();
    }

    pub fn discard(&self) {
        self.inner.lock().discard();
    }
}
