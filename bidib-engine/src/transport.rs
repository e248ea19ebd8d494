//! Raw byte source and sink abstractions.
//!
//! The engine never opens a device itself. The transport layer hands it a
//! [`ByteSource`] for the receiver thread and a [`ByteSink`] the outgoing
//! packet buffer writes whole packets to.

use std::io::{self, Read, Write};

/// Byte-at-a-time input.
///
/// `read_byte` must return within a bounded time: `None` means no byte is
/// available right now and the receiver will retry after a short sleep.
pub trait ByteSource: Send {
    fn read_byte(&mut self) -> Option<u8>;
}

/// Packet output. Each call carries one complete framed packet.
pub trait ByteSink: Send {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<F> ByteSource for F
where
    F: FnMut() -> Option<u8> + Send,
{
    fn read_byte(&mut self) -> Option<u8> {
        self()
    }
}

impl<F> ByteSink for F
where
    F: FnMut(&[u8]) -> io::Result<()> + Send,
{
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self(bytes)
    }
}

/// Adapts a read function returning `(byte, valid)`.
pub struct FlaggedSource<F>(pub F);

impl<F> ByteSource for FlaggedSource<F>
where
    F: FnMut() -> (u8, bool) + Send,
{
    fn read_byte(&mut self) -> Option<u8> {
        let (byte, valid) = (self.0)();
        valid.then_some(byte)
    }
}

/// Reads from any [`Read`] implementation, e.g. a serial port opened with a
/// read timeout.
pub struct IoSource<R> {
    reader: R,
}

impl<R: Read + Send> IoSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read + Send> ByteSource for IoSource<R> {
    fn read_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            Ok(_) => None,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "read from byte source failed");
                None
            }
        }
    }
}

/// Writes to any [`Write`] implementation, flushing after every packet.
pub struct IoSink<W> {
    writer: W,
}

impl<W: Write + Send> IoSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ByteSink for IoSink<W> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }
}

/// In-memory port for tests, benchmarks and offline tools.
pub mod memory {
    use super::{ByteSink, ByteSource};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Shared {
        inbound: Mutex<VecDeque<u8>>,
        written: Mutex<Vec<Vec<u8>>>,
        fail_writes: AtomicBool,
    }

    /// Both ends of a simulated serial line.
    ///
    /// Bytes passed to [`MemoryPort::inject`] are delivered by the source;
    /// every packet written to the sink is recorded.
    #[derive(Clone, Default)]
    pub struct MemoryPort {
        shared: Arc<Shared>,
    }

    impl MemoryPort {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn source(&self) -> MemorySource {
            MemorySource {
                shared: self.shared.clone(),
            }
        }

        pub fn sink(&self) -> MemorySink {
            MemorySink {
                shared: self.shared.clone(),
            }
        }

        /// Queues bytes for the source to deliver.
        pub fn inject(&self, bytes: &[u8]) {
            self.shared.inbound.lock().extend(bytes.iter().copied());
        }

        /// Bytes injected but not yet read.
        pub fn inbound_len(&self) -> usize {
            self.shared.inbound.lock().len()
        }

        /// Packets written so far, one entry per sink write.
        pub fn written(&self) -> Vec<Vec<u8>> {
            self.shared.written.lock().clone()
        }

        /// Removes and returns the packets written so far.
        pub fn take_written(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut *self.shared.written.lock())
        }

        /// All written bytes concatenated.
        pub fn written_bytes(&self) -> Vec<u8> {
            self.shared.written.lock().concat()
        }

        /// Makes every following sink write fail with `BrokenPipe`.
        pub fn set_fail_writes(&self, fail: bool) {
            self.shared.fail_writes.store(fail, Ordering::Relaxed);
        }
    }

    pub struct MemorySource {
        shared: Arc<Shared>,
    }

    impl ByteSource for MemorySource {
        fn read_byte(&mut self) -> Option<u8> {
            self.shared.inbound.lock().pop_front()
        }
    }

    pub struct MemorySink {
        shared: Arc<Shared>,
    }

    impl ByteSink for MemorySink {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.shared.fail_writes.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "port closed"));
            }
            self.shared.written.lock().push(bytes.to_vec());
            Ok(())
        }
    }
}
