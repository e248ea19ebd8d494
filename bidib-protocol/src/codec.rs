//! Byte stuffing and CRC-8 for the serial packet body.
//!
//! Every body byte equal to [`MAGIC`] or [`ESCAPE`] is sent as
//! `ESCAPE, byte ^ 0x20`. The checksum is CRC-8 Dallas/Maxim computed over the
//! raw (unescaped) body.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};
use crc::{Crc, Digest, CRC_8_MAXIM_DOW};

/// Packet delimiter.
pub const MAGIC: u8 = 0xFE;

/// Escape prefix.
pub const ESCAPE: u8 = 0xFD;

/// Value XOR-ed into an escaped byte.
pub const ESCAPE_XOR: u8 = 0x20;

static CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// Returns whether `byte` must be escaped inside a packet body.
#[inline]
pub fn needs_escape(byte: u8) -> bool {
    byte == MAGIC || byte == ESCAPE
}

/// Returns the escaped length of `bytes`.
pub fn escaped_len(bytes: &[u8]) -> usize {
    bytes.len() + bytes.iter().filter(|&&b| needs_escape(b)).count()
}

/// Escapes `bytes` into a new buffer.
pub fn escape(bytes: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(escaped_len(bytes));
    escape_into(bytes, &mut out);
    out.to_vec()
}

/// Escapes `bytes`, appending the result to `out`.
pub fn escape_into(bytes: &[u8], out: &mut BytesMut) {
    for &b in bytes {
        if needs_escape(b) {
            out.put_u8(ESCAPE);
            out.put_u8(b ^ ESCAPE_XOR);
        } else {
            out.put_u8(b);
        }
    }
}

/// Reverses [`escape`].
///
/// An escape byte followed by a raw magic byte, or ending the input, is a
/// framing error.
pub fn unescape(bytes: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter();
    while let Some(&b) = iter.next() {
        if b == ESCAPE {
            match iter.next() {
                Some(&MAGIC) | None => return Err(ProtocolError::BadEscape),
                Some(&next) => out.push(next ^ ESCAPE_XOR),
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

/// CRC-8 (Dallas/Maxim) of `bytes`.
pub fn crc8(bytes: &[u8]) -> u8 {
    CRC8.checksum(bytes)
}

/// Running CRC-8 over a packet body that is appended piecewise.
pub struct Crc8 {
    digest: Digest<'static, u8>,
}

impl Crc8 {
    pub fn new() -> Self {
        Self {
            digest: CRC8.digest(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }

    /// Returns the checksum of everything fed so far and starts over.
    pub fn take(&mut self) -> u8 {
        std::mem::replace(&mut self.digest, CRC8.digest()).finalize()
    }
}

impl Default for Crc8 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Crc8 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc8").finish_non_exhaustive()
    }
}
