//! Packet framing and the receive-side assembler.
//!
//! Packet layout (every byte between the two magics is escaped):
//!
//! ```text
//! +-------+-------------------------------+------+-------+
//! | MAGIC | message | message | ...       | CRC8 | MAGIC |
//! +-------+-------------------------------+------+-------+
//! ```
//!
//! The CRC covers the unescaped messages, length bytes included.

use crate::codec::{crc8, escape_into, ESCAPE, ESCAPE_XOR, MAGIC};
use crate::error::ProtocolError;
use crate::message::{decode_messages, Message};
use bytes::{BufMut, BytesMut};

/// Upper bound on an unescaped packet body held by the assembler.
pub const MAX_PACKET_BODY: usize = 512;

/// Encodes `messages` into one complete framed packet.
pub fn encode_packet(messages: &[Message]) -> Result<BytesMut, ProtocolError> {
    let mut body = BytesMut::new();
    for msg in messages {
        msg.encode_into(&mut body)?;
    }
    let crc = crc8(&body);

    let mut out = BytesMut::with_capacity(body.len() * 2 + 4);
    out.put_u8(MAGIC);
    escape_into(&body, &mut out);
    escape_into(&[crc], &mut out);
    out.put_u8(MAGIC);
    Ok(out)
}

/// Validates the trailing CRC of an unescaped packet body and splits the
/// rest into messages.
pub fn decode_packet_body(body: &[u8]) -> Result<Vec<Message>, ProtocolError> {
    let (&expected, messages) = body.split_last().ok_or(ProtocolError::Truncated {
        needed: 1,
        available: 0,
    })?;
    let actual = crc8(messages);
    if actual != expected {
        return Err(ProtocolError::CrcMismatch { expected, actual });
    }
    decode_messages(messages)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblerState {
    /// Outside any packet; waiting for a magic byte.
    AwaitingMagic,
    /// Collecting unescaped body bytes.
    InPacket,
    /// The previous byte was an escape.
    Escaped,
}

/// Reassembles packets from a raw byte stream, one byte at a time.
///
/// A magic byte closes the packet collected so far and opens the next one, so
/// packets may share delimiters and a magic with nothing collected before it
/// is ignored. Damaged packets are reported as errors and dropped whole.
#[derive(Debug)]
pub struct PacketAssembler {
    state: AssemblerState,
    body: Vec<u8>,
    noise: u64,
}

impl PacketAssembler {
    pub fn new() -> Self {
        Self {
            state: AssemblerState::AwaitingMagic,
            body: Vec::with_capacity(MAX_PACKET_BODY),
            noise: 0,
        }
    }

    /// Feeds one byte.
    ///
    /// Returns `Some` when the byte completed a packet: the decoded messages in
    /// order, or the reason the packet was discarded.
    pub fn push(&mut self, byte: u8) -> Option<Result<Vec<Message>, ProtocolError>> {
        match self.state {
            AssemblerState::AwaitingMagic => {
                if byte == MAGIC {
                    self.body.clear();
                    self.state = AssemblerState::InPacket;
                } else {
                    self.noise += 1;
                }
                None
            }
            AssemblerState::Escaped => {
                if byte == MAGIC {
                    // The magic still opens a new packet.
                    self.body.clear();
                    self.state = AssemblerState::InPacket;
                    return Some(Err(ProtocolError::BadEscape));
                }
                self.state = AssemblerState::InPacket;
                self.accept(byte ^ ESCAPE_XOR)
            }
            AssemblerState::InPacket => match byte {
                MAGIC if self.body.is_empty() => None,
                MAGIC => {
                    let result = decode_packet_body(&self.body);
                    self.body.clear();
                    Some(result)
                }
                ESCAPE => {
                    self.state = AssemblerState::Escaped;
                    None
                }
                _ => self.accept(byte),
            },
        }
    }

    /// Feeds a slice, collecting every completed packet.
    pub fn push_slice(&mut self, bytes: &[u8]) -> Vec<Result<Vec<Message>, ProtocolError>> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    fn accept(&mut self, byte: u8) -> Option<Result<Vec<Message>, ProtocolError>> {
        if self.body.len() >= MAX_PACKET_BODY {
            self.body.clear();
            self.state = AssemblerState::AwaitingMagic;
            return Some(Err(ProtocolError::Overflow {
                max: MAX_PACKET_BODY,
            }));
        }
        self.body.push(byte);
        None
    }

    /// Drops any partial packet and waits for the next magic byte.
    pub fn reset(&mut self) {
        self.body.clear();
        self.state = AssemblerState::AwaitingMagic;
    }

    /// Number of bytes dropped while waiting for a magic byte.
    pub fn noise_bytes(&self) -> u64 {
        self.noise
    }

    /// Whether no partial packet is buffered.
    pub fn is_idle(&self) -> bool {
        self.body.is_empty() && self.state != AssemblerState::Escaped
    }
}

impl Default for PacketAssembler {
    fn default() -> Self {
        Self::new()
    }
}
