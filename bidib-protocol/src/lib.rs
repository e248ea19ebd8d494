//! # bidib-protocol
//!
//! Wire protocol for the BiDiB serial link.
//!
//! This crate provides:
//! - Byte stuffing and CRC-8 for packet bodies
//! - Hierarchical node addresses and their address-stack encoding
//! - Message types and the per-message layout
//! - Packet encoding and a byte-at-a-time receive assembler

pub mod address;
pub mod codec;
pub mod error;
pub mod message;
pub mod packet;

pub use address::{NodeAddress, MAX_ADDRESS_DEPTH};
pub use codec::{crc8, escape, escape_into, escaped_len, unescape, Crc8, ESCAPE, MAGIC};
pub use error::ProtocolError;
pub use message::{
    decode_messages, ActionId, Message, MessageType, MAX_MESSAGE_LENGTH, NO_SEQUENCE,
};
pub use packet::{decode_packet_body, encode_packet, PacketAssembler, MAX_PACKET_BODY};

/// Smallest framed packet: magic, one root message, CRC, magic.
pub const MIN_PACKET_SIZE: usize = 1 + 4 + 1 + 1;

/// Largest packet the serial link allows.
pub const MAX_PACKET_SIZE: usize = 256;
