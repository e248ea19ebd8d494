//! Message types and the per-message wire layout.
//!
//! ```text
//! +-----+-----------------+-----+------+-----------+
//! | LEN | ADDR... | 0x00  | SEQ | TYPE | PAYLOAD   |
//! +-----+-----------------+-----+------+-----------+
//! ```
//!
//! `LEN` counts every byte after itself.

use crate::address::NodeAddress;
use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest value allowed in a message length byte.
pub const MAX_MESSAGE_LENGTH: usize = 127;

/// Sequence number marking an unsequenced message.
pub const NO_SEQUENCE: u8 = 0;

/// Caller-supplied correlation token. Never transmitted.
pub type ActionId = u32;

/// One-byte message type.
///
/// Types below `0x80` travel host to node (downlink), the rest node to host
/// (uplink).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(u8);

impl MessageType {
    // Downlink system messages
    pub const SYS_GET_MAGIC: Self = Self(0x01);
    pub const SYS_GET_P_VERSION: Self = Self(0x02);
    pub const SYS_ENABLE: Self = Self(0x03);
    pub const SYS_DISABLE: Self = Self(0x04);
    pub const SYS_GET_UNIQUE_ID: Self = Self(0x05);
    pub const SYS_GET_SW_VERSION: Self = Self(0x06);
    pub const SYS_PING: Self = Self(0x07);
    pub const SYS_IDENTIFY: Self = Self(0x08);
    pub const SYS_RESET: Self = Self(0x09);
    pub const GET_PKT_CAPACITY: Self = Self(0x0A);
    pub const NODETAB_GETALL: Self = Self(0x0B);
    pub const NODETAB_GETNEXT: Self = Self(0x0C);
    pub const NODE_CHANGED_ACK: Self = Self(0x0D);
    pub const SYS_GET_ERROR: Self = Self(0x0E);

    // Uplink system messages
    pub const SYS_MAGIC: Self = Self(0x81);
    pub const SYS_PONG: Self = Self(0x82);
    pub const SYS_P_VERSION: Self = Self(0x83);
    pub const SYS_UNIQUE_ID: Self = Self(0x84);
    pub const SYS_SW_VERSION: Self = Self(0x85);
    pub const SYS_ERROR: Self = Self(0x86);
    pub const SYS_IDENTIFY_STATE: Self = Self(0x87);
    pub const NODETAB_COUNT: Self = Self(0x88);
    pub const NODETAB: Self = Self(0x89);
    pub const PKT_CAPACITY: Self = Self(0x8A);
    pub const NODE_NA: Self = Self(0x8B);
    pub const NODE_LOST: Self = Self(0x8C);
    pub const NODE_NEW: Self = Self(0x8D);
    pub const STALL: Self = Self(0x8E);

    const UPLINK_BIT: u8 = 0x80;

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub fn is_downlink(self) -> bool {
        self.0 & Self::UPLINK_BIT == 0
    }

    pub fn is_uplink(self) -> bool {
        !self.is_downlink()
    }

    /// Whether a downlink message of this type is answered by the node and
    /// therefore occupies one unit of the node's credit until then.
    pub fn expects_response(self) -> bool {
        self.is_downlink()
            && !matches!(
                self,
                Self::SYS_ENABLE | Self::SYS_DISABLE | Self::SYS_RESET | Self::NODE_CHANGED_ACK
            )
    }

    /// Uplink messages a node sends on its own initiative. They never answer
    /// an outstanding request.
    pub fn is_spontaneous(self) -> bool {
        matches!(self, Self::STALL | Self::NODE_NEW | Self::NODE_LOST)
    }

    /// Uplink messages reporting an error condition.
    pub fn is_error(self) -> bool {
        matches!(self, Self::SYS_ERROR | Self::NODE_NA | Self::NODE_LOST)
    }

    /// Symbolic name for the system messages known to this crate.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SYS_GET_MAGIC => "SYS_GET_MAGIC",
            Self::SYS_GET_P_VERSION => "SYS_GET_P_VERSION",
            Self::SYS_ENABLE => "SYS_ENABLE",
            Self::SYS_DISABLE => "SYS_DISABLE",
            Self::SYS_GET_UNIQUE_ID => "SYS_GET_UNIQUE_ID",
            Self::SYS_GET_SW_VERSION => "SYS_GET_SW_VERSION",
            Self::SYS_PING => "SYS_PING",
            Self::SYS_IDENTIFY => "SYS_IDENTIFY",
            Self::SYS_RESET => "SYS_RESET",
            Self::GET_PKT_CAPACITY => "GET_PKT_CAPACITY",
            Self::NODETAB_GETALL => "NODETAB_GETALL",
            Self::NODETAB_GETNEXT => "NODETAB_GETNEXT",
            Self::NODE_CHANGED_ACK => "NODE_CHANGED_ACK",
            Self::SYS_GET_ERROR => "SYS_GET_ERROR",
            Self::SYS_MAGIC => "SYS_MAGIC",
            Self::SYS_PONG => "SYS_PONG",
            Self::SYS_P_VERSION => "SYS_P_VERSION",
            Self::SYS_UNIQUE_ID => "SYS_UNIQUE_ID",
            Self::SYS_SW_VERSION => "SYS_SW_VERSION",
            Self::SYS_ERROR => "SYS_ERROR",
            Self::SYS_IDENTIFY_STATE => "SYS_IDENTIFY_STATE",
            Self::NODETAB_COUNT => "NODETAB_COUNT",
            Self::NODETAB => "NODETAB",
            Self::PKT_CAPACITY => "PKT_CAPACITY",
            Self::NODE_NA => "NODE_NA",
            Self::NODE_LOST => "NODE_LOST",
            Self::NODE_NEW => "NODE_NEW",
            Self::STALL => "STALL",
            _ => return None,
        };
        Some(name)
    }
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{:#04x}", self.0),
        }
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageType({})", self)
    }
}

/// A single addressed, sequenced, typed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Node the message is sent to (downlink) or came from (uplink).
    pub address: NodeAddress,
    /// Sequence number, `NO_SEQUENCE` if not yet assigned.
    pub seq: u8,
    /// Message type.
    pub msg_type: MessageType,
    /// Type-specific payload.
    pub payload: Bytes,
    /// Correlation token; local only.
    pub action_id: Option<ActionId>,
}

impl Message {
    pub fn new(address: NodeAddress, msg_type: MessageType) -> Self {
        Self {
            address,
            seq: NO_SEQUENCE,
            msg_type,
            payload: Bytes::new(),
            action_id: None,
        }
    }

    pub fn with_seq(mut self, seq: u8) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_action(mut self, action_id: ActionId) -> Self {
        self.action_id = Some(action_id);
        self
    }

    /// Value of the length byte: address stack, seq, type and payload.
    pub fn body_len(&self) -> usize {
        self.address.stack_len() + 2 + self.payload.len()
    }

    /// Checks that the message fits a length byte.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let size = self.body_len();
        if size > MAX_MESSAGE_LENGTH {
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: MAX_MESSAGE_LENGTH,
            });
        }
        Ok(())
    }

    /// Writes the unescaped message, length byte first.
    pub fn encode_into(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        self.validate()?;
        out.reserve(1 + self.body_len());
        out.put_u8(self.body_len() as u8);
        self.address.serialize_into(out);
        out.put_u8(self.seq);
        out.put_u8(self.msg_type.value());
        out.put_slice(&self.payload);
        Ok(())
    }

    /// Returns the unescaped message, length byte first.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut out = BytesMut::with_capacity(1 + self.body_len());
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Parses one message (without its length byte) from exactly `body`.
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let (address, used) = NodeAddress::read_stack(body)?;
        let rest = &body[used..];
        if rest.len() < 2 {
            return Err(ProtocolError::Truncated {
                needed: used + 2,
                available: body.len(),
            });
        }
        Ok(Self {
            address,
            seq: rest[0],
            msg_type: MessageType(rest[1]),
            payload: Bytes::copy_from_slice(&rest[2..]),
            action_id: None,
        })
    }
}

/// Splits an unescaped, checksum-stripped packet body into its messages.
pub fn decode_messages(mut body: &[u8]) -> Result<Vec<Message>, ProtocolError> {
    let mut messages = Vec::new();
    while let Some((&len, rest)) = body.split_first() {
        let len = len as usize;
        // Smallest message: root terminator, seq, type.
        if len < 3 {
            return Err(ProtocolError::InvalidLength(len as u8));
        }
        if rest.len() < len {
            return Err(ProtocolError::Truncated {
                needed: len,
                available: rest.len(),
            });
        }
        messages.push(Message::decode(&rest[..len])?);
        body = &rest[len..];
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> NodeAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_type_direction() {
        assert!(MessageType::SYS_GET_MAGIC.is_downlink());
        assert!(MessageType::SYS_MAGIC.is_uplink());
        assert!(MessageType::STALL.is_uplink());
    }

    #[test]
    fn test_type_classification() {
        assert!(MessageType::SYS_GET_MAGIC.expects_response());
        assert!(MessageType::new(0x30).expects_response());
        assert!(!MessageType::SYS_DISABLE.expects_response());
        assert!(!MessageType::NODE_CHANGED_ACK.expects_response());
        assert!(!MessageType::SYS_MAGIC.expects_response());

        assert!(MessageType::STALL.is_spontaneous());
        assert!(!MessageType::SYS_PONG.is_spontaneous());

        assert!(MessageType::SYS_ERROR.is_error());
        assert!(MessageType::NODE_LOST.is_error());
        assert!(!MessageType::SYS_MAGIC.is_error());
    }

    #[test]
    fn test_type_display() {
        assert_eq!(MessageType::STALL.to_string(), "STALL");
        assert_eq!(MessageType::new(0x42).to_string(), "0x42");
    }

    #[test]
    fn test_encode_root_message() {
        let msg = Message::new(NodeAddress::ROOT, MessageType::SYS_GET_MAGIC).with_seq(1);
        assert_eq!(msg.encode().unwrap().as_ref(), &[0x03, 0x00, 0x01, 0x01]);
    }

    #[test]
    fn test_encode_nested_with_payload() {
        let msg = Message::new(addr("1.2"), MessageType::SYS_IDENTIFY)
            .with_seq(9)
            .with_payload(vec![0x01]);
        assert_eq!(
            msg.encode().unwrap().as_ref(),
            &[0x06, 0x01, 0x02, 0x00, 0x09, 0x08, 0x01]
        );
    }

    #[test]
    fn test_message_too_large() {
        let msg = Message::new(NodeAddress::ROOT, MessageType::new(0x40))
            .with_payload(vec![0u8; MAX_MESSAGE_LENGTH]);
        assert!(matches!(
            msg.encode(),
            Err(ProtocolError::MessageTooLarge { .. })
        ));

        let fits = Message::new(NodeAddress::ROOT, MessageType::new(0x40))
            .with_payload(vec![0u8; MAX_MESSAGE_LENGTH - 3]);
        assert!(fits.encode().is_ok());
    }

    #[test]
    fn test_decode_messages_splits_by_length() {
        let body = [0x03, 0x00, 0x01, 0x81, 0x05, 0x03, 0x00, 0x07, 0x8E, 0x01];
        let msgs = decode_messages(&body).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].msg_type, MessageType::SYS_MAGIC);
        assert_eq!(msgs[0].seq, 1);
        assert_eq!(msgs[1].address, addr("3"));
        assert_eq!(msgs[1].seq, 7);
        assert_eq!(msgs[1].msg_type, MessageType::STALL);
        assert_eq!(msgs[1].payload.as_ref(), &[0x01]);
    }

    #[test]
    fn test_decode_truncated() {
        let body = [0x05, 0x00, 0x01, 0x81];
        assert!(matches!(
            decode_messages(&body),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_invalid_length() {
        assert_eq!(
            decode_messages(&[0x02, 0x00, 0x01]),
            Err(ProtocolError::InvalidLength(2))
        );
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = Message::new(addr("4.1.9"), MessageType::new(0x38))
            .with_seq(200)
            .with_payload(vec![0xFE, 0xFD, 0x00]);
        let encoded = msg.encode().unwrap();
        let decoded = decode_messages(&encoded).unwrap();
        assert_eq!(decoded, vec![msg]);
    }
}
