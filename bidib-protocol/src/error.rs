//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding BiDiB wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid node address: {0}")]
    InvalidAddress(String),

    #[error("message too large: length byte would be {size} (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("escape byte not followed by an escaped value")]
    BadEscape,

    #[error("CRC mismatch: expected {expected:#04x}, got {actual:#04x}")]
    CrcMismatch { expected: u8, actual: u8 },

    #[error("truncated message: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("invalid message length byte: {0}")]
    InvalidLength(u8),

    #[error("packet body overflow: more than {max} bytes without a closing magic")]
    Overflow { max: usize },
}

impl ProtocolError {
    /// Returns whether this error comes from a damaged byte stream (as opposed
    /// to invalid caller input).
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::BadEscape
                | ProtocolError::CrcMismatch { .. }
                | ProtocolError::Truncated { .. }
                | ProtocolError::InvalidLength(_)
                | ProtocolError::Overflow { .. }
        )
    }
}
