//! Engine error types.

use crate::config::ConfigError;
use bidib_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Engine errors.
///
/// Flow-control backpressure is not an error: a message held back for a
/// stalled or busy node is reported as [`crate::SendOutcome::Queued`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("message needs {size} framed bytes, packets are limited to {max}")]
    Capacity { size: usize, max: usize },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("interface did not answer within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Returns whether the error was caused by the caller's message and left
    /// no state behind.
    pub fn is_rejected_input(&self) -> bool {
        matches!(
            self,
            EngineError::Capacity { .. }
                | EngineError::Protocol(ProtocolError::MessageTooLarge { .. })
                | EngineError::Protocol(ProtocolError::InvalidAddress(_))
        )
    }

    /// Returns whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::HandshakeTimeout(_) | EngineError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(EngineError::Capacity { size: 90, max: 64 }.is_rejected_input());
        assert!(EngineError::Protocol(ProtocolError::MessageTooLarge { size: 130, max: 127 })
            .is_rejected_input());
        assert!(!EngineError::HandshakeTimeout(Duration::from_millis(5)).is_rejected_input());

        assert!(EngineError::HandshakeTimeout(Duration::from_millis(5)).is_retryable());
        assert!(!EngineError::Capacity { size: 90, max: 64 }.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = EngineError::Capacity { size: 90, max: 64 };
        let msg = err.to_string();
        assert!(msg.contains("90"));
        assert!(msg.contains("64"));

        let err: EngineError = ConfigError::ValidationError("bad credit".into()).into();
        assert!(err.to_string().contains("bad credit"));
    }
}
