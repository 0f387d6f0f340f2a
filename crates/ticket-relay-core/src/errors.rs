//! Unified error type for relay operations
//!
//! One flat error enum covers the whole relay: construction-time
//! configuration problems, transport failures, deadlines, and failures
//! reported by the Float Authority or other collaborators. At the wire
//! boundary every variant collapses into an [`RpcStatus`](crate::rpc::RpcStatus).

use serde::{Deserialize, Serialize};

/// Result alias used throughout the relay crates
pub type RelayResult<T> = Result<T, RelayError>;

/// Unified error type for all relay operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RelayError {
    /// Invalid or missing configuration; the service never starts
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong with the configuration
        message: String,
    },

    /// Dial, bind, or mid-stream I/O failure
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure
        message: String,
    },

    /// A bounded call did not complete in time
    #[error("Deadline exceeded: {operation}")]
    Timeout {
        /// The operation that timed out
        operation: String,
    },

    /// The Float Authority or a local collaborator rejected the operation
    #[error("{message}")]
    Delegated {
        /// Original collaborator message, preserved as text
        message: String,
    },

    /// Peer sent something that does not follow the frame protocol
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the violation
        message: String,
    },

    /// Frame payload could not be encoded or decoded
    #[error("Serialization error: {message}")]
    Serialization {
        /// Underlying codec message
        message: String,
    },

    /// The service has been stopped
    #[error("Service is shut down")]
    Shutdown,
}

impl RelayError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a delegated error carrying a collaborator's message
    pub fn delegated(message: impl Into<String>) -> Self {
        Self::Delegated {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// The bare message text, without the variant prefix.
    ///
    /// Used when an error crosses the wire so the caller sees the
    /// collaborator's own wording rather than a nested prefix chain.
    pub fn message(&self) -> String {
        match self {
            Self::Config { message }
            | Self::Transport { message }
            | Self::Delegated { message }
            | Self::Protocol { message }
            | Self::Serialization { message } => message.clone(),
            Self::Timeout { operation } => format!("{operation} timed out"),
            Self::Shutdown => "service is shut down".to_string(),
        }
    }

    /// Whether the caller may reasonably retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}

impl From<bincode::Error> for RelayError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegated_display_is_the_collaborator_message() {
        let err = RelayError::delegated("ticket is not a winner");
        assert_eq!(err.to_string(), "ticket is not a winner");
        assert_eq!(err.message(), "ticket is not a winner");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RelayError::timeout("QueueTicket").is_retryable());
        assert!(RelayError::transport("connection reset").is_retryable());
        assert!(!RelayError::delegated("bad signature").is_retryable());
        assert!(!RelayError::config("missing recipient").is_retryable());
    }
}
