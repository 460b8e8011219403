//! Datapath transport errors.

use crate::flow::BufferId;
use thiserror::Error;

/// Error returned by a [`Datapath`](crate::Datapath) operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatapathError {
    /// The switch refused the request.
    #[error("{operation} rejected by datapath: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    /// The buffer id is unknown to the switch (already released or expired).
    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferId),

    /// The control connection is down.
    #[error("datapath not connected")]
    Disconnected,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DatapathError {
    pub fn rejected(operation: &'static str, reason: impl Into<String>) -> Self {
        DatapathError::Rejected {
            operation,
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        DatapathError::Internal {
            message: message.into(),
        }
    }

    /// True when retrying on the same connection cannot succeed.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DatapathError::Disconnected)
    }
}

/// Result type for datapath operations.
pub type DatapathResult<T> = std::result::Result<T, DatapathError>;
