//! Error types for the session layer.

use std::time::Duration;

use romwire_protocol::{ErrorCode, ResponseError};

/// Errors that can occur while a session carries requests.
///
/// `Clone` because a single failure (a lost transport, an explicit close)
/// is delivered to every outstanding waiter at once.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// The transport failed and could not be recovered: a send failed, the
    /// reconnection grace period elapsed, or keepalive stopped answering.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response arrived within the request timeout.
    #[error("request {id} timed out after {after:?}")]
    Timeout {
        /// Id of the abandoned request.
        id: i64,
        /// How long the caller waited.
        after: Duration,
    },

    /// The session was closed, explicitly or after a failure.
    #[error("session closed")]
    Closed,

    /// The id is already outstanding in the correlator.
    #[error("request id {0} is already pending")]
    DuplicateId(i64),

    /// A notification (no id) was handed to the correlator.
    #[error("notifications cannot be correlated")]
    NotCorrelatable,

    /// No session is registered under the given id.
    #[error("session {0} not found")]
    NotFound(String),

    /// An outbound message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl SessionError {
    /// The stable wire code used when this error answers a request.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) | Self::Timeout { .. } | Self::Closed => {
                ErrorCode::TransportError
            }
            Self::NotFound(_) => ErrorCode::SessionNotFound,
            Self::DuplicateId(_) | Self::NotCorrelatable | Self::Encode(_) => {
                ErrorCode::InternalError
            }
        }
    }
}

impl From<SessionError> for ResponseError {
    fn from(err: SessionError) -> Self {
        ResponseError::new(err.code(), err.to_string())
    }
}

/// Errors raised by a [`Transaction`](crate::Transaction).
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// A response was already sent for this transaction. Sending a second
    /// one is a programming error in the handler.
    #[error("transaction for request {id:?} already responded")]
    AlreadyResponded {
        /// Id of the request, `None` for notifications.
        id: Option<i64>,
    },

    /// The response could not be handed to the session.
    #[error(transparent)]
    Session(#[from] SessionError),
}
