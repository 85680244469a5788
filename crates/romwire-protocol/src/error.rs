//! Error types for the protocol layer.
//!
//! Each crate in romwire defines its own error enum. A `ProtocolError`
//! always means the problem is in the shape of a message, never in
//! networking or object lifecycle.

use std::fmt;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, wrong
    /// types, or a truncated message.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The message parsed but violates JSON-RPC rules (wrong version,
    /// both `result` and `error` set, ...).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A required parameter is absent from a params object.
    #[error("missing parameter '{0}'")]
    MissingParam(String),

    /// A parameter is present but has the wrong shape.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParam {
        /// Parameter name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl ProtocolError {
    /// The stable wire code used when this error answers a request.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Encode(_) => ErrorCode::InternalError,
            Self::Decode(_) => ErrorCode::ParseError,
            Self::InvalidMessage(_) => ErrorCode::InvalidRequest,
            Self::MissingParam(_) | Self::InvalidParam { .. } => {
                ErrorCode::InvalidParams
            }
        }
    }
}

/// Stable numeric error codes carried in [`ResponseError::code`].
///
/// The negative range is the JSON-RPC 2.0 reserved set. The 404xx range
/// covers remote-object faults, 405xx application faults raised by a remote
/// object's own code, and 406xx transport and session faults.
///
/// [`ResponseError::code`]: crate::ResponseError::code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    UnknownClass,
    ConstructionError,
    UnknownObject,
    UnknownOperation,
    ApplicationFault,
    TransportError,
    SessionNotFound,
}

impl ErrorCode {
    const ALL: [ErrorCode; 12] = [
        Self::ParseError,
        Self::InvalidRequest,
        Self::MethodNotFound,
        Self::InvalidParams,
        Self::InternalError,
        Self::UnknownClass,
        Self::ConstructionError,
        Self::UnknownObject,
        Self::UnknownOperation,
        Self::ApplicationFault,
        Self::TransportError,
        Self::SessionNotFound,
    ];

    /// The integer written to the wire.
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::UnknownClass => 40401,
            Self::ConstructionError => 40402,
            Self::UnknownObject => 40403,
            Self::UnknownOperation => 40404,
            Self::ApplicationFault => 40500,
            Self::TransportError => 40600,
            Self::SessionNotFound => 40601,
        }
    }

    /// Maps a wire integer back to a known code.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}
