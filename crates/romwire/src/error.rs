//! Unified error type for the romwire engine.

use romwire_protocol::{ProtocolError, ResponseError};
use romwire_rom::RomError;
use romwire_session::SessionError;
use romwire_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `romwire` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RomwireError {
    /// A transport-level error (bind, dial, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (closed, timed out, not found).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A remote object model error.
    #[error(transparent)]
    Rom(#[from] RomError),

    /// The peer answered a call with an error response.
    #[error("remote error: {0}")]
    Response(#[from] ResponseError),
}

#[cfg(test)]
mod tests {
    use romwire_protocol::ErrorCode;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let romwire_err: RomwireError = err.into();
        assert!(matches!(romwire_err, RomwireError::Transport(_)));
        assert!(romwire_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let romwire_err: RomwireError = err.into();
        assert!(matches!(romwire_err, RomwireError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::NotFound("abc".into());
        let romwire_err: RomwireError = err.into();
        assert!(matches!(romwire_err, RomwireError::Session(_)));
    }

    #[test]
    fn test_from_rom_error() {
        let err = RomError::unknown_object("ref_Counter");
        let romwire_err: RomwireError = err.into();
        assert!(matches!(romwire_err, RomwireError::Rom(_)));
    }

    #[test]
    fn test_from_response_error_keeps_code_in_message() {
        let err = ResponseError::new(ErrorCode::MethodNotFound, "no such method");
        let romwire_err: RomwireError = err.into();
        assert!(matches!(romwire_err, RomwireError::Response(_)));
        assert!(romwire_err.to_string().contains("-32601"));
    }
}
