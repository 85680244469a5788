//! Codec trait and implementations for serializing/deserializing messages.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The engine doesn't care HOW messages are serialized; it just needs
//! something that implements the [`Codec`] trait.
//!
//! JSON-RPC is a JSON protocol, so [`JsonCodec`] is the only implementation
//! shipped. The trait stays as the seam where a framing variant (for
//! example, length-prefixed JSON over a raw stream) would plug in.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a single codec instance is shared by
/// every connection task of a server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use romwire_protocol::{Codec, JsonCodec, Message, Request, json};
///
/// let codec = JsonCodec;
/// let request = Request::new("invoke", Some(json!({"object": "abc"}))).with_id(7);
///
/// let bytes = codec.encode(&request).unwrap();
/// let decoded: Message = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, Message::Request(request));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, Response, ResponseError};

    #[test]
    fn test_decode_malformed_json_returns_decode_error() {
        let result: Result<Message, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_encode_error_response_has_no_result_field() {
        // Exactly one of result/error may appear on the wire.
        let resp = Response::error(Some(3), ResponseError::new(-32601, "nope"));
        let bytes = JsonCodec.encode(&resp).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], -32601);
        assert_eq!(value["jsonrpc"], "2.0");
    }
}
