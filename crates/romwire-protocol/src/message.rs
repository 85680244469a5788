//! JSON-RPC 2.0 message types.
//!
//! A [`Request`] with an `id` owes exactly one [`Response`]; a request
//! without one is a notification and is never answered.
//!
//! # Session id placement
//!
//! The session id is not a top-level JSON-RPC member. It travels *inside*
//! the payload object: request `params`, response `result`, or error
//! `data`. When that payload is not an object it is first wrapped as
//! `{"value": <payload>}` (an absent payload becomes `{}`), then the
//! `sessionId` property is added. Decoding strips the property again and
//! lifts it into the `session_id` field, leaving any `value` wrapper in
//! place for the receiver to unwrap.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{ErrorCode, ProtocolError, param};

/// The only protocol version this crate speaks.
pub const JSONRPC_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// An inbound or outbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RawRequest", try_from = "RawRequest")]
pub struct Request {
    /// Present when a response is owed.
    pub id: Option<i64>,
    /// Method name, e.g. `"invoke"`.
    pub method: String,
    /// Method parameters, usually an object.
    pub params: Option<Value>,
    /// Session this request belongs to, if any.
    pub session_id: Option<String>,
}

impl Request {
    /// Creates a notification (no id) for `method`.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
            session_id: None,
        }
    }

    /// Sets the request id, turning a notification into a call.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Attaches a session id.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Returns `true` if no response is owed for this request.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Serialize, Deserialize)]
struct RawRequest {
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl From<Request> for RawRequest {
    fn from(req: Request) -> Self {
        let params = match req.session_id {
            Some(session_id) => Some(inject_session_id(req.params, session_id)),
            None => req.params,
        };
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: req.id,
            method: req.method,
            params,
        }
    }
}

impl TryFrom<RawRequest> for Request {
    type Error = String;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        check_version(&raw.jsonrpc)?;
        let mut params = raw.params;
        let session_id = extract_session_id(params.as_mut());
        Ok(Self {
            id: raw.id,
            method: raw.method,
            params,
            session_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// The structured error carried by a failed [`Response`].
#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error,
)]
#[error("{message} (code {code})")]
pub struct ResponseError {
    /// Stable numeric code, see [`ErrorCode`].
    pub code: i32,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    /// Creates an error with no `data`.
    pub fn new(code: impl Into<i32>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured detail.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The known code this error carries, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

impl From<ProtocolError> for ResponseError {
    fn from(err: ProtocolError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// The answer to one [`Request`]. Exactly one of result/error is set,
/// which the `outcome` field makes unrepresentable otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RawResponse", try_from = "RawResponse")]
pub struct Response {
    /// Id of the request being answered. `None` only when the request's
    /// id could not be read.
    pub id: Option<i64>,
    /// The result value or the error.
    pub outcome: Result<Value, ResponseError>,
    /// Session this response belongs to, if any.
    pub session_id: Option<String>,
}

impl Response {
    /// A successful response.
    pub fn success(id: Option<i64>, result: Value) -> Self {
        Self {
            id,
            outcome: Ok(result),
            session_id: None,
        }
    }

    /// A successful response with no meaningful result.
    pub fn empty(id: Option<i64>) -> Self {
        Self::success(id, Value::Null)
    }

    /// A failed response.
    pub fn error(id: Option<i64>, error: ResponseError) -> Self {
        Self {
            id,
            outcome: Err(error),
            session_id: None,
        }
    }

    /// Attaches a session id.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Returns `true` if this response carries an error.
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}

#[derive(Serialize, Deserialize)]
struct RawResponse {
    jsonrpc: String,
    id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ResponseError>,
}

impl From<Response> for RawResponse {
    fn from(resp: Response) -> Self {
        let (result, error) = match (resp.outcome, resp.session_id) {
            (Ok(value), None) => (Some(value), None),
            (Ok(value), Some(sid)) => {
                (Some(inject_session_id(Some(value), sid)), None)
            }
            (Err(err), None) => (None, Some(err)),
            (Err(mut err), Some(sid)) => {
                err.data = Some(inject_session_id(err.data.take(), sid));
                (None, Some(err))
            }
        };
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: resp.id,
            result,
            error,
        }
    }
}

impl TryFrom<RawResponse> for Response {
    type Error = String;

    fn try_from(raw: RawResponse) -> Result<Self, Self::Error> {
        check_version(&raw.jsonrpc)?;
        match (raw.result, raw.error) {
            (Some(_), Some(_)) => {
                Err("response carries both 'result' and 'error'".to_string())
            }
            (_, Some(mut err)) => {
                let session_id = extract_session_id(err.data.as_mut());
                Ok(Self {
                    id: raw.id,
                    outcome: Err(err),
                    session_id,
                })
            }
            // `"result": null` and an absent result both mean "no value".
            (result, None) => {
                let mut result = result.unwrap_or(Value::Null);
                let session_id = extract_session_id(Some(&mut result));
                Ok(Self {
                    id: raw.id,
                    outcome: Ok(result),
                    session_id,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Anything that can arrive on a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// A call or notification.
    Request(Request),
    /// The answer to an earlier call.
    Response(Response),
}

impl Message {
    /// Classifies and parses an already-decoded JSON value.
    ///
    /// Anything with a `method` member is a request; everything else must
    /// be a response.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let is_request = value.get("method").is_some();
        let parsed = if is_request {
            Request::deserialize(value).map(Message::Request)
        } else {
            Response::deserialize(value).map(Message::Response)
        };
        parsed.map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
    }

    /// The `id` member of a raw message, if it has a readable one.
    ///
    /// Used to decide whether a malformed message is still owed an error
    /// response.
    pub fn peek_id(value: &Value) -> Option<i64> {
        value.get("id").and_then(Value::as_i64)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_version(version: &str) -> Result<(), String> {
    if version == JSONRPC_VERSION {
        Ok(())
    } else {
        Err(format!("unsupported jsonrpc version '{version}'"))
    }
}

fn inject_session_id(payload: Option<Value>, session_id: String) -> Value {
    let mut object = match payload {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert(param::VALUE.to_string(), other);
            map
        }
    };
    object.insert(param::SESSION_ID.to_string(), Value::String(session_id));
    Value::Object(object)
}

fn extract_session_id(payload: Option<&mut Value>) -> Option<String> {
    let object = payload?.as_object_mut()?;
    match object.remove(param::SESSION_ID)? {
        Value::String(sid) => Some(sid),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Message {
        Message::from_value(value).expect("should parse")
    }

    // =====================================================================
    // Request
    // =====================================================================

    #[test]
    fn test_request_notification_serializes_without_id() {
        let req = Request::new("onEvent", Some(json!({"type": "Tick"})));
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["jsonrpc"], "2.0");
        assert!(req.is_notification());
    }

    #[test]
    fn test_request_session_id_injected_into_params() {
        let req = Request::new("invoke", Some(json!({"object": "r1"})))
            .with_id(1)
            .with_session_id("s-1");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["params"]["sessionId"], "s-1");
        assert_eq!(value["params"]["object"], "r1");
        assert!(value.get("sessionId").is_none());
    }

    #[test]
    fn test_request_session_id_without_params_creates_object() {
        let req = Request::new("keepAlive", None).with_session_id("s-1");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["params"], json!({"sessionId": "s-1"}));
    }

    #[test]
    fn test_request_decode_extracts_session_id() {
        let msg = parse(json!({
            "jsonrpc": "2.0", "id": 4, "method": "release",
            "params": {"object": "r1", "sessionId": "s-9"}
        }));
        let Message::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.session_id.as_deref(), Some("s-9"));
        assert_eq!(req.params, Some(json!({"object": "r1"})));
    }

    #[test]
    fn test_request_wrong_version_is_invalid() {
        let result = Message::from_value(json!({
            "jsonrpc": "1.0", "id": 1, "method": "create"
        }));
        assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    }

    // =====================================================================
    // Response
    // =====================================================================

    #[test]
    fn test_response_both_result_and_error_is_invalid() {
        let result = Message::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "result": 1,
            "error": {"code": 1, "message": "x"}
        }));
        assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    }

    #[test]
    fn test_response_missing_result_means_null() {
        let Message::Response(resp) = parse(json!({"jsonrpc": "2.0", "id": 2}))
        else {
            panic!("expected response");
        };
        assert_eq!(resp.outcome, Ok(Value::Null));
    }

    #[test]
    fn test_response_primitive_result_wrapped_when_session_attached() {
        // A bare string can't carry a sessionId property, so it moves
        // under "value".
        let resp = Response::success(Some(3), json!("sub-1")).with_session_id("s");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["result"], json!({"value": "sub-1", "sessionId": "s"}));

        let Message::Response(back) = parse(value) else {
            panic!("expected response");
        };
        assert_eq!(back.session_id.as_deref(), Some("s"));
        assert_eq!(back.outcome, Ok(json!({"value": "sub-1"})));
    }

    #[test]
    fn test_response_error_session_id_lives_in_data() {
        let resp = Response::error(Some(5), ResponseError::new(40403, "gone"))
            .with_session_id("s-2");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["error"]["data"]["sessionId"], "s-2");

        let Message::Response(back) = parse(value) else {
            panic!("expected response");
        };
        assert_eq!(back.session_id.as_deref(), Some("s-2"));
        let err = back.outcome.unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::UnknownObject));
    }

    #[test]
    fn test_response_null_id_serializes_explicitly() {
        // JSON-RPC requires "id": null when the request id was unreadable.
        let resp = Response::error(None, ResponseError::new(-32700, "parse"));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["id"], Value::Null);
    }

    // =====================================================================
    // Message classification
    // =====================================================================

    #[test]
    fn test_message_with_method_is_request() {
        let msg = parse(json!({"jsonrpc": "2.0", "method": "onEvent"}));
        assert!(matches!(msg, Message::Request(r) if r.is_notification()));
    }

    #[test]
    fn test_message_peek_id_reads_id_from_malformed_message() {
        let raw = json!({"jsonrpc": "2.0", "id": 11, "method": 5});
        assert!(Message::from_value(raw.clone()).is_err());
        assert_eq!(Message::peek_id(&raw), Some(11));
    }
}
