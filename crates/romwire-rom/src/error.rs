//! Error types for the remote object layer.

use romwire_protocol::{ErrorCode, ProtocolError, ResponseError, Value};
use serde::{Deserialize, Serialize};

/// A value could not be converted to or from its wire form.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlattenError {
    /// The wire value has the wrong JSON shape for the target type.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
    },

    /// A struct's property bag lacks a required property.
    #[error("{ty} is missing property '{name}'")]
    MissingProperty { ty: String, name: String },

    /// An enum name that the target enum does not define.
    #[error("'{value}' is not a {ty} value")]
    UnknownEnumValue { ty: String, value: String },

    /// A reference that the local registry does not know and cannot bind.
    #[error("unknown object reference '{0}'")]
    UnknownReference(String),
}

impl FlattenError {
    /// A [`TypeMismatch`](Self::TypeMismatch) describing what was found.
    pub fn mismatch(expected: impl Into<String>, found: &Value) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: json_kind(found).to_string(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Faults raised by remote object operations.
///
/// Every variant maps onto a stable [`ErrorCode`]. When a server answers
/// with one of these, the variant itself travels in the error's `data`
/// member, so the client reconstructs the same variant rather than a bare
/// code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RomError {
    /// No implementation is registered for the class name.
    #[error("unknown class '{class}'")]
    UnknownClass { class: String },

    /// The class constructor failed.
    #[error("cannot construct {class}: {reason}")]
    ConstructionError { class: String, reason: String },

    /// The reference is not (or no longer) registered.
    #[error("unknown object '{reference}'")]
    UnknownObject { reference: String },

    /// The object's class has no such operation.
    #[error("{class} has no operation '{operation}'")]
    UnknownOperation { class: String, operation: String },

    /// The operation itself failed.
    #[error("application fault: {message}")]
    ApplicationFault { message: String },

    /// Parameters or results could not be marshalled.
    #[error("invalid parameters: {reason}")]
    InvalidParams { reason: String },

    /// A malformed message or reply.
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    /// The channel to the peer failed.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// An error response whose code this crate doesn't model.
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },
}

impl RomError {
    pub fn unknown_object(reference: impl Into<String>) -> Self {
        Self::UnknownObject {
            reference: reference.into(),
        }
    }

    pub fn unknown_operation(class: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnknownOperation {
            class: class.into(),
            operation: operation.into(),
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::ApplicationFault {
            message: message.into(),
        }
    }

    /// The stable wire code for this fault.
    pub fn code(&self) -> i32 {
        let code = match self {
            Self::UnknownClass { .. } => ErrorCode::UnknownClass,
            Self::ConstructionError { .. } => ErrorCode::ConstructionError,
            Self::UnknownObject { .. } => ErrorCode::UnknownObject,
            Self::UnknownOperation { .. } => ErrorCode::UnknownOperation,
            Self::ApplicationFault { .. } => ErrorCode::ApplicationFault,
            Self::InvalidParams { .. } => ErrorCode::InvalidParams,
            Self::Protocol { .. } => ErrorCode::InvalidRequest,
            Self::Transport { .. } => ErrorCode::TransportError,
            Self::Remote { code, .. } => return *code,
        };
        code.code()
    }

    /// Rebuilds a fault from an error response.
    ///
    /// Uses the variant carried in `data` when present, and otherwise
    /// falls back on the numeric code.
    pub fn from_response_error(err: ResponseError) -> Self {
        if let Some(data) = &err.data {
            if let Ok(rom) = serde_json::from_value::<RomError>(data.clone()) {
                return rom;
            }
        }
        let message = err.message;
        match ErrorCode::from_code(err.code) {
            Some(ErrorCode::ApplicationFault) => Self::ApplicationFault { message },
            Some(ErrorCode::InvalidParams) => Self::InvalidParams { reason: message },
            Some(ErrorCode::ParseError | ErrorCode::InvalidRequest) => {
                Self::Protocol { reason: message }
            }
            Some(ErrorCode::TransportError) => Self::Transport { reason: message },
            _ => Self::Remote {
                code: err.code,
                message,
            },
        }
    }
}

impl From<RomError> for ResponseError {
    fn from(err: RomError) -> Self {
        let data = serde_json::to_value(&err).ok();
        let mut response = ResponseError::new(err.code(), err.to_string());
        response.data = data;
        response
    }
}

impl From<FlattenError> for RomError {
    fn from(err: FlattenError) -> Self {
        Self::InvalidParams {
            reason: err.to_string(),
        }
    }
}

impl From<ProtocolError> for RomError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MissingParam(_) | ProtocolError::InvalidParam { .. } => {
                Self::InvalidParams {
                    reason: err.to_string(),
                }
            }
            other => Self::Protocol {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_error_round_trip_keeps_variant() {
        let original = RomError::unknown_operation("Counter", "explode");
        let wire: ResponseError = original.clone().into();
        assert_eq!(wire.code, ErrorCode::UnknownOperation.code());
        assert_eq!(RomError::from_response_error(wire), original);
    }

    #[test]
    fn test_from_response_error_without_data_uses_code() {
        let wire = ResponseError::new(ErrorCode::ApplicationFault, "disk full");
        assert_eq!(
            RomError::from_response_error(wire),
            RomError::fault("disk full")
        );
    }

    #[test]
    fn test_from_response_error_unknown_code_is_remote() {
        let wire = ResponseError::new(12345, "odd");
        assert!(matches!(
            RomError::from_response_error(wire),
            RomError::Remote { code: 12345, .. }
        ));
    }

    #[test]
    fn test_flatten_error_maps_to_invalid_params() {
        let err: RomError = FlattenError::UnknownReference("x".into()).into();
        assert_eq!(err.code(), ErrorCode::InvalidParams.code());
    }
}
