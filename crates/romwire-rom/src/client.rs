//! The client-side contract the proxies are built on.
//!
//! [`RomClient`] is the five remote object primitives plus event delivery.
//! The engine implements it over a JSON-RPC session; [`LocalRomClient`]
//! implements it over an in-process registry. Proxies only ever talk to
//! this trait, so they work unchanged over either.
//!
//! [`LocalRomClient`]: crate::LocalRomClient

use std::sync::Arc;

use futures_util::future::BoxFuture;
use romwire_protocol::{Props, Value, param};

use crate::RomError;
use crate::event::EventNotification;

/// Receives every `onEvent` notification the client gets.
pub type EventHandler = Arc<dyn Fn(EventNotification) + Send + Sync>;

/// The remote object primitives, as seen from a client.
///
/// Results are raw wire values. Scalars may arrive wrapped as
/// `{"value": x}`; typed callers unwrap against their target type.
pub trait RomClient: Send + Sync + 'static {
    /// Creates an object and returns its reference.
    fn create(
        &self,
        class_name: &str,
        constructor_params: Props,
    ) -> BoxFuture<'_, Result<String, RomError>>;

    fn invoke(
        &self,
        reference: &str,
        operation: &str,
        operation_params: Props,
    ) -> BoxFuture<'_, Result<Value, RomError>>;

    fn release(&self, reference: &str) -> BoxFuture<'_, Result<(), RomError>>;

    /// Subscribes to an event type and returns the subscription id.
    fn subscribe(
        &self,
        reference: &str,
        event_type: &str,
    ) -> BoxFuture<'_, Result<String, RomError>>;

    fn unsubscribe(
        &self,
        reference: &str,
        subscription: &str,
    ) -> BoxFuture<'_, Result<(), RomError>>;

    /// Installs the handler for inbound events, replacing any previous one.
    fn set_event_handler(&self, handler: EventHandler);
}

/// Reads a string result, accepting both a bare string and the
/// `{"value": "<s>"}` wrapper.
pub fn string_result(value: Value) -> Result<String, RomError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Object(mut map) if map.len() == 1 => match map.remove(param::VALUE) {
            Some(Value::String(s)) => Ok(s),
            _ => Err(unexpected_result("a string", &Value::Object(map))),
        },
        other => Err(unexpected_result("a string", &other)),
    }
}

/// Wraps a non-object result as `{"value": x}` the way it travels on the
/// wire. Null becomes an empty object.
pub fn wire_result(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        Value::Null => Value::Object(Default::default()),
        other => Props::new().with(param::VALUE, other).into(),
    }
}

fn unexpected_result(expected: &str, found: &Value) -> RomError {
    RomError::Protocol {
        reason: format!("expected {expected} result, got {found}"),
    }
}
