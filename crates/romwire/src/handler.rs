//! The request-handler seam and the ROM handler built on it.
//!
//! The engine decodes each inbound request, wraps it in a [`Transaction`],
//! and hands it to a [`JsonRpcHandler`] on its own task. Reserved
//! session-level methods (`connect`, `keepAlive`, `closeSession`) never
//! reach the handler.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use romwire_protocol::{ErrorCode, Props, ResponseError, Value, method, param};
use romwire_rom::{EventNotification, EventSink, RemoteObjectRegistry, RomError, wire_result};
use romwire_session::{Session, Transaction};
use tracing::{debug, error};

/// Serves the requests of every session on one server.
///
/// One handler instance is shared by all connections.
pub trait JsonRpcHandler: Send + Sync + 'static {
    /// Handles one request.
    ///
    /// Answer through the transaction, or return and let the engine answer:
    /// `Ok(())` on an open transaction sends an empty result, `Err` sends
    /// the error. Call [`Transaction::start_async`] to answer later from
    /// elsewhere.
    fn handle_request(
        &self,
        transaction: Transaction,
    ) -> impl Future<Output = Result<(), ResponseError>> + Send;

    /// Called once when a session is created.
    fn after_connection_established(&self, _session: &Session) {}

    /// Called once when a session closes for good.
    fn after_connection_closed(&self, _session: &Session) {}
}

/// Runs a handler on one transaction and sends whatever answer is owed.
///
/// A panicking handler is answered with `InternalError`.
pub(crate) async fn dispatch<H: JsonRpcHandler>(handler: Arc<H>, transaction: Transaction) {
    let method = transaction.request().method.clone();
    let outcome = AssertUnwindSafe(handler.handle_request(transaction.clone()))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            error!(%method, "request handler panicked");
            Err(ResponseError::new(
                ErrorCode::InternalError,
                format!("handler for '{method}' panicked"),
            ))
        });
    if let Err(e) = &outcome {
        debug!(%method, id = ?transaction.request().id, error = %e, "request failed");
    }
    transaction.finish(outcome);
}

/// Serves the remote object methods over a [`RemoteObjectRegistry`].
///
/// | method | params | result |
/// |---|---|---|
/// | `create` | `type`, `constructorParams` | reference |
/// | `invoke` | `object`, `operation`, `operationParams` | operation result |
/// | `release` | `object` | empty |
/// | `subscribe` | `object`, `type` | subscription id |
/// | `unsubscribe` | `object`, `subscription` | empty |
///
/// Subscriptions belong to the session that made them and are dropped
/// when it closes.
#[derive(Clone, Default)]
pub struct RomHandler {
    registry: RemoteObjectRegistry,
}

impl RomHandler {
    pub fn new(registry: RemoteObjectRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RemoteObjectRegistry {
        &self.registry
    }

    fn serve(&self, method_name: &str, params: &Props, session: &Session) -> Result<Value, RomError> {
        match method_name {
            method::CREATE => {
                let class_name = params.require_str(param::TYPE)?;
                let constructor_params = optional_props(params, param::CONSTRUCTOR_PARAMS)?;
                self.registry
                    .create(class_name, &constructor_params)
                    .map(Value::String)
            }
            method::INVOKE => {
                let reference = params.require_str(param::OBJECT)?;
                let operation = params.require_str(param::OPERATION)?;
                let operation_params = optional_props(params, param::OPERATION_PARAMS)?;
                self.registry
                    .invoke(reference, operation, &operation_params)
                    .map(wire_result)
            }
            method::RELEASE => {
                let reference = params.require_str(param::OBJECT)?;
                self.registry.release(reference);
                Ok(Value::Null)
            }
            method::SUBSCRIBE => {
                let reference = params.require_str(param::OBJECT)?;
                let event_type = params.require_str(param::TYPE)?;
                let sink = Arc::new(SessionSink {
                    session: session.clone(),
                });
                self.registry
                    .subscribe(reference, event_type, &owner_of(session), sink)
                    .map(Value::String)
            }
            method::UNSUBSCRIBE => {
                let reference = params.require_str(param::OBJECT)?;
                let subscription = params.require_str(param::SUBSCRIPTION)?;
                self.registry.unsubscribe(reference, subscription);
                Ok(Value::Null)
            }
            other => Err(RomError::Protocol {
                reason: format!("unknown method '{other}'"),
            }),
        }
    }
}

impl JsonRpcHandler for RomHandler {
    async fn handle_request(&self, transaction: Transaction) -> Result<(), ResponseError> {
        let request = transaction.request();
        if !is_rom_method(&request.method) {
            return Err(ResponseError::new(
                ErrorCode::MethodNotFound,
                format!("unknown method '{}'", request.method),
            ));
        }
        let params = Props::from_params(request.params.clone()).map_err(RomError::from)?;
        let result = self.serve(&request.method, &params, transaction.session())?;
        if transaction.is_notification() {
            return Ok(());
        }
        transaction
            .send_response(result)
            .map_err(|e| ResponseError::new(ErrorCode::InternalError, e.to_string()))
    }

    fn after_connection_closed(&self, session: &Session) {
        let dropped = self.registry.drop_owner(&owner_of(session));
        if dropped > 0 {
            debug!(session_id = ?session.id(), dropped, "subscriptions of closed session dropped");
        }
    }
}

fn is_rom_method(name: &str) -> bool {
    matches!(
        name,
        method::CREATE | method::INVOKE | method::RELEASE | method::SUBSCRIBE | method::UNSUBSCRIBE
    )
}

/// A missing or null bag reads as empty.
fn optional_props(params: &Props, name: &str) -> Result<Props, RomError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(Props::new()),
        Some(_) => params.props(name).map_err(RomError::from),
    }
}

fn owner_of(session: &Session) -> String {
    session.id().map(|id| id.to_string()).unwrap_or_default()
}

/// Delivers a subscription's events as `onEvent` notifications on the
/// subscribing session. While the session is suspended they queue in its
/// outbox.
struct SessionSink {
    session: Session,
}

impl EventSink for SessionSink {
    fn deliver(&self, event: EventNotification) -> Result<(), RomError> {
        self.session
            .notify(method::ON_EVENT, Some(event.to_params()))
            .map_err(|e| RomError::Transport {
                reason: e.to_string(),
            })
    }
}
