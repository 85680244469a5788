//! In-process [`RomClient`] over a [`RemoteObjectRegistry`].
//!
//! Proxies driven through a [`LocalRomClient`] behave as they would over
//! the network. Every parameter and result goes through its wire form and
//! scalar results are wrapped the way a server wraps them, but no session
//! or transport is involved.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use romwire_protocol::{Props, Value};
use tracing::trace;

use crate::client::{EventHandler, RomClient, wire_result};
use crate::event::{EventNotification, EventSink};
use crate::registry::RemoteObjectRegistry;
use crate::RomError;

static NEXT_CLIENT: AtomicU64 = AtomicU64::new(1);

/// Drives a registry directly from the client API.
///
/// Subscriptions made through a client are owned by it and dropped with
/// it.
pub struct LocalRomClient {
    registry: RemoteObjectRegistry,
    owner: String,
    handler: Arc<RwLock<Option<EventHandler>>>,
}

impl LocalRomClient {
    pub fn new(registry: RemoteObjectRegistry) -> Self {
        Self {
            registry,
            owner: format!("local-{}", NEXT_CLIENT.fetch_add(1, Ordering::Relaxed)),
            handler: Arc::new(RwLock::new(None)),
        }
    }

    pub fn registry(&self) -> &RemoteObjectRegistry {
        &self.registry
    }
}

impl Drop for LocalRomClient {
    fn drop(&mut self) {
        self.registry.drop_owner(&self.owner);
    }
}

struct LocalSink {
    handler: Arc<RwLock<Option<EventHandler>>>,
}

impl EventSink for LocalSink {
    fn deliver(&self, event: EventNotification) -> Result<(), RomError> {
        // Round-trip through the wire form like a remote event would.
        let event = EventNotification::from_params(Some(event.to_params()))?;
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => {
                handler(event);
                Ok(())
            }
            None => Err(RomError::Transport {
                reason: "no event handler installed".into(),
            }),
        }
    }
}

impl RomClient for LocalRomClient {
    fn create(
        &self,
        class_name: &str,
        constructor_params: Props,
    ) -> BoxFuture<'_, Result<String, RomError>> {
        let class_name = class_name.to_string();
        Box::pin(async move {
            trace!(class = %class_name, "local create");
            self.registry.create(&class_name, &constructor_params)
        })
    }

    fn invoke(
        &self,
        reference: &str,
        operation: &str,
        operation_params: Props,
    ) -> BoxFuture<'_, Result<Value, RomError>> {
        let reference = reference.to_string();
        let operation = operation.to_string();
        Box::pin(async move {
            trace!(%reference, %operation, "local invoke");
            self.registry
                .invoke(&reference, &operation, &operation_params)
                .map(wire_result)
        })
    }

    fn release(&self, reference: &str) -> BoxFuture<'_, Result<(), RomError>> {
        let reference = reference.to_string();
        Box::pin(async move {
            self.registry.release(&reference);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        reference: &str,
        event_type: &str,
    ) -> BoxFuture<'_, Result<String, RomError>> {
        let reference = reference.to_string();
        let event_type = event_type.to_string();
        let sink = Arc::new(LocalSink {
            handler: Arc::clone(&self.handler),
        });
        Box::pin(async move {
            self.registry
                .subscribe(&reference, &event_type, &self.owner, sink)
        })
    }

    fn unsubscribe(
        &self,
        reference: &str,
        subscription: &str,
    ) -> BoxFuture<'_, Result<(), RomError>> {
        let reference = reference.to_string();
        let subscription = subscription.to_string();
        Box::pin(async move {
            self.registry.unsubscribe(&reference, &subscription);
            Ok(())
        })
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.write() = Some(handler);
    }
}
