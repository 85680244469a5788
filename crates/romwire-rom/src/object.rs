//! Client-side handles to remote objects.
//!
//! A [`RemoteObject`] is the local stand-in for one server object: it
//! knows the reference, forwards calls through the [`RomClient`], and keeps
//! the event listeners registered on that object. Typed proxies generated
//! by [`remote_proxy!`](crate::remote_proxy) wrap one of these.
//!
//! [`RomClient`]: crate::RomClient

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use romwire_protocol::{Props, Value, param};
use tracing::{debug, warn};

use crate::event::EventNotification;
use crate::flatten::{Flatten, RomType, Unflatten, unwrap_value};
use crate::manager::{ManagerInner, RomManager};
use crate::{FlattenError, RomError};

/// A typed event payload.
///
/// Declare the payload with [`rom_struct!`](crate::rom_struct) and name
/// its wire type here.
pub trait RomEvent: Unflatten<RomManager> + Send + 'static {
    const TYPE: &'static str;
}

/// A typed proxy over a [`RemoteObject`].
pub trait RemoteProxy: Sized {
    /// The class name the server registers this type under.
    const CLASS: &'static str;

    fn from_object(object: RemoteObject) -> Self;

    fn object(&self) -> &RemoteObject;

    fn reference(&self) -> &str {
        self.object().reference()
    }

    /// Fire-and-forget release; see [`RemoteObject::release`].
    fn release(&self) {
        self.object().release();
    }
}

type ListenerFn = Arc<dyn Fn(&Value, &RomManager) + Send + Sync>;

struct Listener {
    event_type: String,
    subscription: String,
    callback: ListenerFn,
}

/// Identifies one registered listener, for
/// [`remove_listener`](RemoteObject::remove_listener).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerSubscription {
    event_type: String,
    subscription: String,
}

impl ListenerSubscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The server-assigned subscription id.
    pub fn id(&self) -> &str {
        &self.subscription
    }
}

struct ObjectInner {
    reference: String,
    class_name: String,
    manager: Weak<ManagerInner>,
    listeners: Mutex<Vec<Listener>>,
    released: AtomicBool,
}

/// Handle to one remote object. Clones share the same handle.
#[derive(Clone)]
pub struct RemoteObject {
    inner: Arc<ObjectInner>,
}

impl RemoteObject {
    pub(crate) fn new(reference: String, class_name: String, manager: Weak<ManagerInner>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                reference,
                class_name,
                manager,
                listeners: Mutex::new(Vec::new()),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn reference(&self) -> &str {
        &self.inner.reference
    }

    /// The class name, when known. Handles bound lazily from an opaque
    /// reference may have an empty class name.
    pub fn class_name(&self) -> &str {
        &self.inner.class_name
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Calls `operation` and unflattens the result as `T`.
    ///
    /// Fails with [`RomError::UnknownObject`] without touching the wire
    /// once this handle has been released.
    pub async fn invoke<T>(&self, operation: &str, params: Props) -> Result<T, RomError>
    where
        T: Unflatten<RomManager>,
    {
        self.ensure_live()?;
        let manager = self.manager()?;
        let raw = manager
            .client()
            .invoke(&self.inner.reference, operation, params)
            .await?;
        let value = unwrap_value(raw, &T::rom_type());
        T::unflatten(&value, &manager).map_err(|e| RomError::Protocol {
            reason: format!("result of '{operation}': {e}"),
        })
    }

    /// Like [`invoke`](Self::invoke), but returns immediately and hands the
    /// outcome to `continuation`.
    ///
    /// A panicking continuation is logged; it never reaches the transport.
    pub fn invoke_with<T, F>(&self, operation: &str, params: Props, continuation: F)
    where
        T: Unflatten<RomManager> + Send + 'static,
        F: FnOnce(Result<T, RomError>) + Send + 'static,
    {
        let object = self.clone();
        let operation = operation.to_string();
        spawn_detached(async move {
            let result = object.invoke::<T>(&operation, params).await;
            if catch_unwind(AssertUnwindSafe(|| continuation(result))).is_err() {
                warn!(reference = %object.inner.reference, %operation, "invoke continuation panicked");
            }
        });
    }

    /// Releases the server object without waiting for acknowledgement.
    ///
    /// The handle is detached at once: listeners are dropped and the
    /// manager forgets the reference. Releasing twice is a no-op.
    pub fn release(&self) {
        let Ok(manager) = self.manager() else {
            self.detach();
            return;
        };
        if !self.detach() {
            return;
        }
        let reference = self.inner.reference.clone();
        spawn_detached(async move {
            if let Err(e) = manager.client().release(&reference).await {
                debug!(%reference, error = %e, "release failed");
            }
        });
    }

    /// Releases the server object and waits for the server to confirm.
    pub async fn release_and_wait(&self) -> Result<(), RomError> {
        let manager = self.manager()?;
        if !self.detach() {
            return Ok(());
        }
        manager.client().release(&self.inner.reference).await
    }

    /// Subscribes to events of type `E::TYPE`.
    ///
    /// Payloads that don't unflatten as `E` are logged and dropped.
    pub async fn add_listener<E, F>(&self, handler: F) -> Result<ListenerSubscription, RomError>
    where
        E: RomEvent,
        F: Fn(E) + Send + Sync + 'static,
    {
        let callback: ListenerFn = Arc::new(move |data: &Value, manager: &RomManager| {
            match E::unflatten(data, manager) {
                Ok(event) => handler(event),
                Err(e) => warn!(event_type = E::TYPE, error = %e, "event payload dropped"),
            }
        });
        self.subscribe_callback(E::TYPE, callback).await
    }

    /// Subscribes to an event type with an untyped handler.
    pub async fn on_event<F>(&self, event_type: &str, handler: F) -> Result<ListenerSubscription, RomError>
    where
        F: Fn(Props) + Send + Sync + 'static,
    {
        let callback: ListenerFn = Arc::new(move |data: &Value, _: &RomManager| handler(payload_props(data)));
        self.subscribe_callback(event_type, callback).await
    }

    /// Removes a listener and unsubscribes it on the server.
    pub async fn remove_listener(&self, listener: &ListenerSubscription) -> Result<(), RomError> {
        let removed = {
            let mut listeners = self.inner.listeners.lock();
            let before = listeners.len();
            listeners.retain(|l| l.subscription != listener.subscription);
            before != listeners.len()
        };
        if !removed || self.is_released() {
            return Ok(());
        }
        let manager = self.manager()?;
        manager
            .client()
            .unsubscribe(&self.inner.reference, &listener.subscription)
            .await
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    async fn subscribe_callback(
        &self,
        event_type: &str,
        callback: ListenerFn,
    ) -> Result<ListenerSubscription, RomError> {
        self.ensure_live()?;
        let manager = self.manager()?;
        let subscription = manager
            .client()
            .subscribe(&self.inner.reference, event_type)
            .await?;
        self.inner.listeners.lock().push(Listener {
            event_type: event_type.to_string(),
            subscription: subscription.clone(),
            callback,
        });
        debug!(reference = %self.inner.reference, event_type, %subscription, "listener added");
        Ok(ListenerSubscription {
            event_type: event_type.to_string(),
            subscription,
        })
    }

    /// Runs every listener matching the event. Returns how many ran.
    pub(crate) fn dispatch(&self, event: &EventNotification, manager: &RomManager) -> usize {
        let callbacks: Vec<ListenerFn> = self
            .inner
            .listeners
            .lock()
            .iter()
            .filter(|l| {
                l.event_type == event.event_type
                    && event
                        .subscription
                        .as_ref()
                        .is_none_or(|id| *id == l.subscription)
            })
            .map(|l| Arc::clone(&l.callback))
            .collect();

        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&event.data, manager))).is_err() {
                warn!(
                    reference = %self.inner.reference,
                    event_type = %event.event_type,
                    "event listener panicked"
                );
            }
        }
        callbacks.len()
    }

    /// Marks the handle released. Returns false if it already was.
    fn detach(&self) -> bool {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.listeners.lock().clear();
        if let Some(inner) = self.inner.manager.upgrade() {
            RomManager::from_inner(inner).forget(&self.inner.reference);
        }
        true
    }

    fn ensure_live(&self) -> Result<(), RomError> {
        if self.is_released() {
            Err(RomError::unknown_object(self.inner.reference.as_str()))
        } else {
            Ok(())
        }
    }

    fn manager(&self) -> Result<RomManager, RomError> {
        self.inner
            .manager
            .upgrade()
            .map(RomManager::from_inner)
            .ok_or_else(|| RomError::Transport {
                reason: "object manager dropped".into(),
            })
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("reference", &self.inner.reference)
            .field("class_name", &self.inner.class_name)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Handles are equal when they name the same reference.
impl PartialEq for RemoteObject {
    fn eq(&self, other: &Self) -> bool {
        self.inner.reference == other.inner.reference
    }
}

impl Eq for RemoteObject {}

impl Flatten for RemoteObject {
    fn flatten(&self) -> Value {
        Value::String(self.inner.reference.clone())
    }
}

impl Unflatten<RomManager> for RemoteObject {
    fn rom_type() -> RomType {
        RomType::RemoteRef("RemoteObject")
    }

    fn unflatten(value: &Value, manager: &RomManager) -> Result<Self, FlattenError> {
        manager.bind_as(value, "")
    }
}

/// Event data as a bag; a non-object payload lands under `value`.
fn payload_props(data: &Value) -> Props {
    match data {
        Value::Object(map) => Props::from(map.clone()),
        Value::Null => Props::new(),
        other => Props::new().with(param::VALUE, other.clone()),
    }
}

/// Spawns on the current runtime, or logs when there is none.
pub(crate) fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => warn!("no tokio runtime, background call dropped"),
    }
}
