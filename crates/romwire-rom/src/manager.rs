//! The client-side object manager.
//!
//! [`RomManager`] is the single authority mapping references to
//! [`RemoteObject`] handles on a client. Every handle is created through it,
//! either explicitly (`create`, the builder) or lazily, the first time a
//! reference shows up in a result or event payload. It also receives every
//! inbound event from the [`RomClient`] and routes it to the right handle.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use romwire_protocol::{Props, Value};
use tracing::{debug, warn};

use crate::client::RomClient;
use crate::event::EventNotification;
use crate::flatten::Flatten;
use crate::naming::class_of_reference;
use crate::object::{RemoteObject, RemoteProxy, spawn_detached};
use crate::{FlattenError, RomError};

pub(crate) struct ManagerInner {
    client: Arc<dyn RomClient>,
    objects: Mutex<HashMap<String, RemoteObject>>,
}

/// Owns the reference → handle table of one client.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct RomManager {
    inner: Arc<ManagerInner>,
}

impl RomManager {
    /// Creates a manager over `client` and installs itself as the client's
    /// event handler.
    pub fn new(client: Arc<dyn RomClient>) -> Self {
        let inner = Arc::new(ManagerInner {
            client: Arc::clone(&client),
            objects: Mutex::new(HashMap::new()),
        });
        let weak = Arc::downgrade(&inner);
        client.set_event_handler(Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                RomManager { inner }.dispatch_event(event);
            }
        }));
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    pub fn client(&self) -> &Arc<dyn RomClient> {
        &self.inner.client
    }

    /// Creates a server object and returns its handle.
    pub async fn create(&self, class_name: &str, constructor_params: Props) -> Result<RemoteObject, RomError> {
        let reference = self.inner.client.create(class_name, constructor_params).await?;
        debug!(class = class_name, %reference, "remote object created");
        Ok(self.register(reference, class_name))
    }

    /// Creates a server object of `P::CLASS` and wraps it in the proxy.
    pub async fn create_as<P: RemoteProxy>(&self, constructor_params: Props) -> Result<P, RomError> {
        self.create(P::CLASS, constructor_params)
            .await
            .map(P::from_object)
    }

    /// Like [`create`](Self::create), but returns immediately and hands
    /// the outcome to `continuation`.
    pub fn create_with<F>(&self, class_name: &str, constructor_params: Props, continuation: F)
    where
        F: FnOnce(Result<RemoteObject, RomError>) + Send + 'static,
    {
        let manager = self.clone();
        let class_name = class_name.to_string();
        spawn_detached(async move {
            let result = manager.create(&class_name, constructor_params).await;
            if catch_unwind(AssertUnwindSafe(|| continuation(result))).is_err() {
                warn!(class = %class_name, "create continuation panicked");
            }
        });
    }

    /// Starts a builder for `class_name`.
    pub fn builder(&self, class_name: impl Into<String>) -> RemoteObjectBuilder {
        RemoteObjectBuilder {
            manager: self.clone(),
            class_name: class_name.into(),
            params: Props::new(),
        }
    }

    /// The handle for `reference`, if one exists.
    pub fn get(&self, reference: &str) -> Option<RemoteObject> {
        self.inner.objects.lock().get(reference).cloned()
    }

    /// The handle for `reference`, binding a new one if it isn't known yet.
    ///
    /// A lazily bound handle takes its class name from the reference
    /// suffix when it has one.
    pub fn get_or_bind(&self, reference: &str) -> RemoteObject {
        let class_name = class_of_reference(reference).unwrap_or_default();
        self.register(reference.to_string(), class_name)
    }

    /// The handle for `reference`, wrapped in proxy `P`.
    pub fn proxy<P: RemoteProxy>(&self, reference: &str) -> P {
        P::from_object(self.register(reference.to_string(), P::CLASS))
    }

    /// Resolves a wire reference to a handle, binding it if needed.
    ///
    /// `class_hint` names the class for a new handle; an empty hint falls
    /// back on the reference suffix.
    pub fn bind_as(&self, value: &Value, class_hint: &str) -> Result<RemoteObject, FlattenError> {
        let reference = value
            .as_str()
            .ok_or_else(|| FlattenError::mismatch("object reference", value))?;
        let class_name = if class_hint.is_empty() {
            class_of_reference(reference).unwrap_or_default()
        } else {
            class_hint
        };
        Ok(self.register(reference.to_string(), class_name))
    }

    /// Routes an inbound event to the listeners of its object.
    ///
    /// Events for unknown objects or without a matching listener are
    /// logged and dropped.
    pub fn dispatch_event(&self, event: EventNotification) {
        let Some(object) = self.get(&event.object) else {
            warn!(reference = %event.object, event_type = %event.event_type, "event for unknown object dropped");
            return;
        };
        if object.dispatch(&event, self) == 0 {
            warn!(
                reference = %event.object,
                event_type = %event.event_type,
                subscription = ?event.subscription,
                "unmatched event dropped"
            );
        }
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.inner.objects.lock().contains_key(reference)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.inner.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register(&self, reference: String, class_name: &str) -> RemoteObject {
        let mut objects = self.inner.objects.lock();
        if let Some(existing) = objects.get(&reference) {
            return existing.clone();
        }
        debug!(%reference, class = class_name, "handle bound");
        let object = RemoteObject::new(
            reference.clone(),
            class_name.to_string(),
            Arc::downgrade(&self.inner),
        );
        objects.insert(reference, object.clone());
        object
    }

    pub(crate) fn forget(&self, reference: &str) {
        self.inner.objects.lock().remove(reference);
    }
}

impl fmt::Debug for RomManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RomManager")
            .field("objects", &self.len())
            .finish()
    }
}

/// Accumulates constructor parameters for one `create` call.
///
/// ```rust,ignore
/// let counter = manager
///     .builder("Counter")
///     .with("start", 5)
///     .flag("persistent")
///     .build()
///     .await?;
/// ```
#[derive(Debug)]
#[must_use = "a builder does nothing until build() is awaited"]
pub struct RemoteObjectBuilder {
    manager: RomManager,
    class_name: String,
    params: Props,
}

impl RemoteObjectBuilder {
    /// Sets a constructor parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl Flatten) -> Self {
        self.params.insert(name, value.flatten());
        self
    }

    /// Sets a boolean parameter to `true`.
    pub fn flag(self, name: impl Into<String>) -> Self {
        self.with(name, true)
    }

    /// Sets a boolean parameter to `false`.
    pub fn not(self, name: impl Into<String>) -> Self {
        self.with(name, false)
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The parameters accumulated so far.
    pub fn params(&self) -> &Props {
        &self.params
    }

    /// Issues the `create` and returns the new handle.
    pub async fn build(self) -> Result<RemoteObject, RomError> {
        self.manager.create(&self.class_name, self.params).await
    }

    /// Issues the `create` and wraps the handle in proxy `P`.
    pub async fn build_as<P: RemoteProxy>(self) -> Result<P, RomError> {
        self.build().await.map(P::from_object)
    }

    /// Issues the `create` in the background.
    pub fn build_with<F>(self, continuation: F)
    where
        F: FnOnce(Result<RemoteObject, RomError>) + Send + 'static,
    {
        self.manager
            .create_with(&self.class_name, self.params, continuation);
    }
}
