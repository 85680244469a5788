//! Server-side remote object registry.
//!
//! The registry owns every live server object. Clients never hold the
//! objects themselves, only opaque references minted here:
//!
//! ```text
//!   create("Counter", {start: 5})  ──►  "9f2c…e1_Counter"
//!   invoke("9f2c…e1_Counter", "increment", {by: 1})  ──►  6
//!   release("9f2c…e1_Counter")
//! ```
//!
//! # Implementing a class
//!
//! A class is any type implementing [`RemoteClass`], registered under a
//! name together with a constructor:
//!
//! ```rust
//! use romwire_rom::{Flatten, ObjectContext, Props, RemoteClass, RemoteObjectRegistry, RomError, Value};
//! use std::sync::atomic::{AtomicI64, Ordering};
//!
//! struct Counter(AtomicI64);
//!
//! impl RemoteClass for Counter {
//!     fn invoke(&self, operation: &str, params: &Props, cx: &ObjectContext) -> Result<Value, RomError> {
//!         match operation {
//!             "increment" => {
//!                 let by: i64 = cx.param(params, "by")?;
//!                 Ok((self.0.fetch_add(by, Ordering::SeqCst) + by).flatten())
//!             }
//!             other => Err(cx.unknown_operation(other)),
//!         }
//!     }
//! }
//!
//! let registry = RemoteObjectRegistry::new();
//! registry.register_class("Counter", |props, cx| {
//!     let start: Option<i64> = cx.param(props, "start")?;
//!     Ok(Counter(AtomicI64::new(start.unwrap_or(0))))
//! });
//!
//! let reference = registry.create("Counter", &Props::new().with("start", 5)).unwrap();
//! let result = registry.invoke(&reference, "increment", &Props::new().with("by", 1)).unwrap();
//! assert_eq!(result, 6);
//! ```
//!
//! # Release and in-flight calls
//!
//! `invoke` clones a strong handle to the instance before calling it and
//! holds it for the call's duration. `release` only removes the map entry.
//! Calls that already started finish on the instance they hold; every
//! later call fails with [`RomError::UnknownObject`]. The instance is
//! dropped once the last in-flight call returns.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use romwire_protocol::{Props, Value};
use tracing::{debug, error, info, warn};

use crate::event::{EventNotification, EventSink};
use crate::flatten::{Flatten, RomType, Unflatten, property};
use crate::{FlattenError, RomError};

/// Upcast helper so callers can downcast `dyn RemoteClass` to the
/// concrete type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A server-side class whose instances can be driven remotely.
///
/// Operations are dispatched by name. Parameters arrive as a property bag
/// and the result is returned already flattened.
pub trait RemoteClass: AsAny + Send + Sync + 'static {
    fn invoke(
        &self,
        operation: &str,
        params: &Props,
        cx: &ObjectContext,
    ) -> Result<Value, RomError>;
}

type Constructor =
    Arc<dyn Fn(&Props, &ObjectContext) -> Result<Arc<dyn RemoteClass>, RomError> + Send + Sync>;

struct ObjectEntry {
    class_name: String,
    instance: Arc<dyn RemoteClass>,
}

struct Subscription {
    reference: String,
    event_type: String,
    owner: String,
    sink: Arc<dyn EventSink>,
}

#[derive(Default)]
struct Inner {
    classes: RwLock<HashMap<String, Constructor>>,
    objects: RwLock<HashMap<String, ObjectEntry>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

/// The server's table of classes, live objects, and event subscriptions.
///
/// Cheap to clone; clones share the same tables.
#[derive(Clone, Default)]
pub struct RemoteObjectRegistry {
    inner: Arc<Inner>,
}

impl RemoteObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `class_name` with its constructor. A later registration
    /// under the same name replaces the earlier one.
    pub fn register_class<T, F>(&self, class_name: impl Into<String>, constructor: F)
    where
        T: RemoteClass,
        F: Fn(&Props, &ObjectContext) -> Result<T, RomError> + Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(move |props: &Props, cx: &ObjectContext| {
            constructor(props, cx).map(|object| Arc::new(object) as Arc<dyn RemoteClass>)
        });
        self.inner
            .classes
            .write()
            .insert(class_name.into(), constructor);
    }

    pub fn has_class(&self, class_name: &str) -> bool {
        self.inner.classes.read().contains_key(class_name)
    }

    /// Constructs an instance of `class_name` and returns its new reference.
    ///
    /// A constructor that fails or panics yields
    /// [`RomError::ConstructionError`]; nothing is registered.
    pub fn create(&self, class_name: &str, constructor_params: &Props) -> Result<String, RomError> {
        let constructor = self
            .inner
            .classes
            .read()
            .get(class_name)
            .cloned()
            .ok_or_else(|| RomError::UnknownClass {
                class: class_name.to_string(),
            })?;

        let reference = mint_reference(class_name);
        let cx = ObjectContext {
            reference: reference.clone(),
            class_name: class_name.to_string(),
            registry: self.clone(),
        };

        let construction_error = |reason: String| RomError::ConstructionError {
            class: class_name.to_string(),
            reason,
        };
        let instance = match catch_unwind(AssertUnwindSafe(|| constructor(constructor_params, &cx)))
        {
            Ok(Ok(instance)) => instance,
            Ok(Err(RomError::ConstructionError { class, reason })) => {
                return Err(RomError::ConstructionError { class, reason });
            }
            Ok(Err(err)) => return Err(construction_error(err.to_string())),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(class = class_name, %reason, "constructor panicked");
                return Err(construction_error(reason));
            }
        };

        self.inner.objects.write().insert(
            reference.clone(),
            ObjectEntry {
                class_name: class_name.to_string(),
                instance,
            },
        );
        info!(class = class_name, %reference, "object created");
        Ok(reference)
    }

    /// Runs `operation` on the object behind `reference`.
    pub fn invoke(&self, reference: &str, operation: &str, params: &Props) -> Result<Value, RomError> {
        let (class_name, instance) = {
            let objects = self.inner.objects.read();
            let entry = objects
                .get(reference)
                .ok_or_else(|| RomError::unknown_object(reference))?;
            (entry.class_name.clone(), Arc::clone(&entry.instance))
        };

        let cx = ObjectContext {
            reference: reference.to_string(),
            class_name,
            registry: self.clone(),
        };
        debug!(%reference, operation, "invoke");
        match catch_unwind(AssertUnwindSafe(|| instance.invoke(operation, params, &cx))) {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(%reference, operation, %reason, "operation panicked");
                Err(RomError::fault(format!("operation '{operation}' panicked: {reason}")))
            }
        }
    }

    /// Removes the object and its subscriptions. Returns whether it was
    /// registered; releasing twice is not an error.
    pub fn release(&self, reference: &str) -> bool {
        let removed = self.inner.objects.write().remove(reference).is_some();
        if removed {
            self.inner
                .subscriptions
                .lock()
                .retain(|_, sub| sub.reference != reference);
            info!(%reference, "object released");
        } else {
            debug!(%reference, "release of unknown object ignored");
        }
        removed
    }

    /// Registers `sink` for events of `event_type` fired by `reference`.
    ///
    /// `owner` tags the subscription so every subscription of one session
    /// can be dropped at once with [`drop_owner`](Self::drop_owner).
    pub fn subscribe(
        &self,
        reference: &str,
        event_type: &str,
        owner: &str,
        sink: Arc<dyn EventSink>,
    ) -> Result<String, RomError> {
        if !self.contains(reference) {
            return Err(RomError::unknown_object(reference));
        }
        let subscription = generate_token();
        self.inner.subscriptions.lock().insert(
            subscription.clone(),
            Subscription {
                reference: reference.to_string(),
                event_type: event_type.to_string(),
                owner: owner.to_string(),
                sink,
            },
        );
        debug!(%reference, event_type, %subscription, owner, "subscribed");
        Ok(subscription)
    }

    /// Removes one subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, reference: &str, subscription: &str) -> bool {
        let mut subscriptions = self.inner.subscriptions.lock();
        match subscriptions.get(subscription) {
            Some(sub) if sub.reference == reference => {
                subscriptions.remove(subscription);
                debug!(%reference, %subscription, "unsubscribed");
                true
            }
            _ => false,
        }
    }

    /// Drops every subscription tagged with `owner`.
    pub fn drop_owner(&self, owner: &str) -> usize {
        let mut subscriptions = self.inner.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|_, sub| sub.owner != owner);
        let dropped = before - subscriptions.len();
        if dropped > 0 {
            debug!(owner, dropped, "subscriptions dropped");
        }
        dropped
    }

    /// Resolves a reference to its live object.
    pub fn lookup(&self, reference: &str) -> Option<ServerObject> {
        self.inner
            .objects
            .read()
            .get(reference)
            .map(|entry| ServerObject {
                reference: reference.to_string(),
                class_name: entry.class_name.clone(),
                instance: Arc::clone(&entry.instance),
            })
    }

    /// Runs `f` against the concrete instance behind `reference`.
    pub fn with_object<T, R>(&self, reference: &str, f: impl FnOnce(&T) -> R) -> Result<R, RomError>
    where
        T: RemoteClass,
    {
        let object = self
            .lookup(reference)
            .ok_or_else(|| RomError::unknown_object(reference))?;
        let concrete = object
            .downcast_ref::<T>()
            .ok_or_else(|| RomError::InvalidParams {
                reason: format!("'{reference}' is a {}", object.class_name),
            })?;
        Ok(f(concrete))
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.inner.objects.read().contains_key(reference)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.inner.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    fn fire(&self, reference: &str, event_type: &str, data: Value) -> usize {
        let targets: Vec<(String, Arc<dyn EventSink>)> = self
            .inner
            .subscriptions
            .lock()
            .iter()
            .filter(|(_, sub)| sub.reference == reference && sub.event_type == event_type)
            .map(|(id, sub)| (id.clone(), Arc::clone(&sub.sink)))
            .collect();

        let mut delivered = 0;
        for (subscription, sink) in targets {
            let event = EventNotification::new(reference, event_type, data.clone())
                .with_subscription(subscription.as_str());
            match sink.deliver(event) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(%reference, event_type, %subscription, error = %e, "event not delivered"),
            }
        }
        delivered
    }
}

impl fmt::Debug for RemoteObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObjectRegistry")
            .field("classes", &self.inner.classes.read().len())
            .field("objects", &self.len())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// What a server object sees while it is constructed or invoked.
pub struct ObjectContext {
    reference: String,
    class_name: String,
    registry: RemoteObjectRegistry,
}

impl ObjectContext {
    /// This object's reference.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The registry, for operations that create or look up other objects.
    pub fn registry(&self) -> &RemoteObjectRegistry {
        &self.registry
    }

    /// Unflattens a named parameter, resolving references through the
    /// registry.
    pub fn param<T>(&self, params: &Props, name: &str) -> Result<T, RomError>
    where
        T: Unflatten<RemoteObjectRegistry>,
    {
        property(params.get(name), &self.class_name, name, &self.registry).map_err(RomError::from)
    }

    /// A handle for firing this object's events, usable after the call
    /// returns (from a spawned task, for instance).
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            reference: self.reference.clone(),
            registry: Arc::downgrade(&self.registry.inner),
        }
    }

    /// Fires an event right away. Returns the number of subscriptions it
    /// reached.
    pub fn fire(&self, event_type: &str, data: &impl Flatten) -> usize {
        self.registry.fire(&self.reference, event_type, data.flatten())
    }

    /// The error for an operation this class doesn't define.
    pub fn unknown_operation(&self, operation: &str) -> RomError {
        RomError::unknown_operation(self.class_name.as_str(), operation)
    }
}

/// Fires events on behalf of one object.
///
/// Holds the registry weakly, so a publisher kept by the object itself
/// doesn't keep the registry alive.
#[derive(Clone)]
pub struct EventPublisher {
    reference: String,
    registry: Weak<Inner>,
}

impl EventPublisher {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Fires `event_type` with `data` to every subscription. Returns the
    /// number reached; zero once the registry is gone.
    pub fn fire(&self, event_type: &str, data: &impl Flatten) -> usize {
        match self.registry.upgrade() {
            Some(inner) => RemoteObjectRegistry { inner }.fire(&self.reference, event_type, data.flatten()),
            None => 0,
        }
    }
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("reference", &self.reference)
            .finish()
    }
}

/// A reference resolved against the registry, used for parameters that
/// name another server object.
#[derive(Clone)]
pub struct ServerObject {
    reference: String,
    class_name: String,
    instance: Arc<dyn RemoteClass>,
}

impl ServerObject {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn downcast_ref<T: RemoteClass>(&self) -> Option<&T> {
        let object: &dyn RemoteClass = &*self.instance;
        object.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for ServerObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerObject")
            .field("reference", &self.reference)
            .field("class_name", &self.class_name)
            .finish()
    }
}

impl PartialEq for ServerObject {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Flatten for ServerObject {
    fn flatten(&self) -> Value {
        Value::String(self.reference.clone())
    }
}

impl Unflatten<RemoteObjectRegistry> for ServerObject {
    fn rom_type() -> RomType {
        RomType::RemoteRef("object")
    }

    fn unflatten(value: &Value, registry: &RemoteObjectRegistry) -> Result<Self, FlattenError> {
        let reference = value
            .as_str()
            .ok_or_else(|| FlattenError::mismatch("object reference", value))?;
        registry
            .lookup(reference)
            .ok_or_else(|| FlattenError::UnknownReference(reference.to_string()))
    }
}

fn mint_reference(class_name: &str) -> String {
    format!("{}_{class_name}", generate_token())
}

fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
