//! Event notifications.
//!
//! When a server object fires an event, every session subscribed to that
//! `(object, type)` pair receives an `onEvent` notification:
//!
//! ```text
//! {"object": <ref>, "subscription": <id>, "type": <eventType>, "data": <props>}
//! ```

use romwire_protocol::{Props, Value, param};

use crate::RomError;

/// One fired event as it travels on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EventNotification {
    /// Reference of the object that fired.
    pub object: String,
    /// Subscription the event is delivered under. Absent when a peer
    /// broadcasts without subscription ids.
    pub subscription: Option<String>,
    pub event_type: String,
    pub data: Value,
}

impl EventNotification {
    pub fn new(object: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            object: object.into(),
            subscription: None,
            event_type: event_type.into(),
            data,
        }
    }

    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = Some(subscription.into());
        self
    }

    /// The `onEvent` params for this event.
    pub fn to_params(&self) -> Value {
        let mut props = Props::new()
            .with(param::OBJECT, self.object.as_str())
            .with(param::TYPE, self.event_type.as_str())
            .with(param::DATA, self.data.clone());
        if let Some(subscription) = &self.subscription {
            props.insert(param::SUBSCRIPTION, subscription.as_str());
        }
        props.into()
    }

    /// Parses `onEvent` params.
    ///
    /// Params wrapped in a single `value` property are unwrapped first.
    pub fn from_params(params: Option<Value>) -> Result<Self, RomError> {
        let mut props = Props::from_params(params)?;
        if props.len() == 1 {
            if let Some(Value::Object(inner)) = props.remove(param::VALUE) {
                props = Props::from(inner);
            }
        }
        let object = props.require_str(param::OBJECT)?.to_string();
        let event_type = props.require_str(param::TYPE)?.to_string();
        let subscription = props.get_str(param::SUBSCRIPTION).map(str::to_string);
        let data = props.remove(param::DATA).unwrap_or(Value::Null);
        Ok(Self {
            object,
            subscription,
            event_type,
            data,
        })
    }
}

/// Where a server-side subscription delivers its events.
///
/// The engine implements this over a session (`onEvent` notification);
/// [`LocalRomClient`](crate::LocalRomClient) implements it in process.
pub trait EventSink: Send + Sync + 'static {
    fn deliver(&self, event: EventNotification) -> Result<(), RomError>;
}

impl<F> EventSink for F
where
    F: Fn(EventNotification) -> Result<(), RomError> + Send + Sync + 'static,
{
    fn deliver(&self, event: EventNotification) -> Result<(), RomError> {
        self(event)
    }
}
