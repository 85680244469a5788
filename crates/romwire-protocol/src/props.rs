//! The named-value property bag.
//!
//! Constructor parameters, operation parameters, and event payloads all
//! travel as JSON objects. [`Props`] wraps that object with the accessors
//! the engine and the marshaller need.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtocolError;

/// An ordered map of property name → JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Props(Map<String, Value>);

impl Props {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    ///
    /// ```rust
    /// use romwire_protocol::Props;
    ///
    /// let props = Props::new().with("object", "abc").with("count", 3);
    /// assert_eq!(props.get_str("object"), Some("abc"));
    /// ```
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts or replaces a property, returning the previous value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns the property as a string slice, if it is one.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns the property or a [`ProtocolError::MissingParam`].
    pub fn require(&self, name: &str) -> Result<&Value, ProtocolError> {
        self.0
            .get(name)
            .ok_or_else(|| ProtocolError::MissingParam(name.to_string()))
    }

    /// Like [`require`](Self::require), but the value must be a string.
    pub fn require_str(&self, name: &str) -> Result<&str, ProtocolError> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| ProtocolError::InvalidParam {
                name: name.to_string(),
                reason: "expected a string".into(),
            })
    }

    /// Reads an optional nested bag. Absent or `null` yields an empty bag.
    pub fn props(&self, name: &str) -> Result<Props, ProtocolError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(Props::new()),
            Some(Value::Object(map)) => Ok(Props(map.clone())),
            Some(_) => Err(ProtocolError::InvalidParam {
                name: name.to_string(),
                reason: "expected an object".into(),
            }),
        }
    }

    /// Interprets a params value as a bag. `None` and `null` are empty.
    pub fn from_params(params: Option<Value>) -> Result<Self, ProtocolError> {
        match params {
            None | Some(Value::Null) => Ok(Self::new()),
            Some(Value::Object(map)) => Ok(Self(map)),
            Some(other) => Err(ProtocolError::InvalidMessage(format!(
                "params must be an object, got {other}"
            ))),
        }
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Props {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Props> for Value {
    fn from(props: Props) -> Self {
        Value::Object(props.0)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Props {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl IntoIterator for Props {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
