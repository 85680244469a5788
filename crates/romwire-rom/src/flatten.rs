//! Value marshalling between typed Rust values and their wire form.
//!
//! Every value that crosses the wire belongs to one of the categories in
//! [`RomType`]. Flattening is always possible: any typed value can be
//! rendered as JSON. Unflattening is not: the JSON may have the wrong
//! shape, an enum name may be unknown, or a remote reference may not
//! resolve. That asymmetry is why [`Flatten`] is infallible and
//! [`Unflatten`] returns a [`FlattenError`].
//!
//! Unflattening a remote reference needs somewhere to look the reference
//! up. On a server that is the object registry, on a client it is the
//! proxy manager. [`Unflatten`] is generic over that lookup context `C`;
//! plain data types work with any context.
//!
//! ```rust
//! use romwire_rom::{Flatten, Unflatten};
//!
//! let wire = vec![1, 2, 3].flatten();
//! let back: Vec<i32> = Unflatten::unflatten(&wire, &()).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

use std::fmt;

use romwire_protocol::{Props, Value, param};
use serde_json::Map;

use crate::FlattenError;

/// The category of a value that can cross the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RomType {
    /// No value (an operation with no result).
    Void,
    Int,
    Float,
    Bool,
    String,
    /// An enumeration, rendered as the variant's name.
    Enum(&'static str),
    /// A structured record, rendered as a property bag.
    Struct(&'static str),
    List(Box<RomType>),
    /// A remote object, rendered as its reference string.
    RemoteRef(&'static str),
}

impl RomType {
    /// Whether results of this type may arrive wrapped as `{"value": x}`.
    pub fn is_wrapped_on_wire(&self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Float
                | Self::Bool
                | Self::String
                | Self::Enum(_)
                | Self::List(_)
                | Self::RemoteRef(_)
        )
    }
}

impl fmt::Display for RomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "boolean"),
            Self::String => write!(f, "String"),
            Self::Enum(name) | Self::Struct(name) | Self::RemoteRef(name) => write!(f, "{name}"),
            Self::List(inner) => write!(f, "List<{inner}>"),
        }
    }
}

/// Renders a typed value as JSON.
pub trait Flatten {
    fn flatten(&self) -> Value;
}

/// Rebuilds a typed value from JSON.
///
/// `C` is the context that resolves remote references. Data types
/// implement this for every `C`; remote object types only for the context
/// that can resolve them.
pub trait Unflatten<C: ?Sized = ()>: Sized {
    /// The wire category of this type.
    fn rom_type() -> RomType;

    fn unflatten(value: &Value, cx: &C) -> Result<Self, FlattenError>;

    /// The value an absent property stands for. Only optional targets
    /// have one; everything else reports the property as missing.
    fn missing() -> Option<Self> {
        None
    }
}

/// Strips the `{"value": x}` wrapper from a result whose target type
/// travels wrapped.
///
/// Peers wrap non-object results so the response always carries an
/// object. An empty object is an absent result and reads as null. A bare
/// value is returned as is.
pub fn unwrap_value(value: Value, ty: &RomType) -> Value {
    if !ty.is_wrapped_on_wire() {
        return value;
    }
    match value {
        Value::Object(map) if map.is_empty() => Value::Null,
        Value::Object(mut map) if map.len() == 1 && map.contains_key(param::VALUE) => {
            map.remove(param::VALUE).unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Reads one property of a struct or parameter bag.
///
/// A missing property comes out as `None` for `Option` targets. Any other
/// target reports it as a [`FlattenError::MissingProperty`], even one that
/// would accept an explicit null.
#[doc(hidden)]
pub fn property<T, C>(found: Option<&Value>, ty: &str, name: &str, cx: &C) -> Result<T, FlattenError>
where
    T: Unflatten<C>,
    C: ?Sized,
{
    match found {
        Some(value) => T::unflatten(value, cx),
        None => T::missing().ok_or_else(|| FlattenError::MissingProperty {
            ty: ty.to_string(),
            name: name.to_string(),
        }),
    }
}

/// Typed access to a [`Props`] bag.
pub trait PropsExt {
    /// Unflattens the named property.
    fn param<T, C>(&self, name: &str, cx: &C) -> Result<T, FlattenError>
    where
        T: Unflatten<C>,
        C: ?Sized;

    /// Flattens `value` into the named property.
    fn set(&mut self, name: impl Into<String>, value: &(impl Flatten + ?Sized));
}

impl PropsExt for Props {
    fn param<T, C>(&self, name: &str, cx: &C) -> Result<T, FlattenError>
    where
        T: Unflatten<C>,
        C: ?Sized,
    {
        property(self.get(name), "parameters", name, cx)
    }

    fn set(&mut self, name: impl Into<String>, value: &(impl Flatten + ?Sized)) {
        self.insert(name, value.flatten());
    }
}

// Primitives

impl Flatten for () {
    fn flatten(&self) -> Value {
        Value::Null
    }
}

impl<C: ?Sized> Unflatten<C> for () {
    fn rom_type() -> RomType {
        RomType::Void
    }

    /// Whatever a void operation returns is discarded.
    fn unflatten(_value: &Value, _cx: &C) -> Result<Self, FlattenError> {
        Ok(())
    }
}

impl Flatten for bool {
    fn flatten(&self) -> Value {
        Value::Bool(*self)
    }
}

impl<C: ?Sized> Unflatten<C> for bool {
    fn rom_type() -> RomType {
        RomType::Bool
    }

    fn unflatten(value: &Value, _cx: &C) -> Result<Self, FlattenError> {
        value
            .as_bool()
            .ok_or_else(|| FlattenError::mismatch("boolean", value))
    }
}

macro_rules! impl_int {
    ($as_wide:ident: $($ty:ty),*) => {$(
        impl Flatten for $ty {
            fn flatten(&self) -> Value {
                Value::from(*self)
            }
        }

        impl<C: ?Sized> Unflatten<C> for $ty {
            fn rom_type() -> RomType {
                RomType::Int
            }

            fn unflatten(value: &Value, _cx: &C) -> Result<Self, FlattenError> {
                value
                    .$as_wide()
                    .and_then(|n| <$ty>::try_from(n).ok())
                    .ok_or_else(|| FlattenError::mismatch(stringify!($ty), value))
            }
        }
    )*};
}

impl_int!(as_i64: i32, i64);
impl_int!(as_u64: u32, u64);

impl Flatten for f64 {
    fn flatten(&self) -> Value {
        Value::from(*self)
    }
}

impl<C: ?Sized> Unflatten<C> for f64 {
    fn rom_type() -> RomType {
        RomType::Float
    }

    /// Integers are accepted: `1` and `1.0` are the same number on the wire.
    fn unflatten(value: &Value, _cx: &C) -> Result<Self, FlattenError> {
        value
            .as_f64()
            .ok_or_else(|| FlattenError::mismatch("float", value))
    }
}

impl Flatten for f32 {
    fn flatten(&self) -> Value {
        Value::from(f64::from(*self))
    }
}

impl<C: ?Sized> Unflatten<C> for f32 {
    fn rom_type() -> RomType {
        RomType::Float
    }

    fn unflatten(value: &Value, cx: &C) -> Result<Self, FlattenError> {
        <f64 as Unflatten<C>>::unflatten(value, cx).map(|n| n as f32)
    }
}

impl Flatten for str {
    fn flatten(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl Flatten for String {
    fn flatten(&self) -> Value {
        Value::String(self.clone())
    }
}

impl<C: ?Sized> Unflatten<C> for String {
    fn rom_type() -> RomType {
        RomType::String
    }

    fn unflatten(value: &Value, _cx: &C) -> Result<Self, FlattenError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FlattenError::mismatch("String", value))
    }
}

// Containers

impl<T: Flatten + ?Sized> Flatten for &T {
    fn flatten(&self) -> Value {
        (**self).flatten()
    }
}

impl<T: Flatten> Flatten for [T] {
    fn flatten(&self) -> Value {
        Value::Array(self.iter().map(Flatten::flatten).collect())
    }
}

impl<T: Flatten> Flatten for Vec<T> {
    fn flatten(&self) -> Value {
        self.as_slice().flatten()
    }
}

impl<T, C> Unflatten<C> for Vec<T>
where
    T: Unflatten<C>,
    C: ?Sized,
{
    fn rom_type() -> RomType {
        RomType::List(Box::new(T::rom_type()))
    }

    fn unflatten(value: &Value, cx: &C) -> Result<Self, FlattenError> {
        let items = value
            .as_array()
            .ok_or_else(|| FlattenError::mismatch(Self::rom_type().to_string(), value))?;
        items.iter().map(|item| T::unflatten(item, cx)).collect()
    }
}

impl<T: Flatten> Flatten for Option<T> {
    fn flatten(&self) -> Value {
        self.as_ref().map_or(Value::Null, Flatten::flatten)
    }
}

impl<T, C> Unflatten<C> for Option<T>
where
    T: Unflatten<C>,
    C: ?Sized,
{
    fn rom_type() -> RomType {
        T::rom_type()
    }

    fn unflatten(value: &Value, cx: &C) -> Result<Self, FlattenError> {
        match value {
            Value::Null => Ok(None),
            // An absent struct result arrives as `{}`.
            Value::Object(map) if map.is_empty() => Ok(T::unflatten(value, cx).ok()),
            other => T::unflatten(other, cx).map(Some),
        }
    }

    fn missing() -> Option<Self> {
        Some(None)
    }
}

impl Flatten for Props {
    fn flatten(&self) -> Value {
        self.clone().into()
    }
}

impl<C: ?Sized> Unflatten<C> for Props {
    fn rom_type() -> RomType {
        RomType::Struct("Props")
    }

    fn unflatten(value: &Value, _cx: &C) -> Result<Self, FlattenError> {
        value
            .as_object()
            .cloned()
            .map(Props::from)
            .ok_or_else(|| FlattenError::mismatch("Props", value))
    }
}

impl Flatten for Value {
    fn flatten(&self) -> Value {
        self.clone()
    }
}

/// Raw JSON passes through untouched.
impl<C: ?Sized> Unflatten<C> for Value {
    fn rom_type() -> RomType {
        RomType::Struct("Value")
    }

    fn unflatten(value: &Value, _cx: &C) -> Result<Self, FlattenError> {
        Ok(value.clone())
    }
}

/// Builds a struct's property bag, skipping unset optional properties.
#[doc(hidden)]
pub fn struct_props(fields: impl IntoIterator<Item = (String, Value)>) -> Value {
    let map: Map<String, Value> = fields
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect();
    Value::Object(map)
}
