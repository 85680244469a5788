//! Declarative mappings for enums, structs, and remote proxies.
//!
//! These macros generate the [`Flatten`](crate::Flatten) /
//! [`Unflatten`](crate::Unflatten) impls a hand-written mapping would
//! need, so a domain type is declared once and marshals the same way on
//! both ends.

/// Declares an enumeration that travels as its variant name.
///
/// ```rust
/// romwire_rom::rom_enum! {
///     pub enum Direction { UP, DOWN }
/// }
///
/// use romwire_rom::{Flatten, Unflatten};
/// assert_eq!(Direction::UP.flatten(), "UP");
/// let back: Direction = Unflatten::unflatten(&"DOWN".into(), &()).unwrap();
/// assert_eq!(back, Direction::DOWN);
/// ```
#[macro_export]
macro_rules! rom_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(non_camel_case_types, clippy::upper_case_acronyms)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub const VARIANTS: &'static [$name] = &[$($name::$variant),+];

            /// The wire name of this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => stringify!($variant) ),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl $crate::Flatten for $name {
            fn flatten(&self) -> $crate::Value {
                $crate::Value::String(self.as_str().to_string())
            }
        }

        impl<C: ?Sized> $crate::Unflatten<C> for $name {
            fn rom_type() -> $crate::RomType {
                $crate::RomType::Enum(stringify!($name))
            }

            fn unflatten(
                value: &$crate::Value,
                _cx: &C,
            ) -> ::std::result::Result<Self, $crate::FlattenError> {
                let found = value
                    .as_str()
                    .ok_or_else(|| $crate::FlattenError::mismatch(stringify!($name), value))?;
                match found {
                    $( stringify!($variant) => Ok($name::$variant), )+
                    other => Err($crate::FlattenError::UnknownEnumValue {
                        ty: stringify!($name).to_string(),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Declares a record that travels as a property bag.
///
/// Field names map to lowerCamelCase property names. `Option` fields may
/// be absent on the wire; every other field is required.
///
/// ```rust
/// romwire_rom::rom_struct! {
///     pub struct Range {
///         pub low: i32,
///         pub high_mark: Option<i32>,
///     }
/// }
///
/// use romwire_rom::{Flatten, Unflatten};
/// let wire = Range { low: 1, high_mark: Some(9) }.flatten();
/// assert_eq!(wire["highMark"], 9);
/// let partial: Range = Unflatten::unflatten(&serde_json::json!({"low": 3}), &()).unwrap();
/// assert_eq!(partial.high_mark, None);
/// ```
#[macro_export]
macro_rules! rom_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $fty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field: $fty ),*
        }

        impl $crate::Flatten for $name {
            fn flatten(&self) -> $crate::Value {
                $crate::flatten::struct_props(::std::vec![
                    $((
                        $crate::naming::property_name(stringify!($field)),
                        $crate::Flatten::flatten(&self.$field),
                    )),*
                ])
            }
        }

        impl<C: ?Sized> $crate::Unflatten<C> for $name
        where
            $( $fty: $crate::Unflatten<C>, )*
        {
            fn rom_type() -> $crate::RomType {
                $crate::RomType::Struct(stringify!($name))
            }

            fn unflatten(
                value: &$crate::Value,
                cx: &C,
            ) -> ::std::result::Result<Self, $crate::FlattenError> {
                #[allow(unused_variables)]
                let object = value
                    .as_object()
                    .ok_or_else(|| $crate::FlattenError::mismatch(stringify!($name), value))?;
                Ok(Self {
                    $(
                        $field: {
                            let key = $crate::naming::property_name(stringify!($field));
                            $crate::flatten::property(
                                object.get(key.as_str()),
                                stringify!($name),
                                &key,
                                cx,
                            )?
                        },
                    )*
                })
            }
        }
    };
}

/// Declares a typed client proxy for a remote class.
///
/// Each declared method becomes an `async fn` that invokes the snake_case
/// name as a lowerCamelCase operation, with parameters named the same
/// way, and unflattens the result as the declared return type.
///
/// An optional `builder` section declares the constructor parameters. It
/// generates a builder type with one setter per parameter and an
/// associated `Proxy::builder(&manager)`. Boolean parameters listed under
/// `flags` get a pair of bare setters instead: the first sets the
/// parameter to `true`, the second to `false`.
///
/// ```rust,ignore
/// romwire_rom::remote_proxy! {
///     pub struct CounterProxy: "Counter" {
///         builder CounterBuilder {
///             start: i32,
///         }
///         flags {
///             persistent / not_persistent,
///         }
///         fn increment(by: i32) -> i32;
///         fn get_value() -> i32;
///     }
/// }
///
/// let counter = CounterProxy::builder(&manager).start(5).persistent().build().await?;
/// assert_eq!(counter.increment(1).await?, 6);
/// ```
#[macro_export]
macro_rules! remote_proxy {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : $class:literal {
            $(
                builder $builder:ident {
                    $( $prop:ident : $pty:ty ),* $(,)?
                }
                $(
                    flags {
                        $( $flag:ident / $not_flag:ident ),* $(,)?
                    }
                )?
            )?
            $(
                $(#[$mmeta:meta])*
                fn $method:ident ( $( $arg:ident : $aty:ty ),* $(,)? ) -> $ret:ty ;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $name {
            object: $crate::RemoteObject,
        }

        impl $crate::RemoteProxy for $name {
            const CLASS: &'static str = $class;

            fn from_object(object: $crate::RemoteObject) -> Self {
                Self { object }
            }

            fn object(&self) -> &$crate::RemoteObject {
                &self.object
            }
        }

        impl $name {
            $(
                $(#[$mmeta])*
                pub async fn $method(
                    &self,
                    $( $arg: $aty ),*
                ) -> ::std::result::Result<$ret, $crate::RomError> {
                    #[allow(unused_mut)]
                    let mut params = $crate::Props::new();
                    $(
                        params.insert(
                            $crate::naming::property_name(stringify!($arg)),
                            $crate::Flatten::flatten(&$arg),
                        );
                    )*
                    self.object
                        .invoke::<$ret>(&$crate::naming::property_name(stringify!($method)), params)
                        .await
                }
            )*
        }

        impl $crate::Flatten for $name {
            fn flatten(&self) -> $crate::Value {
                $crate::Flatten::flatten(&self.object)
            }
        }

        impl $crate::Unflatten<$crate::RomManager> for $name {
            fn rom_type() -> $crate::RomType {
                $crate::RomType::RemoteRef($class)
            }

            fn unflatten(
                value: &$crate::Value,
                manager: &$crate::RomManager,
            ) -> ::std::result::Result<Self, $crate::FlattenError> {
                let object = manager.bind_as(value, $class)?;
                Ok(<Self as $crate::RemoteProxy>::from_object(object))
            }
        }

        $(
            #[doc = concat!("Builds a [`", stringify!($name), "`].")]
            #[derive(Debug)]
            #[must_use = "a builder does nothing until build() is awaited"]
            $vis struct $builder {
                inner: $crate::RemoteObjectBuilder,
            }

            impl $builder {
                $(
                    pub fn $prop(self, value: $pty) -> Self {
                        Self {
                            inner: self
                                .inner
                                .with($crate::naming::property_name(stringify!($prop)), value),
                        }
                    }
                )*

                $($(
                    pub fn $flag(self) -> Self {
                        Self {
                            inner: self
                                .inner
                                .flag($crate::naming::property_name(stringify!($flag))),
                        }
                    }

                    pub fn $not_flag(self) -> Self {
                        Self {
                            inner: self
                                .inner
                                .not($crate::naming::property_name(stringify!($flag))),
                        }
                    }
                )*)?

                /// The constructor parameters set so far.
                pub fn params(&self) -> &$crate::Props {
                    self.inner.params()
                }

                pub async fn build(self) -> ::std::result::Result<$name, $crate::RomError> {
                    self.inner.build_as::<$name>().await
                }
            }

            impl $name {
                pub fn builder(manager: &$crate::RomManager) -> $builder {
                    $builder {
                        inner: manager.builder($class),
                    }
                }
            }
        )?
    };
}
