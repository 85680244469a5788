//! Remote Object Model for romwire.
//!
//! This crate turns the JSON-RPC substrate into an object model: a client
//! creates objects on the server, invokes operations on them by name,
//! subscribes to their events, and releases them. Objects are named on the
//! wire by opaque reference strings.
//!
//! - **Marshalling** ([`Flatten`], [`Unflatten`], [`RomType`]): typed
//!   values to and from their wire form, with [`rom_enum!`],
//!   [`rom_struct!`], and [`remote_proxy!`] generating the mappings.
//! - **Server side** ([`RemoteObjectRegistry`], [`RemoteClass`]): the
//!   live object table, dispatch by operation name, and event fan-out.
//! - **Client side** ([`RomManager`], [`RemoteObject`],
//!   [`RemoteObjectBuilder`]): handles, typed proxies, and listeners over
//!   any [`RomClient`].
//!
//! # Architecture
//!
//! ```text
//!   client                                  server
//!   ──────                                  ──────
//!   proxy.get_att3()                        RemoteObjectRegistry
//!     └─ RemoteObject::invoke                 └─ RemoteClass::invoke
//!          └─ RomClient ─── "invoke" ───►          (by operation name)
//!   RomManager::dispatch_event ◄── "onEvent" ── EventPublisher::fire
//! ```
//!
//! The crate knows nothing about sessions or transports. The `romwire`
//! crate supplies a [`RomClient`] over a JSON-RPC session and serves a
//! registry; [`LocalRomClient`] wires both halves together in process.

mod client;
mod error;
mod event;
pub mod flatten;
mod local;
mod macros;
mod manager;
pub mod naming;
mod object;
mod registry;

pub use client::{EventHandler, RomClient, string_result, wire_result};
pub use error::{FlattenError, RomError};
pub use event::{EventNotification, EventSink};
pub use flatten::{Flatten, PropsExt, RomType, Unflatten, unwrap_value};
pub use local::LocalRomClient;
pub use manager::{RemoteObjectBuilder, RomManager};
pub use object::{ListenerSubscription, RemoteObject, RemoteProxy, RomEvent};
pub use registry::{
    AsAny, EventPublisher, ObjectContext, RemoteClass, RemoteObjectRegistry, ServerObject,
};

/// Re-exported for the mapping macros and for callers building values.
pub use romwire_protocol::{Props, Value};
