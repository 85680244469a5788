//! # romwire
//!
//! Bidirectional JSON-RPC 2.0 sessions and a remote object model over them.
//!
//! A client creates objects on the server, invokes their operations by
//! name, subscribes to their events, and releases them. Underneath, both
//! peers may issue requests at any time over a session that survives
//! transport drops.
//!
//! The layers, leaf to root:
//!
//! - [`transport`]: byte-message channels (WebSocket, in-memory)
//! - [`protocol`]: wire messages, reserved names, error codes
//! - [`session`]: correlation, reconnection, keepalive, transactions
//! - [`rom`]: marshalling, the server registry, client proxies
//! - this crate: the server and client engines tying them together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use romwire::prelude::*;
//!
//! // Server:
//! // let server = RomServer::builder()
//! //     .bind("0.0.0.0:8888")
//! //     .register_class("Counter", Counter::new)
//! //     .build()
//! //     .await?;
//! // server.run().await
//! //
//! // Client:
//! // let (client, manager) = JsonRpcRomClient::connect(
//! //     WebSocketConnector::new("ws://127.0.0.1:8888"),
//! //     ClientConfig::default(),
//! // ).await?;
//! // let counter = manager.create("Counter", Props::new()).await?;
//! ```

mod client;
mod config;
mod connection;
mod error;
mod handler;
mod rom_client;
mod server;

pub use client::JsonRpcClient;
pub use config::{ClientConfig, ServerConfig};
pub use error::RomwireError;
pub use handler::{JsonRpcHandler, RomHandler};
pub use rom_client::JsonRpcRomClient;
pub use server::{RomServer, RomServerBuilder};

pub use romwire_protocol as protocol;
pub use romwire_rom as rom;
pub use romwire_session as session;
pub use romwire_transport as transport;

/// Installs a `tracing` fmt subscriber filtered by `RUST_LOG`.
///
/// Defaults to `info` when `RUST_LOG` is unset. Calling it more than once
/// is harmless; only the first call installs anything.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Everything an application usually needs, in one import.
pub mod prelude {
    pub use crate::{
        ClientConfig, JsonRpcClient, JsonRpcHandler, JsonRpcRomClient, RomHandler, RomServer,
        RomServerBuilder, RomwireError, ServerConfig,
    };
    pub use romwire_protocol::{ErrorCode, Props, ResponseError, Value, json};
    pub use romwire_rom::{
        EventNotification, Flatten, ObjectContext, RemoteClass, RemoteObject,
        RemoteObjectBuilder, RemoteObjectRegistry, RemoteProxy, RomError, RomEvent, RomManager,
        ServerObject, Unflatten, remote_proxy, rom_enum, rom_struct,
    };
    pub use romwire_session::{Session, SessionConfig, Transaction};
    pub use romwire_transport::{WebSocketConnector, WebSocketTransport, memory};
}
