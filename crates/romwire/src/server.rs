//! `RomServer` builder and server loop.
//!
//! This is the entry point for serving remote objects. It ties together
//! all the layers: transport → protocol → session → handler.

use std::sync::Arc;

use romwire_rom::{ObjectContext, RemoteClass, RemoteObjectRegistry, RomError};
use romwire_protocol::Props;
use romwire_session::{SessionConfig, SessionManager};
use romwire_transport::{Transport, TransportError, WebSocketTransport};
use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::handler::{JsonRpcHandler, RomHandler};
use crate::RomwireError;

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
/// Interior mutability via `Mutex` where needed.
pub(crate) struct ServerState<H: JsonRpcHandler> {
    pub(crate) sessions: Mutex<SessionManager>,
    pub(crate) handler: Arc<H>,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a [`RomServer`].
///
/// # Example
///
/// ```rust,ignore
/// use romwire::prelude::*;
///
/// let server = RomServer::builder()
///     .bind("0.0.0.0:8888")
///     .register_class("Counter", Counter::new)
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct RomServerBuilder {
    config: ServerConfig,
    registry: RemoteObjectRegistry,
}

impl RomServerBuilder {
    /// Creates a new builder with default settings and an empty registry.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            registry: RemoteObjectRegistry::new(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Replaces the whole server configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Serves the objects of an existing registry.
    pub fn registry(mut self, registry: RemoteObjectRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers a remote class on the server's registry.
    pub fn register_class<T, F>(self, class_name: impl Into<String>, constructor: F) -> Self
    where
        T: RemoteClass,
        F: Fn(&Props, &ObjectContext) -> Result<T, RomError> + Send + Sync + 'static,
    {
        self.registry.register_class(class_name, constructor);
        self
    }

    /// Binds the WebSocket listener.
    pub async fn build(self) -> Result<RomServer<WebSocketTransport>, RomwireError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        Ok(self.build_on(transport))
    }

    /// Serves over an already-bound transport.
    pub fn build_on<T>(self, transport: T) -> RomServer<T>
    where
        T: Transport<Error = TransportError>,
    {
        RomServer::new(transport, RomHandler::new(self.registry), self.config)
    }
}

impl Default for RomServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A server for JSON-RPC sessions.
///
/// The default handler serves a [`RemoteObjectRegistry`]; any
/// [`JsonRpcHandler`] can take its place.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RomServer<T: Transport, H: JsonRpcHandler = RomHandler> {
    transport: T,
    state: Arc<ServerState<H>>,
}

impl RomServer<WebSocketTransport> {
    /// Creates a new builder.
    pub fn builder() -> RomServerBuilder {
        RomServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }
}

impl<T, H> RomServer<T, H>
where
    T: Transport<Error = TransportError>,
    H: JsonRpcHandler,
{
    /// Creates a server with a custom handler.
    pub fn new(transport: T, handler: H, config: ServerConfig) -> Self {
        let config = config.validated();
        let state = Arc::new(ServerState {
            sessions: Mutex::new(SessionManager::new(config.session.clone())),
            handler: Arc::new(handler),
            config,
        });
        Self { transport, state }
    }

    pub fn handler(&self) -> &H {
        &self.state.handler
    }

    /// Number of sessions the server currently tracks.
    pub async fn session_count(&self) -> usize {
        self.state.sessions.lock().await.len()
    }

    /// Runs the server accept loop.
    ///
    /// Accepts incoming connections and spawns a handler task for each.
    /// Returns once the transport shuts down.
    pub async fn run(mut self) -> Result<(), RomwireError> {
        tracing::info!("romwire server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(TransportError::Shutdown) => {
                    tracing::info!("transport shut down, server stopping");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
