//! Server and client configuration.

use std::time::Duration;

use romwire_session::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Configuration for a [`RomServer`](crate::RomServer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    ///
    /// Default: `127.0.0.1:8888`.
    pub bind_addr: String,

    /// Applied to every session the server creates.
    pub session: SessionConfig,

    /// How many keepalive intervals may pass without any inbound message
    /// before the server drops the transport. Only armed once a client
    /// announces its interval in a `keepAlive` request.
    ///
    /// Default: 3.
    pub watchdog_pings: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8888".to_string(),
            session: SessionConfig::default(),
            watchdog_pings: 3,
        }
    }
}

impl ServerConfig {
    /// Fixes values that would make the server unusable.
    pub fn validated(mut self) -> Self {
        self.session = self.session.validated();
        if self.watchdog_pings == 0 {
            warn!("watchdog_pings is zero, using 1");
            self.watchdog_pings = 1;
        }
        self
    }
}

/// Configuration for a [`JsonRpcClient`](crate::JsonRpcClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// The client's session. Its keepalive is on by default.
    pub session: SessionConfig,

    /// Pause between reconnection attempts while the session is suspended.
    ///
    /// Default: 1 second.
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                keepalive_interval: Some(Duration::from_secs(20)),
                ..SessionConfig::default()
            },
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Fixes values that would make the client unusable.
    ///
    /// A zero `reconnect_delay` would dial in a tight loop.
    pub fn validated(mut self) -> Self {
        self.session = self.session.validated();
        if self.reconnect_delay.is_zero() {
            warn!("reconnect_delay is zero, using 10ms");
            self.reconnect_delay = Duration::from_millis(10);
        }
        self
    }
}
