//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Configuration for session behavior.
///
/// Shared by both ends: the server applies it to every session it creates,
/// the client to its single session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a suspended session waits for a new transport before it is
    /// closed and its pending requests fail.
    ///
    /// Default: 30 seconds. Zero disables resumption entirely.
    pub reconnect_grace: Duration,

    /// How long a caller waits for a response before giving up.
    ///
    /// Default: 60 seconds.
    pub request_timeout: Duration,

    /// Interval between `keepAlive` requests, if this side runs the
    /// keepalive task. `None` disables it.
    pub keepalive_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_grace: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            keepalive_interval: None,
        }
    }
}

impl SessionConfig {
    /// Fixes values that would make the session unusable.
    ///
    /// - A zero `request_timeout` would fail every call; reset to default.
    /// - A zero keepalive interval would spin; treated as disabled.
    pub fn validated(mut self) -> Self {
        if self.request_timeout.is_zero() {
            warn!("request_timeout is zero, using default");
            self.request_timeout = Self::default().request_timeout;
        }
        if self.keepalive_interval.is_some_and(|i| i.is_zero()) {
            warn!("keepalive_interval is zero, disabling keepalive");
            self.keepalive_interval = None;
        }
        self
    }
}
