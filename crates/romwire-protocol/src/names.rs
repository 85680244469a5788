//! Reserved method and parameter names.

/// Method names consumed by the engine and the remote object layer.
pub mod method {
    /// Create a remote object: `{type, constructorParams?}` → reference.
    pub const CREATE: &str = "create";
    /// Call an operation: `{object, operation, operationParams?}` → value.
    pub const INVOKE: &str = "invoke";
    /// Drop a remote object: `{object}` → empty.
    pub const RELEASE: &str = "release";
    /// Listen for an event type: `{object, type}` → subscription id.
    pub const SUBSCRIBE: &str = "subscribe";
    /// Stop listening: `{object, subscription}` → empty.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    /// Server → client event notification.
    pub const ON_EVENT: &str = "onEvent";
    /// Liveness probe; the result is `{"value": "pong"}`.
    pub const KEEP_ALIVE: &str = "keepAlive";
    /// Attach a transport to a new or existing session.
    pub const CONNECT: &str = "connect";
    /// Close the session explicitly.
    pub const CLOSE_SESSION: &str = "closeSession";
}

/// Parameter and result property names.
pub mod param {
    pub const TYPE: &str = "type";
    pub const CONSTRUCTOR_PARAMS: &str = "constructorParams";
    pub const OBJECT: &str = "object";
    pub const OPERATION: &str = "operation";
    pub const OPERATION_PARAMS: &str = "operationParams";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const DATA: &str = "data";
    pub const SESSION_ID: &str = "sessionId";
    /// Wrapper key for non-object payloads.
    pub const VALUE: &str = "value";
    /// Keepalive interval in milliseconds.
    pub const INTERVAL: &str = "interval";
}

/// Result of a `keepAlive` call.
pub const PONG: &str = "pong";
