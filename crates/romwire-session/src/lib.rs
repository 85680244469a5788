//! Request correlation and session management for romwire.
//!
//! This crate turns a raw message channel into a dependable RPC channel:
//!
//! 1. **Correlation** ([`PendingRequests`]): matching responses to the
//!    requests that are waiting for them.
//! 2. **Sessions** ([`Session`]): an identity that survives transport
//!    reconnection, with an outbox, request retry, and keepalive.
//! 3. **Transactions** ([`Transaction`]): the exactly-one-response
//!    obligation attached to every inbound request.
//! 4. **Server bookkeeping** ([`SessionManager`]): which session lives
//!    behind which transport.
//!
//! # How it fits in the stack
//!
//! ```text
//! ROM layer (above)      ← issues create/invoke/... through a Session
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Protocol layer (below) ← Request, Response, codecs
//! ```

mod config;
pub mod correlator;
mod error;
mod manager;
mod session;
mod transaction;

pub use config::SessionConfig;
pub use correlator::PendingRequests;
pub use error::{SessionError, TransactionError};
pub use manager::SessionManager;
pub use session::{Session, SessionId, SessionState, TransportLink};
pub use transaction::{Transaction, TransactionState};
