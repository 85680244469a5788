//! Wire protocol for romwire.
//!
//! This crate defines the "language" that clients and servers speak:
//!
//! - **Messages** ([`Request`], [`Response`], [`ResponseError`],
//!   [`Message`]): JSON-RPC 2.0 structures that travel on the wire.
//! - **Property bags** ([`Props`]): the named-value maps used for
//!   constructor parameters, operation parameters, and event data.
//! - **Reserved names** ([`method`], [`param`]) and stable numeric
//!   error codes ([`ErrorCode`]).
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages are
//!   converted to and from bytes.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (request correlation, reconnection). It doesn't know about
//! connections or remote objects; it only knows how to represent and
//! (de)serialize messages.
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Session (correlation) → ROM
//! ```

mod codec;
mod error;
mod message;
pub mod names;
mod props;

pub use codec::{Codec, JsonCodec};
pub use error::{ErrorCode, ProtocolError};
pub use message::{JSONRPC_VERSION, Message, Request, Response, ResponseError};
pub use names::{method, param};
pub use props::Props;

/// Re-exported so downstream crates build values without naming
/// `serde_json` themselves.
pub use serde_json::{Value, json};
