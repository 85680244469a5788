//! Exactly-one-response wrapper around an inbound request.
//!
//! The engine builds one [`Transaction`] per inbound [`Request`] and hands
//! it to the handler. The handler answers in one of three ways:
//!
//! 1. **Synchronously**: calls [`send_response`](Transaction::send_response)
//!    or [`send_error`](Transaction::send_error) before returning.
//! 2. **Deferred**: calls [`start_async`](Transaction::start_async), keeps
//!    a clone of the transaction, and answers later from another task.
//! 3. **Implicitly**: returns without doing either. The engine then sends an
//!    empty success response when it calls [`finish`](Transaction::finish).
//!
//! Whatever happens, a request with an id gets exactly one response. A
//! second answer is rejected with [`TransactionError::AlreadyResponded`]
//! and logged, never written to the wire.

use std::sync::Arc;

use parking_lot::Mutex;
use romwire_protocol::{Request, Response, ResponseError, Value};

use crate::{Session, TransactionError};

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No answer yet; the handler is still running.
    Open,
    /// The handler deferred its answer.
    Async,
    /// An answer has been sent (or, for a notification, consumed).
    Responded,
}

struct Inner {
    session: Session,
    request: Request,
    state: Mutex<TransactionState>,
}

/// The obligation to answer one inbound request at most once.
///
/// Cheap to clone; clones share the same state, which is how a deferred
/// answer is sent from a different task.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

impl Transaction {
    pub fn new(session: Session, request: Request) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                request,
                state: Mutex::new(TransactionState::Open),
            }),
        }
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock()
    }

    /// Returns `true` if no response is owed at all.
    pub fn is_notification(&self) -> bool {
        self.inner.request.is_notification()
    }

    /// Declares that the answer will come later. The engine will not send
    /// an implicit response for this transaction.
    ///
    /// # Errors
    /// [`TransactionError::AlreadyResponded`] if an answer was already sent.
    pub fn start_async(&self) -> Result<(), TransactionError> {
        let mut state = self.inner.state.lock();
        match *state {
            TransactionState::Responded => Err(self.already_responded()),
            _ => {
                *state = TransactionState::Async;
                Ok(())
            }
        }
    }

    pub fn is_async(&self) -> bool {
        self.state() == TransactionState::Async
    }

    /// Sends the success response.
    pub fn send_response(&self, result: Value) -> Result<(), TransactionError> {
        self.respond(Ok(result))
    }

    /// Sends the error response.
    pub fn send_error(&self, error: impl Into<ResponseError>) -> Result<(), TransactionError> {
        self.respond(Err(error.into()))
    }

    /// Called by the engine once the handler returns.
    ///
    /// - Handler succeeded and left the transaction open: send the implicit
    ///   empty response.
    /// - Handler failed and nothing was sent yet (even if it went async):
    ///   send the error.
    /// - Otherwise nothing is sent.
    pub fn finish(&self, outcome: Result<(), ResponseError>) {
        let state = self.state();
        let result = match (outcome, state) {
            (Ok(()), TransactionState::Open) => self.respond(Ok(Value::Null)),
            (Err(error), TransactionState::Open | TransactionState::Async) => {
                self.respond(Err(error))
            }
            (Err(error), TransactionState::Responded) => {
                tracing::warn!(
                    id = ?self.inner.request.id,
                    %error,
                    "handler failed after responding; error not sent"
                );
                Ok(())
            }
            (Ok(()), _) => Ok(()),
        };
        if let Err(e) = result {
            tracing::debug!(id = ?self.inner.request.id, error = %e, "implicit response not sent");
        }
    }

    fn respond(&self, outcome: Result<Value, ResponseError>) -> Result<(), TransactionError> {
        {
            let mut state = self.inner.state.lock();
            if *state == TransactionState::Responded {
                let err = self.already_responded();
                tracing::error!(
                    method = %self.inner.request.method,
                    error = %err,
                    "second response attempted"
                );
                return Err(err);
            }
            *state = TransactionState::Responded;
        }

        let Some(id) = self.inner.request.id else {
            tracing::trace!(
                method = %self.inner.request.method,
                "notification handled, nothing to send"
            );
            return Ok(());
        };
        let response = Response {
            id: Some(id),
            outcome,
            session_id: None,
        };
        self.inner.session.send_response(response)?;
        Ok(())
    }

    fn already_responded(&self) -> TransactionError {
        TransactionError::AlreadyResponded {
            id: self.inner.request.id,
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.request.id)
            .field("method", &self.inner.request.method)
            .field("state", &self.state())
            .finish()
    }
}
