//! Pending-request correlator.
//!
//! Every request that expects an answer registers here before it is sent.
//! When a response comes back, [`PendingRequests::resolve`] looks up its id,
//! completes the waiting future exactly once, and removes the entry.
//!
//! ```text
//!  caller                    PendingRequests                 reader task
//!    │ prepare(req) ──────────► {id → waiter} ◄──────── resolve(resp)
//!    │◄──── oneshot::Receiver        │                        │
//!    │                               └── waiter.send(resp) ───┘
//! ```
//!
//! # Concurrency
//!
//! `prepare` and `resolve` run on different tasks (caller vs. reader).
//! The table sits behind a `parking_lot::Mutex`; every critical section is
//! a map insert or remove and never awaits, so a blocking lock is fine.
//!
//! # Abandoned waiters
//!
//! A caller that gives up (timeout, dropped future) leaves its entry in
//! place. If the response shows up later it is still resolved, which
//! removes the entry, and the value is discarded because nobody is
//! listening. It can never reach a different waiter: ids are not reused
//! while an entry exists.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use romwire_protocol::{Request, Response};
use tokio::sync::oneshot;

use crate::SessionError;

/// What a waiter eventually receives.
pub type ResponseResult = Result<Response, SessionError>;

/// The receiving half handed back by [`PendingRequests::prepare`].
pub type ResponseReceiver = oneshot::Receiver<ResponseResult>;

struct PendingEntry {
    /// Kept so the request can be re-sent after a reconnect.
    request: Request,
    submitted_at: Instant,
    waiter: oneshot::Sender<ResponseResult>,
}

/// Table of outstanding requests, keyed by id.
///
/// A `BTreeMap` keeps entries in id order, which is the order they are
/// re-sent in after a reconnect.
pub struct PendingRequests {
    next_id: AtomicI64,
    entries: Mutex<BTreeMap<i64, PendingEntry>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Allocates the next request id. Ids increase monotonically.
    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `request` and returns the receiver its response will be
    /// delivered on.
    ///
    /// The request must already carry an id. A caller-assigned id bumps the
    /// counter past it so later automatic ids never collide.
    ///
    /// # Errors
    /// - [`SessionError::NotCorrelatable`] if the request has no id.
    /// - [`SessionError::DuplicateId`] if the id is still outstanding.
    pub fn prepare(&self, request: Request) -> Result<ResponseReceiver, SessionError> {
        let id = request.id.ok_or(SessionError::NotCorrelatable)?;
        self.next_id.fetch_max(id.saturating_add(1), Ordering::Relaxed);

        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(SessionError::DuplicateId(id));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(
            id,
            PendingEntry {
                request,
                submitted_at: Instant::now(),
                waiter: tx,
            },
        );
        Ok(rx)
    }

    /// Completes the waiter for `response.id`.
    ///
    /// Returns `true` if an entry matched. A response with no id, or one
    /// whose id is not outstanding, is logged and dropped.
    pub fn resolve(&self, response: Response) -> bool {
        let Some(id) = response.id else {
            tracing::warn!(?response.outcome, "dropping response without id");
            return false;
        };
        // Remove under the lock, deliver outside it.
        let Some(entry) = self.entries.lock().remove(&id) else {
            tracing::warn!(id, "dropping response for unknown request id");
            return false;
        };
        let elapsed = entry.submitted_at.elapsed();
        if entry.waiter.send(Ok(response)).is_err() {
            tracing::debug!(id, ?elapsed, "late response discarded, caller gave up");
        } else {
            tracing::trace!(id, ?elapsed, "response delivered");
        }
        true
    }

    /// Removes an entry without completing it. The waiter observes a
    /// closed channel.
    pub fn cancel(&self, id: i64) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    /// Fails every outstanding waiter with `error` and empties the table.
    /// Returns how many entries were failed.
    pub fn fail_all(&self, error: SessionError) -> usize {
        let drained = std::mem::take(&mut *self.entries.lock());
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.waiter.send(Err(error.clone()));
        }
        count
    }

    /// Snapshot of requests still awaited by someone, in ascending id order.
    ///
    /// Entries whose caller already gave up are dropped from the table here;
    /// re-sending them would only produce responses nobody reads.
    pub fn outstanding(&self) -> Vec<Request> {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.waiter.is_closed());
        entries.values().map(|entry| entry.request.clone()).collect()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}
