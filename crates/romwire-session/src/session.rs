//! The reconnect-tolerant session.
//!
//! A [`Session`] is the logical channel between one client and the server.
//! It outlives any single network connection: when the transport drops,
//! the session is *suspended*, keeps its pending requests, and waits for a
//! new transport carrying the same [`SessionId`].
//!
//! ```text
//!               attach()                  transport_lost()
//!  Suspended ───────────────► Connected ───────────────────► Suspended
//!   (new)      ◄──────────────  │  ▲                            │
//!                               │  └──────── attach() ──────────┘
//!               close()         ▼              (within grace)   │
//!                             Closed ◄──── grace elapsed ───────┘
//! ```
//!
//! The session never touches a socket directly. The engine hands it a
//! [`TransportLink`], the sending half of a channel drained by the
//! connection's writer task. Swapping links, changing state, and writing to
//! the current link all happen under one lock, so no send can race a
//! reconnect.

use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use romwire_protocol::{Codec, JsonCodec, Props, Request, Response, Value, method, param};
use romwire_transport::ConnectionId;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::correlator::{PendingRequests, ResponseReceiver};
use crate::{SessionConfig, SessionError};

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Stable identity of a session across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random 32-character hex id (128 bits of entropy).
    ///
    /// The id doubles as the reconnection secret, so it must not be
    /// guessable.
    pub fn generate() -> Self {
        Self(generate_token())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Generates a random 32-character hex string.
pub(crate) fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// SessionState / TransportLink
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// A transport is attached and messages flow.
    Connected { transport_id: ConnectionId },

    /// No transport is attached, either because none has been yet or
    /// because the last one was lost at `since`.
    Suspended { since: Instant },

    /// Terminal. Pending requests have been failed.
    Closed,
}

/// The session's handle on one live connection: its id plus the queue
/// drained by that connection's writer task.
///
/// Dropping the link (on reconnect or close) closes the queue, which ends
/// the writer task and with it the old connection.
#[derive(Debug, Clone)]
pub struct TransportLink {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl TransportLink {
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { id, outbound }
    }

    /// Creates a link plus the receiver a writer task should drain.
    pub fn channel(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues bytes for the writer. Hands them back if the writer is gone.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), Vec<u8>> {
        self.outbound.send(bytes).map_err(|e| e.0)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Link {
    current: Option<TransportLink>,
    /// Responses and notifications produced while suspended.
    outbox: VecDeque<Vec<u8>>,
}

struct Shared {
    config: SessionConfig,
    id: Mutex<Option<SessionId>>,
    pending: PendingRequests,
    /// Session-wide lock: link swaps, state transitions, and sends.
    link: Mutex<Link>,
    state: watch::Sender<SessionState>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    grace: Mutex<Option<JoinHandle<()>>>,
}

/// A reconnect-tolerant logical channel. Cheap to clone; all clones share
/// the same state.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Creates an anonymous session. It becomes resumable once it learns
    /// its id via [`set_id`](Self::set_id) or a response carrying one.
    pub fn new(config: SessionConfig) -> Self {
        Self::build(None, config)
    }

    /// Creates a session with a known id.
    pub fn with_id(id: SessionId, config: SessionConfig) -> Self {
        Self::build(Some(id), config)
    }

    fn build(id: Option<SessionId>, config: SessionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: config.validated(),
                id: Mutex::new(id),
                pending: PendingRequests::new(),
                link: Mutex::new(Link {
                    current: None,
                    outbox: VecDeque::new(),
                }),
                state: watch::Sender::new(SessionState::Suspended {
                    since: Instant::now(),
                }),
                keepalive: Mutex::new(None),
                grace: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Option<SessionId> {
        self.shared.id.lock().clone()
    }

    /// Records the id assigned by the peer. The first id wins.
    pub fn set_id(&self, id: SessionId) {
        let mut current = self.shared.id.lock();
        match &*current {
            None => {
                info!(session_id = %id, "session id assigned");
                *current = Some(id);
            }
            Some(existing) if *existing != id => {
                warn!(%existing, offered = %id, "ignoring conflicting session id");
            }
            Some(_) => {}
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.shared.state.borrow(), SessionState::Closed)
    }

    /// The transport currently attached, if any.
    pub fn transport_id(&self) -> Option<ConnectionId> {
        self.shared.link.lock().current.as_ref().map(TransportLink::id)
    }

    /// Number of requests still awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    /// Resolves when the session reaches [`SessionState::Closed`].
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|s| matches!(s, SessionState::Closed)).await;
    }

    /// Two handles refer to the same session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // -- Transport lifecycle ---------------------------------------------

    /// Binds a new transport and resumes traffic.
    ///
    /// Queued responses and notifications are flushed first, then every
    /// request still awaited is re-sent in ascending id order. A request
    /// that was in flight when the old transport dropped may therefore be
    /// delivered twice.
    ///
    /// # Errors
    /// [`SessionError::Closed`] if the session is already closed.
    pub fn attach(&self, link: TransportLink) -> Result<(), SessionError> {
        let transport_id = link.id;
        let (flushed, resent) = {
            let mut guard = self.shared.link.lock();
            if self.is_closed() {
                return Err(SessionError::Closed);
            }
            if let Some(timer) = self.shared.grace.lock().take() {
                timer.abort();
            }

            let outbox = std::mem::take(&mut guard.outbox);
            let flushed = outbox.len();
            let mut undelivered = VecDeque::new();
            for bytes in outbox {
                if let Err(bytes) = link.send(bytes) {
                    undelivered.push_back(bytes);
                }
            }
            guard.outbox = undelivered;

            let outstanding = self.shared.pending.outstanding();
            let resent = outstanding.len();
            for request in outstanding {
                match self.encode_request(&request) {
                    Ok(bytes) => {
                        // A dead link leaves the request pending for the
                        // next attach.
                        let _ = link.send(bytes);
                    }
                    Err(e) => warn!(id = ?request.id, error = %e, "cannot re-encode request"),
                }
            }

            guard.current = Some(link);
            self.shared
                .state
                .send_replace(SessionState::Connected { transport_id });
            (flushed, resent)
        };

        info!(
            session_id = ?self.id(),
            %transport_id,
            flushed,
            resent,
            "transport attached"
        );
        Ok(())
    }

    /// Reports that transport `transport_id` is gone.
    ///
    /// Stale reports (for a transport already replaced) are ignored. An
    /// anonymous session, or one configured with no grace period, closes
    /// immediately. Otherwise it is suspended and closes only if no new
    /// transport attaches within `reconnect_grace`.
    pub fn transport_lost(&self, transport_id: ConnectionId) {
        {
            let mut guard = self.shared.link.lock();
            if guard.current.as_ref().map(TransportLink::id) != Some(transport_id) {
                debug!(%transport_id, "ignoring loss of stale transport");
                return;
            }
            guard.current = None;

            if self.id().is_some() && !self.shared.config.reconnect_grace.is_zero() {
                self.shared.state.send_replace(SessionState::Suspended {
                    since: Instant::now(),
                });
                drop(guard);
                info!(
                    session_id = ?self.id(),
                    %transport_id,
                    grace = ?self.shared.config.reconnect_grace,
                    "transport lost, session suspended"
                );
                self.start_grace_timer();
                return;
            }
        }
        self.close_with(SessionError::Transport(format!(
            "transport {transport_id} closed"
        )));
    }

    fn start_grace_timer(&self) {
        let weak = Arc::downgrade(&self.shared);
        let grace = self.shared.config.reconnect_grace;
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(shared) = weak.upgrade() {
                let session = Session { shared };
                if session.close_inner(
                    SessionError::Transport("reconnection grace period elapsed".into()),
                    true,
                ) {
                    info!(session_id = ?session.id(), "session expired");
                }
            }
        });
        if let Some(previous) = self.shared.grace.lock().replace(task) {
            previous.abort();
        }
    }

    /// Closes the session. Pending requests fail with
    /// [`SessionError::Closed`]. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.close_with(SessionError::Closed)
    }

    /// Closes the session, failing pending requests with `error`.
    pub fn close_with(&self, error: SessionError) -> bool {
        self.close_inner(error, false)
    }

    fn close_inner(&self, error: SessionError, only_if_suspended: bool) -> bool {
        {
            let mut guard = self.shared.link.lock();
            let state = self.state();
            match state {
                SessionState::Closed => return false,
                SessionState::Connected { .. } if only_if_suspended => return false,
                _ => {}
            }
            guard.current = None;
            guard.outbox.clear();
            self.shared.state.send_replace(SessionState::Closed);
        }

        if let Some(task) = self.shared.keepalive.lock().take() {
            task.abort();
        }
        if let Some(task) = self.shared.grace.lock().take() {
            task.abort();
        }
        let failed = self.shared.pending.fail_all(error.clone());
        info!(session_id = ?self.id(), failed, reason = %error, "session closed");
        true
    }

    // -- Outbound traffic ------------------------------------------------

    /// Sends a request and waits for its response.
    ///
    /// The id is allocated from the session's counter. The wait is bounded
    /// by `request_timeout`; on timeout the correlator entry stays until a
    /// late response or close discards it.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Response, SessionError> {
        let request = Request::new(method, params).with_id(self.shared.pending.next_id());
        self.call_request(request).await
    }

    /// Like [`call`](Self::call) for a prepared request. A missing id is
    /// filled in; a present one is used as-is.
    pub async fn call_request(&self, mut request: Request) -> Result<Response, SessionError> {
        let id = *request.id.get_or_insert_with(|| self.shared.pending.next_id());
        let rx = self.submit(request)?;
        self.await_response(id, rx).await
    }

    /// Sends a request and hands the result to `continuation` when it
    /// arrives. Returns immediately.
    ///
    /// A panicking continuation is logged; it never reaches the transport.
    pub fn call_with<F>(&self, method: impl Into<String>, params: Option<Value>, continuation: F)
    where
        F: FnOnce(Result<Response, SessionError>) + Send + 'static,
    {
        let session = self.clone();
        let method = method.into();
        tokio::spawn(async move {
            let result = session.call(&method, params).await;
            if std::panic::catch_unwind(AssertUnwindSafe(|| continuation(result))).is_err() {
                warn!(%method, "response continuation panicked");
            }
        });
    }

    async fn await_response(
        &self,
        id: i64,
        rx: ResponseReceiver,
    ) -> Result<Response, SessionError> {
        let timeout = self.shared.config.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => {
                debug!(id, ?timeout, "request timed out");
                Err(SessionError::Timeout { id, after: timeout })
            }
        }
    }

    fn submit(&self, request: Request) -> Result<ResponseReceiver, SessionError> {
        let bytes = self.encode_request(&request)?;
        let id = request.id;
        let guard = self.shared.link.lock();
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let rx = self.shared.pending.prepare(request)?;
        match &guard.current {
            Some(link) => {
                if link.send(bytes).is_err() {
                    debug!(?id, "writer gone, request will be re-sent on attach");
                }
            }
            None => debug!(?id, "session suspended, request will be sent on attach"),
        }
        Ok(rx)
    }

    /// Sends a notification (a request without id).
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), SessionError> {
        let bytes = self.encode_request(&Request::new(method, params))?;
        self.send_or_queue(bytes)
    }

    /// Sends a response. While suspended it is queued and flushed on the
    /// next attach.
    pub fn send_response(&self, mut response: Response) -> Result<(), SessionError> {
        response.session_id = self.id().map(|id| id.0);
        let bytes = JsonCodec
            .encode(&response)
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        self.send_or_queue(bytes)
    }

    fn send_or_queue(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        let mut guard = self.shared.link.lock();
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let bytes = match &guard.current {
            Some(link) => match link.send(bytes) {
                Ok(()) => return Ok(()),
                Err(bytes) => bytes,
            },
            None => bytes,
        };
        guard.outbox.push_back(bytes);
        Ok(())
    }

    fn encode_request(&self, request: &Request) -> Result<Vec<u8>, SessionError> {
        let mut request = request.clone();
        request.session_id = self.id().map(|id| id.0);
        JsonCodec
            .encode(&request)
            .map_err(|e| SessionError::Encode(e.to_string()))
    }

    // -- Inbound traffic -------------------------------------------------

    /// Routes a response to its waiter. Adopts the session id it carries
    /// if this session doesn't have one yet.
    pub fn handle_response(&self, response: Response) -> bool {
        if let Some(sid) = &response.session_id {
            if self.shared.id.lock().is_none() {
                self.set_id(SessionId::new(sid.clone()));
            }
        }
        self.shared.pending.resolve(response)
    }

    // -- Keepalive -------------------------------------------------------

    /// Starts (or restarts) the keepalive task.
    ///
    /// At most one keepalive task runs per session. Each tick sends
    /// `keepAlive {interval}` and waits up to one interval for the answer;
    /// ticks missed while a probe is outstanding are skipped, not queued.
    /// A probe that fails or times out is treated as a lost transport.
    pub fn start_keepalive(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("ignoring zero keepalive interval");
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        let task = tokio::spawn(keepalive_loop(weak, interval));
        if let Some(previous) = self.shared.keepalive.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn stop_keepalive(&self) {
        if let Some(task) = self.shared.keepalive.lock().take() {
            task.abort();
        }
    }
}

async fn keepalive_loop(shared: Weak<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else { break };
        let session = Session { shared };

        let transport_id = match session.state() {
            SessionState::Connected { transport_id } => transport_id,
            SessionState::Suspended { .. } => continue,
            SessionState::Closed => break,
        };

        let id = session.shared.pending.next_id();
        let params = Props::new().with(param::INTERVAL, period.as_millis() as u64);
        let probe = Request::new(method::KEEP_ALIVE, Some(params.into())).with_id(id);
        let outcome = match session.submit(probe) {
            Ok(rx) => tokio::time::timeout(period, rx).await,
            Err(SessionError::Closed) => break,
            Err(e) => {
                warn!(error = %e, "keepalive could not be sent");
                continue;
            }
        };

        match outcome {
            Ok(Ok(Ok(_))) => trace!(%transport_id, "keepalive acknowledged"),
            Ok(Ok(Err(SessionError::Closed))) => break,
            Ok(Ok(Err(e))) => {
                warn!(%transport_id, error = %e, "keepalive failed");
                session.transport_lost(transport_id);
            }
            Ok(Err(_)) | Err(_) => {
                session.shared.pending.cancel(id);
                warn!(%transport_id, ?period, "keepalive unanswered, dropping transport");
                session.transport_lost(transport_id);
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("pending", &self.pending_len())
            .finish()
    }
}
