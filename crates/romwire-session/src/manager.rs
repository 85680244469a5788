//! The session manager: the server's registry of live sessions.
//!
//! Responsibilities:
//! - Creating a session (and its id) the first time a transport speaks
//! - Finding the session behind an inbound transport
//! - Re-binding a session to a new transport on reconnect
//! - Forgetting sessions once they close
//!
//! # Concurrency note
//!
//! `SessionManager` is NOT thread-safe by itself; it uses plain
//! `HashMap`s. The server owns it behind a mutex and only holds that lock
//! for map operations, never across I/O.

use std::collections::HashMap;

use romwire_transport::ConnectionId;

use crate::{Session, SessionConfig, SessionError, SessionId, TransportLink};

/// Tracks every session the server knows about.
///
/// ## Lifecycle
///
/// ```text
/// create() ──→ [Connected] ──transport_closed()──→ [Suspended]
///                   ▲                                   │
///                   └────────── reconnect() ────────────┤
///                                                       ▼ (grace elapsed)
///                                        [Closed] ──→ cleanup_closed()
/// ```
pub struct SessionManager {
    /// All sessions, keyed by their stable id.
    sessions: HashMap<SessionId, Session>,

    /// Index from live transport to session. At most one entry per
    /// transport; a reconnect moves the session to its new transport.
    transports: HashMap<ConnectionId, SessionId>,

    config: SessionConfig,
}

impl SessionManager {
    /// Creates a new, empty session manager with the given config.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            transports: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Creates a session with a fresh id, bound to `link`.
    pub fn create(&mut self, link: TransportLink) -> Session {
        let id = SessionId::generate();
        let transport_id = link.id();
        let session = Session::with_id(id.clone(), self.config.clone());
        // A brand-new session is never closed, so attach cannot fail.
        if let Err(e) = session.attach(link) {
            tracing::error!(session_id = %id, error = %e, "fresh session refused transport");
        }

        self.transports.insert(transport_id, id.clone());
        self.sessions.insert(id.clone(), session.clone());
        tracing::info!(session_id = %id, %transport_id, "session created");
        session
    }

    /// Re-binds the session `id` to a new transport.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if no live session has that id. A session
    /// that closed (grace elapsed) is forgotten and reported as not found.
    pub fn reconnect(
        &mut self,
        id: &SessionId,
        link: TransportLink,
    ) -> Result<Session, SessionError> {
        let session = self
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        if session.is_closed() {
            self.forget(id);
            return Err(SessionError::NotFound(id.to_string()));
        }

        let transport_id = link.id();
        if let Some(old) = session.transport_id() {
            self.transports.remove(&old);
        }
        session.attach(link).map_err(|_| {
            SessionError::NotFound(id.to_string())
        })?;
        self.transports.insert(transport_id, id.clone());

        tracing::info!(session_id = %id, %transport_id, "session reconnected");
        Ok(session)
    }

    /// Reports that a transport closed. The owning session is suspended
    /// (or closed, if it cannot be resumed) and returned.
    pub fn transport_closed(&mut self, transport_id: ConnectionId) -> Option<Session> {
        let id = self.transports.remove(&transport_id)?;
        let session = self.sessions.get(&id)?.clone();
        session.transport_lost(transport_id);
        Some(session)
    }

    /// Closes and forgets a session.
    pub fn close(&mut self, id: &SessionId) -> Option<Session> {
        let session = self.forget(id)?;
        session.close();
        Some(session)
    }

    /// Removes every closed session, returning their ids.
    pub fn cleanup_closed(&mut self) -> Vec<SessionId> {
        let closed: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &closed {
            self.forget(id);
        }
        closed
    }

    fn forget(&mut self, id: &SessionId) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        self.transports.retain(|_, sid| sid != id);
        Some(session)
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Looks up the session currently bound to a transport.
    pub fn get_by_transport(&self, transport_id: ConnectionId) -> Option<&Session> {
        self.transports
            .get(&transport_id)
            .and_then(|id| self.sessions.get(id))
    }

    /// Returns the number of sessions (any state).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `SessionManager`.
    //!
    //! Naming: `test_{function}_{scenario}_{expected}`.
    //!
    //! # Testing time-dependent behavior
    //!
    //! Grace-period expiry runs on a Tokio timer. Tests that need it use
    //! `start_paused = true` so `tokio::time::advance` moves the clock
    //! instantly instead of sleeping.

    use std::time::Duration;

    use super::*;
    use crate::SessionState;

    fn manager_with_grace(secs: u64) -> SessionManager {
        SessionManager::new(SessionConfig {
            reconnect_grace: Duration::from_secs(secs),
            ..SessionConfig::default()
        })
    }

    fn link(id: u64) -> TransportLink {
        // The receiver is dropped: these tests only look at bookkeeping.
        TransportLink::channel(ConnectionId::new(id)).0
    }

    // =====================================================================
    // create()
    // =====================================================================

    #[tokio::test]
    async fn test_create_returns_connected_session_with_unique_id() {
        let mut mgr = manager_with_grace(30);
        let a = mgr.create(link(1));
        let b = mgr.create(link(2));

        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().unwrap().as_str().len(), 32);
        assert!(matches!(a.state(), SessionState::Connected { .. }));
        assert_eq!(mgr.len(), 2);
    }

    #[tokio::test]
    async fn test_create_indexes_transport() {
        let mut mgr = manager_with_grace(30);
        let session = mgr.create(link(7));
        let found = mgr.get_by_transport(ConnectionId::new(7)).unwrap();
        assert!(found.ptr_eq(&session));
    }

    // =====================================================================
    // transport_closed() / reconnect()
    // =====================================================================

    #[tokio::test]
    async fn test_transport_closed_suspends_session() {
        let mut mgr = manager_with_grace(30);
        let session = mgr.create(link(1));

        let suspended = mgr.transport_closed(ConnectionId::new(1)).unwrap();
        assert!(suspended.ptr_eq(&session));
        assert!(matches!(session.state(), SessionState::Suspended { .. }));
        assert!(mgr.get_by_transport(ConnectionId::new(1)).is_none());
    }

    #[tokio::test]
    async fn test_transport_closed_unknown_transport_returns_none() {
        let mut mgr = manager_with_grace(30);
        assert!(mgr.transport_closed(ConnectionId::new(99)).is_none());
    }

    #[tokio::test]
    async fn test_reconnect_within_grace_rebinds_transport() {
        let mut mgr = manager_with_grace(30);
        let session = mgr.create(link(1));
        let id = session.id().unwrap();
        mgr.transport_closed(ConnectionId::new(1));

        let resumed = mgr.reconnect(&id, link(2)).expect("should resume");
        assert!(resumed.ptr_eq(&session));
        assert_eq!(session.transport_id(), Some(ConnectionId::new(2)));
        assert!(mgr.get_by_transport(ConnectionId::new(2)).is_some());
    }

    #[tokio::test]
    async fn test_reconnect_while_connected_moves_to_new_transport() {
        // The client may notice the drop before the server does.
        let mut mgr = manager_with_grace(30);
        let session = mgr.create(link(1));
        let id = session.id().unwrap();

        mgr.reconnect(&id, link(2)).unwrap();
        assert!(mgr.get_by_transport(ConnectionId::new(1)).is_none());
        assert!(mgr.get_by_transport(ConnectionId::new(2)).is_some());
    }

    #[tokio::test]
    async fn test_reconnect_unknown_id_returns_not_found() {
        let mut mgr = manager_with_grace(30);
        let result = mgr.reconnect(&SessionId::new("nope"), link(1));
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_grace_returns_not_found() {
        let mut mgr = manager_with_grace(5);
        let session = mgr.create(link(1));
        let id = session.id().unwrap();
        mgr.transport_closed(ConnectionId::new(1));

        // Paused clock: sleeping auto-advances past the grace timer.
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(session.is_closed());
        assert!(matches!(
            mgr.reconnect(&id, link(2)),
            Err(SessionError::NotFound(_))
        ));
        assert!(mgr.is_empty(), "closed session is forgotten");
    }

    #[tokio::test]
    async fn test_transport_closed_zero_grace_closes_immediately() {
        let mut mgr = manager_with_grace(0);
        let session = mgr.create(link(1));
        mgr.transport_closed(ConnectionId::new(1));
        assert!(session.is_closed());
    }

    // =====================================================================
    // close() / cleanup_closed()
    // =====================================================================

    #[tokio::test]
    async fn test_close_removes_and_closes_session() {
        let mut mgr = manager_with_grace(30);
        let session = mgr.create(link(1));
        let id = session.id().unwrap();

        assert!(mgr.close(&id).is_some());
        assert!(session.is_closed());
        assert!(mgr.get(&id).is_none());
        assert!(mgr.get_by_transport(ConnectionId::new(1)).is_none());
    }

    #[tokio::test]
    async fn test_cleanup_closed_preserves_live_sessions() {
        let mut mgr = manager_with_grace(30);
        let live = mgr.create(link(1));
        let dead = mgr.create(link(2));
        dead.close();

        let removed = mgr.cleanup_closed();
        assert_eq!(removed, vec![dead.id().unwrap()]);
        assert_eq!(mgr.len(), 1);
        assert!(mgr.get(&live.id().unwrap()).is_some());
    }
}
