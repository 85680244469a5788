//! Per-connection handler: session binding and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler,
//! plus a writer task draining the connection's outbound queue. The flow
//! is:
//!   1. Receive a message → decode, answering malformed requests that
//!      still carry a readable id
//!   2. Responses → the bound session's correlator
//!   3. Reserved methods (`connect`, `keepAlive`, `closeSession`) →
//!      answered here
//!   4. Everything else → a [`Transaction`] on its own task
//!
//! A connection has no session until its first request. A request that
//! carries a `sessionId` resumes that session on this connection; one
//! without starts a new session.

use std::sync::Arc;
use std::time::Duration;

use romwire_protocol::{
    Codec, JsonCodec, Message, Props, Request, Response, ResponseError, Value, method, names::PONG, param,
};
use romwire_session::{Session, SessionId, SessionState, Transaction, TransportLink};
use romwire_transport::{Connection, ConnectionId};
use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use tracing::{debug, info, trace, warn};

use crate::handler::{JsonRpcHandler, dispatch};
use crate::server::ServerState;
use crate::RomwireError;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C, H>(
    conn: C,
    state: Arc<ServerState<H>>,
) -> Result<(), RomwireError>
where
    C: Connection,
    H: JsonRpcHandler,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    debug!(%conn_id, "handling new connection");

    let (link, outbound) = TransportLink::channel(conn_id);
    let writer = tokio::spawn(write_loop(Arc::clone(&conn), outbound));

    let mut dispatcher = Dispatcher {
        conn_id,
        link,
        session: None,
        watchdog: None,
        state,
    };

    loop {
        let moved = moved_away(dispatcher.session.clone(), conn_id);
        let received = tokio::select! {
            received = recv_within(&*conn, dispatcher.watchdog) => received,
            () = moved => {
                info!(%conn_id, "session resumed on another transport, closing this one");
                break;
            }
        };

        let data = match received {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                debug!(%conn_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                debug!(%conn_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                info!(%conn_id, limit = ?dispatcher.watchdog, "keepalive watchdog expired, dropping transport");
                break;
            }
        };

        dispatcher.on_message(&data).await;
    }

    if let Err(e) = conn.close().await {
        trace!(%conn_id, error = %e, "close after read loop failed");
    }
    dispatcher.finish().await;
    writer.abort();
    Ok(())
}

/// Receives the next message, giving up after `limit` if one is set.
async fn recv_within<C: Connection>(
    conn: &C,
    limit: Option<Duration>,
) -> Result<Result<Option<Vec<u8>>, C::Error>, Elapsed> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, conn.recv()).await,
        None => Ok(conn.recv().await),
    }
}

/// Resolves once `session` is attached to a transport other than
/// `conn_id`. Never resolves without a session.
async fn moved_away(session: Option<Session>, conn_id: ConnectionId) {
    let Some(session) = session else {
        return std::future::pending().await;
    };
    let mut state = session.subscribe_state();
    let _ = state
        .wait_for(|s| matches!(s, SessionState::Connected { transport_id } if *transport_id != conn_id))
        .await;
}

/// Drains the outbound queue into the connection.
async fn write_loop<C: Connection>(conn: Arc<C>, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = conn.send(&bytes).await {
            debug!(conn_id = %conn.id(), error = %e, "send failed, writer stopping");
            return;
        }
    }
}

struct Dispatcher<H: JsonRpcHandler> {
    conn_id: ConnectionId,
    /// This connection's own link, for answers outside any session.
    link: TransportLink,
    session: Option<Session>,
    watchdog: Option<Duration>,
    state: Arc<ServerState<H>>,
}

impl<H: JsonRpcHandler> Dispatcher<H> {
    async fn on_message(&mut self, data: &[u8]) {
        let value: Value = match JsonCodec.decode(data) {
            Ok(value) => value,
            Err(e) => {
                warn!(conn_id = %self.conn_id, error = %e, "unparseable message dropped");
                return;
            }
        };
        let message = match Message::from_value(value.clone()) {
            Ok(message) => message,
            Err(e) => {
                warn!(conn_id = %self.conn_id, error = %e, "invalid message");
                if let Some(id) = Message::peek_id(&value) {
                    self.reply(Response::error(Some(id), e.into()));
                }
                return;
            }
        };

        match message {
            Message::Response(response) => self.on_response(response),
            Message::Request(request) => self.on_request(request).await,
        }
    }

    fn on_response(&self, response: Response) {
        match &self.session {
            Some(session) => {
                let id = response.id;
                if !session.handle_response(response) {
                    debug!(conn_id = %self.conn_id, ?id, "uncorrelated response dropped");
                }
            }
            None => warn!(conn_id = %self.conn_id, id = ?response.id, "response before any session dropped"),
        }
    }

    async fn on_request(&mut self, request: Request) {
        debug!(conn_id = %self.conn_id, id = ?request.id, method = %request.method, "request received");
        match request.method.as_str() {
            method::CONNECT => self.on_connect(request).await,
            method::KEEP_ALIVE => {
                if let Some(session) = self.bind_session(&request).await {
                    self.arm_watchdog(&request);
                    trace!(conn_id = %self.conn_id, "keepalive");
                    if let Some(id) = request.id {
                        let pong = Props::new().with(param::VALUE, PONG);
                        self.send(&session, Response::success(Some(id), pong.into()));
                    }
                }
            }
            method::CLOSE_SESSION => self.on_close_session(request).await,
            _ => {
                if let Some(session) = self.bind_session(&request).await {
                    let handler = Arc::clone(&self.state.handler);
                    tokio::spawn(dispatch(handler, Transaction::new(session, request)));
                }
            }
        }
    }

    /// `connect`: start a session, or resume the one named by `sessionId`.
    async fn on_connect(&mut self, request: Request) {
        let session = match &request.session_id {
            Some(sid) => {
                if let Some(current) = self.live_session() {
                    if current.id().is_some_and(|id| id.as_str() == sid) {
                        self.answer_connect(&current, &request);
                        return;
                    }
                }
                match self.resume(SessionId::new(sid.as_str())).await {
                    Ok(session) => session,
                    Err(error) => {
                        self.reply(Response::error(request.id, error));
                        return;
                    }
                }
            }
            None => match self.live_session() {
                Some(current) => current,
                None => self.start().await,
            },
        };
        self.answer_connect(&session, &request);
    }

    fn answer_connect(&self, session: &Session, request: &Request) {
        let Some(id) = request.id else { return };
        let sid = session.id().map(|id| id.to_string()).unwrap_or_default();
        let result = Props::new().with(param::SESSION_ID, sid);
        self.send(session, Response::success(Some(id), result.into()));
    }

    /// `closeSession`: answer, then close with no grace period. The
    /// connection stays open; a later request starts a new session.
    async fn on_close_session(&mut self, request: Request) {
        let Some(session) = self.session.take() else {
            self.reply(Response::empty(request.id));
            return;
        };
        if let Some(id) = request.id {
            self.send(&session, Response::empty(Some(id)));
        }
        if let Some(sid) = session.id() {
            self.state.sessions.lock().await.close(&sid);
        }
        session.close();
        info!(conn_id = %self.conn_id, session_id = ?session.id(), "session closed by peer");
    }

    /// The session a request runs in, binding one first if needed.
    ///
    /// Failures are answered here and yield `None`.
    async fn bind_session(&mut self, request: &Request) -> Option<Session> {
        if let Some(session) = self.live_session() {
            if request
                .session_id
                .as_deref()
                .is_some_and(|sid| session.id().is_some_and(|id| id.as_str() != sid))
            {
                debug!(conn_id = %self.conn_id, "request names another session, serving it in the bound one");
            }
            return Some(session);
        }
        match &request.session_id {
            Some(sid) => match self.resume(SessionId::new(sid.as_str())).await {
                Ok(session) => Some(session),
                Err(error) => {
                    self.reply(Response::error(request.id, error));
                    None
                }
            },
            None => Some(self.start().await),
        }
    }

    fn live_session(&self) -> Option<Session> {
        self.session.as_ref().filter(|s| !s.is_closed()).cloned()
    }

    async fn start(&mut self) -> Session {
        let session = self.state.sessions.lock().await.create(self.link.clone());
        self.state.handler.after_connection_established(&session);
        watch_session(Arc::clone(&self.state), session.clone());
        self.session = Some(session.clone());
        session
    }

    async fn resume(&mut self, id: SessionId) -> Result<Session, ResponseError> {
        let link = self.link.clone();
        let resumed = {
            let mut sessions = self.state.sessions.lock().await;
            // A connection serves one session at a time.
            if self.session.is_some() {
                sessions.transport_closed(self.conn_id);
            }
            sessions.reconnect(&id, link)
        };
        match resumed {
            Ok(session) => {
                self.session = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                warn!(conn_id = %self.conn_id, session_id = %id, error = %e, "reconnection refused");
                Err(e.into())
            }
        }
    }

    fn arm_watchdog(&mut self, request: &Request) {
        let interval = request
            .params
            .as_ref()
            .and_then(|p| p.get(param::INTERVAL))
            .and_then(Value::as_u64);
        if let Some(ms) = interval.filter(|ms| *ms > 0) {
            let limit = Duration::from_millis(ms) * self.state.config.watchdog_pings;
            if self.watchdog != Some(limit) {
                debug!(conn_id = %self.conn_id, ?limit, "keepalive watchdog armed");
            }
            self.watchdog = Some(limit);
        }
    }

    fn send(&self, session: &Session, response: Response) {
        if let Err(e) = session.send_response(response) {
            debug!(conn_id = %self.conn_id, error = %e, "response not sent");
        }
    }

    /// Answers outside any session, straight onto this connection.
    fn reply(&self, response: Response) {
        if response.id.is_none() {
            return;
        }
        match JsonCodec.encode(&response) {
            Ok(bytes) => {
                if self.link.send(bytes).is_err() {
                    debug!(conn_id = %self.conn_id, "writer gone, reply dropped");
                }
            }
            Err(e) => warn!(conn_id = %self.conn_id, error = %e, "cannot encode reply"),
        }
    }

    async fn finish(self) {
        let Some(session) = self.session else { return };
        self.state.sessions.lock().await.transport_closed(self.conn_id);
        debug!(conn_id = %self.conn_id, session_id = ?session.id(), state = ?session.state(), "transport released");
    }
}

/// Cleans up after a session once it closes, however that happens.
fn watch_session<H: JsonRpcHandler>(state: Arc<ServerState<H>>, session: Session) {
    tokio::spawn(async move {
        session.closed().await;
        state.sessions.lock().await.cleanup_closed();
        state.handler.after_connection_closed(&session);
    });
}

#[cfg(test)]
mod tests {
    use romwire_protocol::ErrorCode;

    use super::*;

    #[test]
    fn test_error_code_for_refused_reconnect_is_session_not_found() {
        let err: ResponseError = romwire_session::SessionError::NotFound("gone".into()).into();
        assert_eq!(err.error_code(), Some(ErrorCode::SessionNotFound));
    }
}
