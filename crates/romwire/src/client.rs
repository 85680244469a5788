//! The JSON-RPC client: one session over a reconnecting transport.
//!
//! A supervisor task owns the current connection. It reads inbound
//! messages, and when the connection drops (or the keepalive gives up on
//! it) it dials again every `reconnect_delay` until the session's grace
//! period runs out. Each new connection is attached to the same session,
//! which re-sends everything still awaiting an answer, and then re-binds
//! the server side with a `connect` carrying the session id.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use romwire_protocol::{
    Codec, ErrorCode, JsonCodec, Message, Request, Response, ResponseError, Value, method,
};
use romwire_rom::{EventHandler, EventNotification};
use romwire_session::{Session, SessionError, SessionId, SessionState, Transaction, TransportLink};
use romwire_transport::{Connection, ConnectionId, Connector, TransportError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::handler::{JsonRpcHandler, dispatch};
use crate::RomwireError;

/// How long [`JsonRpcClient::close`] waits for the server to confirm.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type RequestHandler = Arc<dyn Fn(Transaction) -> BoxFuture<'static, ()> + Send + Sync>;

struct Shared {
    session: Session,
    events: RwLock<Option<EventHandler>>,
    requests: RwLock<Option<RequestHandler>>,
}

/// A connected JSON-RPC client.
///
/// ```rust,ignore
/// let client = JsonRpcClient::connect(
///     WebSocketConnector::new("ws://127.0.0.1:8888"),
///     ClientConfig::default(),
/// )
/// .await?;
/// let result = client.call("echo", Some(json!({"text": "hi"}))).await?;
/// client.close().await;
/// ```
pub struct JsonRpcClient {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl JsonRpcClient {
    /// Dials the server and performs the `connect` handshake.
    ///
    /// # Errors
    /// Fails if the first dial fails or the server refuses the handshake.
    /// Later connection losses are handled by reconnecting.
    pub async fn connect<K>(connector: K, config: ClientConfig) -> Result<Self, RomwireError>
    where
        K: Connector<Error = TransportError>,
    {
        let config = config.validated();
        let conn = connector.connect().await?;

        let shared = Arc::new(Shared {
            session: Session::new(config.session.clone()),
            events: RwLock::new(None),
            requests: RwLock::new(None),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = tokio::spawn(supervise(
            connector,
            conn,
            Arc::clone(&shared),
            config.reconnect_delay,
            shutdown_rx,
        ));
        let client = Self {
            shared,
            shutdown,
            supervisor: Mutex::new(Some(supervisor)),
        };

        let response = client.shared.session.call(method::CONNECT, None).await?;
        response.outcome.map_err(RomwireError::Response)?;
        info!(session_id = ?client.session_id(), "connected");

        if let Some(interval) = config.session.keepalive_interval {
            client.shared.session.start_keepalive(interval);
        }
        Ok(client)
    }

    pub fn session(&self) -> &Session {
        &self.shared.session
    }

    /// The id the server assigned, once the handshake completed.
    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.session.id()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.session.is_closed()
    }

    /// Calls `method` on the server and returns its result.
    ///
    /// # Errors
    /// [`RomwireError::Response`] carries an error answer from the server;
    /// [`RomwireError::Session`] a local failure (timeout, closed).
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RomwireError> {
        let response = self.shared.session.call(method, params).await?;
        response.outcome.map_err(RomwireError::Response)
    }

    /// Sends a notification. No answer is expected.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RomwireError> {
        self.shared.session.notify(method, params)?;
        Ok(())
    }

    /// Installs the handler for inbound `onEvent` notifications.
    pub fn set_event_handler(&self, handler: EventHandler) {
        *self.shared.events.write() = Some(handler);
    }

    /// Installs a handler for other requests the server sends.
    ///
    /// Without one they are answered with `MethodNotFound`.
    pub fn set_request_handler<H: JsonRpcHandler>(&self, handler: H) {
        let handler = Arc::new(handler);
        let serve: RequestHandler = Arc::new(move |transaction: Transaction| {
            Box::pin(dispatch(Arc::clone(&handler), transaction)) as BoxFuture<'static, ()>
        });
        *self.shared.requests.write() = Some(serve);
    }

    /// Ends the session: tells the server, then stops reconnecting.
    ///
    /// The server is given a short while to confirm; the local session is
    /// closed either way.
    pub async fn close(&self) {
        if !self.shared.session.is_closed() {
            let goodbye = self.shared.session.call(method::CLOSE_SESSION, None);
            match tokio::time::timeout(CLOSE_TIMEOUT, goodbye).await {
                Ok(Ok(_)) => debug!("server confirmed close"),
                Ok(Err(e)) => debug!(error = %e, "closeSession failed"),
                Err(_) => debug!("closeSession unanswered"),
            }
        }
        self.shutdown_now();
    }

    fn shutdown_now(&self) {
        self.shutdown.send_replace(true);
        self.shared.session.close();
        if let Some(task) = self.supervisor.lock().take() {
            task.abort();
        }
    }
}

impl Drop for JsonRpcClient {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("session", &self.shared.session)
            .finish()
    }
}

/// Owns the connection for the client's lifetime.
async fn supervise<K>(
    connector: K,
    first: K::Connection,
    shared: Arc<Shared>,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    K: Connector<Error = TransportError>,
{
    let mut conn = first;
    let mut resume = false;
    loop {
        let conn_id = conn.id();
        tokio::select! {
            _ = serve(conn, &shared, resume) => {}
            _ = shutdown.wait_for(|stopped| *stopped) => return,
        }
        shared.session.transport_lost(conn_id);
        resume = true;

        conn = loop {
            if shared.session.is_closed() || *shutdown.borrow() {
                debug!("session closed, supervisor stopping");
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stopped| *stopped) => return,
            }
            match connector.connect().await {
                Ok(conn) => break conn,
                Err(e) => debug!(error = %e, ?delay, "reconnect failed, retrying"),
            }
        };
        info!(session_id = ?shared.session.id(), "transport re-established");
    }
}

/// Runs one connection until it drops or the session lets go of it.
async fn serve<C: Connection>(conn: C, shared: &Shared, resume: bool) {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    let (link, outbound) = TransportLink::channel(conn_id);
    let writer = tokio::spawn(write_loop(Arc::clone(&conn), outbound));

    if let Err(e) = shared.session.attach(link) {
        debug!(%conn_id, error = %e, "session refused transport");
        writer.abort();
        let _ = conn.close().await;
        return;
    }
    if resume {
        rebind(&shared.session);
    }

    let mut state = shared.session.subscribe_state();
    loop {
        tokio::select! {
            received = conn.recv() => match received {
                Ok(Some(data)) => shared.on_message(&data),
                Ok(None) => {
                    debug!(%conn_id, "connection closed by server");
                    break;
                }
                Err(e) => {
                    debug!(%conn_id, error = %e, "recv error");
                    break;
                }
            },
            _ = detached(&mut state, conn_id) => {
                debug!(%conn_id, "session let go of transport");
                break;
            }
        }
    }

    let _ = conn.close().await;
    writer.abort();
}

/// Asks the server to re-bind the session to the new connection. A
/// refusal means the server forgot the session; the client's is closed.
fn rebind(session: &Session) {
    let target = session.clone();
    session.call_with(method::CONNECT, None, move |result| match result {
        Ok(Response {
            outcome: Err(error), ..
        }) => {
            if error.error_code() == Some(ErrorCode::SessionNotFound) {
                warn!(session_id = ?target.id(), "server no longer knows this session");
                target.close_with(SessionError::NotFound(
                    target.id().map(|id| id.to_string()).unwrap_or_default(),
                ));
            } else {
                warn!(%error, "reconnect handshake failed");
            }
        }
        Ok(_) => debug!(session_id = ?target.id(), "session re-bound"),
        Err(e) => debug!(error = %e, "reconnect handshake not answered"),
    });
}

/// Resolves once the session is no longer attached to `conn_id`.
async fn detached(state: &mut watch::Receiver<SessionState>, conn_id: ConnectionId) {
    let _ = state
        .wait_for(|s| !matches!(s, SessionState::Connected { transport_id } if *transport_id == conn_id))
        .await;
}

async fn write_loop<C: Connection>(conn: Arc<C>, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = conn.send(&bytes).await {
            debug!(conn_id = %conn.id(), error = %e, "send failed, writer stopping");
            return;
        }
    }
}

impl Shared {
    fn on_message(&self, data: &[u8]) {
        match JsonCodec.decode::<Message>(data) {
            Ok(Message::Response(response)) => {
                let id = response.id;
                if !self.session.handle_response(response) {
                    debug!(?id, "uncorrelated response dropped");
                }
            }
            Ok(Message::Request(request)) => self.on_request(request),
            Err(e) => warn!(error = %e, "invalid message from server dropped"),
        }
    }

    fn on_request(&self, request: Request) {
        if request.method == method::ON_EVENT {
            self.on_event(request);
            return;
        }

        let handler = self.requests.read().clone();
        match handler {
            Some(handler) => {
                let transaction = Transaction::new(self.session.clone(), request);
                tokio::spawn(handler(transaction));
            }
            None => {
                warn!(method = %request.method, "no handler for server request");
                if let Some(id) = request.id {
                    let error = ResponseError::new(
                        ErrorCode::MethodNotFound,
                        format!("unknown method '{}'", request.method),
                    );
                    if let Err(e) = self.session.send_response(Response::error(Some(id), error)) {
                        debug!(error = %e, "error response not sent");
                    }
                }
            }
        }
    }

    fn on_event(&self, request: Request) {
        let id = request.id;
        match EventNotification::from_params(request.params) {
            Ok(event) => {
                trace!(object = %event.object, event_type = %event.event_type, "event received");
                let handler = self.events.read().clone();
                match handler {
                    Some(handler) => handler(event),
                    None => warn!(object = %event.object, "event dropped, no handler installed"),
                }
            }
            Err(e) => warn!(error = %e, "malformed event dropped"),
        }
        // Events are normally notifications; answer one sent as a call.
        if let Some(id) = id {
            if let Err(e) = self.session.send_response(Response::empty(Some(id))) {
                debug!(error = %e, "event acknowledgement not sent");
            }
        }
    }
}
