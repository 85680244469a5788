//! In-process transport built on Tokio channels.
//!
//! A [`MemoryConnection`] pair behaves like the two ends of a socket:
//! messages sent on one end arrive, in order, on the other. Closing either
//! end severs both, which is how tests simulate a dropped network link.
//!
//! [`listener`] returns a connected [`MemoryListener`] / [`MemoryConnector`]
//! pair so the same server and client engines that run over WebSocket can
//! run entirely in memory.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};

use crate::{Connection, ConnectionId, Connector, Transport, TransportError};

/// One end of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    /// Shared by both ends; flipping it to `true` closes the link.
    closed: Arc<watch::Sender<bool>>,
}

impl MemoryConnection {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(watch::Sender::new(false));

        let a = Self {
            id: ConnectionId::next(),
            outbound: b_tx,
            inbound: Mutex::new(a_rx),
            closed: Arc::clone(&closed),
        };
        let b = Self {
            id: ConnectionId::next(),
            outbound: a_tx,
            inbound: Mutex::new(b_rx),
            closed,
        };
        (a, b)
    }

    /// Returns `true` once either end has been closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(self.id.to_string()));
        }
        self.outbound
            .send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed(self.id.to_string()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut inbound = self.inbound.lock().await;
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }
        tokio::select! {
            msg = inbound.recv() => Ok(msg),
            _ = closed.wait_for(|c| *c) => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.closed.send_replace(true);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Creates an in-memory listener and a connector that dials it.
pub fn listener() -> (MemoryListener, MemoryConnector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryListener {
            incoming: rx,
            shutdown: watch::Sender::new(false),
        },
        MemoryConnector { listener: tx },
    )
}

/// Server side of the in-memory transport.
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
    shutdown: watch::Sender<bool>,
}

impl Transport for MemoryListener {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(TransportError::Shutdown);
        }
        tokio::select! {
            conn = self.incoming.recv() => conn.ok_or(TransportError::Shutdown),
            _ = shutdown.wait_for(|stopped| *stopped) => Err(TransportError::Shutdown),
        }
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        self.shutdown.send_replace(true);
        Ok(())
    }
}

/// Client side of the in-memory transport. Cheap to clone.
#[derive(Clone)]
pub struct MemoryConnector {
    listener: mpsc::UnboundedSender<MemoryConnection>,
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let (client, server) = MemoryConnection::pair();
        self.listener.send(server).map_err(|_| {
            TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory listener dropped",
            ))
        })?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_send_arrives_on_other_end() {
        let (a, b) = MemoryConnection::pair();
        a.send(b"ping").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(b"ping".to_vec()));
    }

    #[tokio::test]
    async fn test_pair_preserves_message_order() {
        let (a, b) = MemoryConnection::pair();
        for i in 0..5u8 {
            a.send(&[i]).await.unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(b.recv().await.unwrap(), Some(vec![i]));
        }
    }

    #[tokio::test]
    async fn test_close_one_end_severs_both() {
        // Closing is symmetric: the peer sees EOF and can no longer send.
        let (a, b) = MemoryConnection::pair();
        a.close().await.unwrap();

        assert_eq!(b.recv().await.unwrap(), None);
        assert!(b.send(b"late").await.is_err());
        assert!(a.is_closed() && b.is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_pending_recv() {
        let (a, b) = MemoryConnection::pair();
        let b = Arc::new(b);
        let reader = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.recv().await })
        };
        tokio::task::yield_now().await;
        a.close().await.unwrap();
        assert_eq!(reader.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_connector_delivers_server_end_to_listener() {
        let (mut listener, connector) = listener();
        let client = connector.connect().await.unwrap();
        let server = listener.accept().await.unwrap();

        client.send(b"hello").await.unwrap();
        assert_eq!(server.recv().await.unwrap(), Some(b"hello".to_vec()));
        assert_ne!(client.id(), server.id());
    }

    #[tokio::test]
    async fn test_accept_after_shutdown_returns_error() {
        let (mut listener, _connector) = listener();
        listener.shutdown().await.unwrap();
        assert!(matches!(
            listener.accept().await,
            Err(TransportError::Shutdown)
        ));
    }
}
