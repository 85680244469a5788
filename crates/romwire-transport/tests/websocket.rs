//! Integration tests for the WebSocket transport.
//!
//! These tests spin up a real WebSocket server on an OS-assigned port and
//! connect to it with [`WebSocketConnector`], so both halves of the binding
//! are exercised over an actual socket.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;

    use romwire_transport::{
        Connection, Connector, Transport, TransportError, WebSocketConnector,
        WebSocketTransport,
    };

    /// Binds on port 0 and returns the transport plus a connector for it.
    async fn bind_local() -> (WebSocketTransport, WebSocketConnector) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("should have address");
        (transport, WebSocketConnector::new(format!("ws://{addr}")))
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let (mut transport, connector) = bind_local().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let client = connector.connect().await.expect("client should connect");
        let server = server_handle.await.expect("task should complete");

        assert!(server.id().into_inner() > 0);
        assert_ne!(server.id(), client.id());

        // --- Server sends, client receives ---
        server.send(b"hello from server").await.unwrap();
        let received = client.recv().await.unwrap().expect("should have data");
        assert_eq!(received, b"hello from server");

        // --- Client sends, server receives ---
        client.send(b"{\"jsonrpc\":\"2.0\"}").await.unwrap();
        let received = server.recv().await.unwrap().expect("should have data");
        assert_eq!(received, b"{\"jsonrpc\":\"2.0\"}");

        server.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_send_while_recv_pending() {
        // A reader parked in recv() must not block a writer on the same
        // connection; the engine runs them on separate tasks.
        let (mut transport, connector) = bind_local().await;
        let server_handle =
            tokio::spawn(async move { transport.accept().await.unwrap() });
        let client = connector.connect().await.unwrap();
        let server = Arc::new(server_handle.await.unwrap());

        let reader = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.recv().await })
        };
        tokio::task::yield_now().await;

        server.send(b"outbound").await.expect("send must not block");
        assert_eq!(client.recv().await.unwrap().unwrap(), b"outbound");

        client.send(b"inbound").await.unwrap();
        let got = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(got, b"inbound");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let (mut transport, connector) = bind_local().await;
        let server_handle =
            tokio::spawn(async move { transport.accept().await.unwrap() });
        let client = connector.connect().await.unwrap();
        let server = server_handle.await.unwrap();

        client.close().await.unwrap();

        let result = server.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_connect_to_closed_port_fails() {
        let (transport, connector) = bind_local().await;
        drop(transport);
        let result = connector.connect().await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }
}
