//! Integration tests for the WebSocket dialer.
//!
//! These tests spin up a real WebSocket server with `tokio-tungstenite` and
//! dial it with [`WebSocketDialer`] to verify frames actually cross the
//! network in both directions.

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::{SinkExt, StreamExt};
    use lifeline_transport::{
        Connection, Dialer, TransportError, WebSocketDialer,
    };
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    /// Helper: binds a listener on a random port and returns it with its
    /// `ws://` URL.
    async fn bind_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("should have addr");
        (listener, format!("ws://{addr}"))
    }

    #[tokio::test]
    async fn test_dial_send_and_receive() {
        let (listener, url) = bind_server().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            // Echo the first frame back with a prefix.
            let msg = ws.next().await.unwrap().unwrap();
            let text = msg.into_text().unwrap();
            ws.send(Message::text(format!("echo:{}", text.as_str())))
                .await
                .unwrap();
            ws
        });

        let conn = WebSocketDialer::new()
            .dial(&url)
            .await
            .expect("should dial");
        assert!(conn.id().into_inner() > 0);

        conn.send(br#"{"event":"typing"}"#).await.unwrap();
        let reply = conn.recv().await.unwrap().expect("should have data");
        assert_eq!(reply, br#"echo:{"event":"typing"}"#);

        let _ws = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_server_close() {
        let (listener, url) = bind_server().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let conn = WebSocketDialer::new().dial(&url).await.unwrap();

        let result = conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on server close");
    }

    #[tokio::test]
    async fn test_dial_rejects_non_websocket_endpoint() {
        let result = WebSocketDialer::new().dial("http://127.0.0.1:1").await;

        assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_dial_unreachable_endpoint_returns_connect_failed() {
        // Bind then drop to get a port nobody is listening on.
        let (listener, url) = bind_server().await;
        drop(listener);

        let result = WebSocketDialer::new().dial(&url).await;

        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }
}
