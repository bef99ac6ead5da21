//! WebSocket transport using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries gateway frames as WebSocket text messages
//! over `ws://` or `wss://`. [`WebSocketConnector`] is the [`Connector`] the
//! session uses to dial whatever URL endpoint discovery returned.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (on by default).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::GatewayError;
use crate::transport::{Connector, Transport};

/// The underlying WebSocket stream type.
///
/// Public so callers can build a [`WebSocketTransport`] from a stream they
/// dialed themselves via [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before it
/// completes does not lose a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Io`] if the URL is invalid or the connection
    /// cannot be established. I/O error kinds are preserved; everything else
    /// maps to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        tracing::debug!(url = %url, "connecting to gateway");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            GatewayError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "gateway WebSocket established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already established stream (custom TLS, proxies, headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// [`connect`](Self::connect) bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Connection`] if the deadline elapses, or any
    /// error [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, GatewayError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| GatewayError::Connection(format!("timed out connecting to {url}")))?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), GatewayError> {
        if self.closed {
            return Err(GatewayError::TransportClosed);
        }
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| GatewayError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, GatewayError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(GatewayError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "gateway sent close frame");
                    return None;
                }
                // tungstenite queues the pong itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(bytes) => {
                    // Gateway frames are JSON; a binary frame may still hold UTF-8 JSON.
                    match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => return Some(Ok(text)),
                        Err(_) => tracing::warn!("skipping non-UTF-8 binary frame"),
                    }
                }
                Message::Frame(_) => {
                    tracing::debug!("skipping raw WebSocket frame");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| GatewayError::TransportSend(e.to_string()))
    }
}

/// Dials gateway URLs with [`WebSocketTransport::connect`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, GatewayError> {
        let transport = WebSocketTransport::connect(url).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    /// Start a local WebSocket server running `handler` on the first accepted
    /// connection and return its URL.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url").await.unwrap_err();
        assert!(matches!(err, GatewayError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, GatewayError::Io(_)));
    }

    #[tokio::test]
    async fn recv_receives_text_frames_then_none_on_close() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(r#"{"op":0}"#.into())).await.unwrap();
            ws.send(Message::Text(r#"{"op":11}"#.into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), r#"{"op":0}"#);
        assert_eq!(transport.recv().await.unwrap().unwrap(), r#"{"op":11}"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn binary_utf8_frames_are_delivered_as_text() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(br#"{"op":1}"#.to_vec().into()))
                .await
                .unwrap();
            ws.send(Message::Binary(vec![0xff, 0xfe].into())).await.unwrap();
            ws.send(Message::Text("after".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), r#"{"op":1}"#);
        // The invalid UTF-8 frame is skipped.
        assert_eq!(transport.recv().await.unwrap().unwrap(), "after");
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, GatewayError::TransportClosed));
    }

    #[tokio::test]
    async fn connector_opens_boxed_transport_that_echoes() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector.open(&url).await.unwrap();
        transport.send(r#"{"op":2}"#.to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), r#"{"op":2}"#);
    }

    #[tokio::test]
    async fn connect_with_timeout_connects_within_deadline() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(r#"{"op":0,"t":"READY"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport =
            WebSocketTransport::connect_with_timeout(&url, std::time::Duration::from_secs(5))
                .await
                .unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"op":0,"t":"READY"}"#
        );
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        let err = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            std::time::Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        // Sandboxed hosts may reject the route outright instead of timing out.
        assert!(matches!(err, GatewayError::Connection(_) | GatewayError::Io(_)));
    }
}
