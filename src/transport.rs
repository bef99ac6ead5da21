//! Duplex transport abstraction for the gateway connection.
//!
//! The [`Transport`] trait is a bidirectional text frame channel between the
//! client and the gateway. Every frame is one complete JSON document, so
//! implementations handle framing internally (WebSocket frames, length-prefixed
//! TCP, in-process channels for tests).
//!
//! Dialing is split out into [`Connector`]: the session only learns the
//! gateway URL at runtime (endpoint discovery), so it needs a factory it can
//! hand that URL to.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use guild_gateway_client::error::GatewayError;
//! use guild_gateway_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, frame: String) -> Result<(), GatewayError> {
//!         // Write the JSON text frame to the wire
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, GatewayError>> {
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), GatewayError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::GatewayError;

/// A bidirectional text frame transport to the gateway.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON frame.
/// Each call to [`recv`](Transport::recv) returns one complete JSON frame.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the session loop
/// uses it inside `tokio::select!`. Dropping a pending `recv` future must not
/// lose a frame.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::TransportSend`] if the frame could not be sent,
    /// or [`GatewayError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, frame: String) -> Result<(), GatewayError>;

    /// Receive the next JSON text frame.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the gateway closed the connection
    async fn recv(&mut self) -> Option<Result<String, GatewayError>>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), GatewayError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, frame: String) -> Result<(), GatewayError> {
        (**self).send(frame).await
    }

    async fn recv(&mut self) -> Option<Result<String, GatewayError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        (**self).close().await
    }
}

/// Opens a duplex [`Transport`] to a discovered gateway URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dial `url` and return the connected transport.
    ///
    /// # Errors
    ///
    /// Any dial failure; the session reports it as
    /// [`GatewayError::Connection`].
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, GatewayError>;
}
