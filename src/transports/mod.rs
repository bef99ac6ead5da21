//! Concrete [`Transport`](crate::Transport) implementations.
//!
//! | Feature                | Transport              | Connector              |
//! |------------------------|------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] | [`WebSocketConnector`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), guild_gateway_client::GatewayError> {
//! use guild_gateway_client::{Transport, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("wss://gateway.example.com").await?;
//! ws.send(r#"{"op":1,"d":0}"#.to_string()).await?;
//!
//! if let Some(Ok(frame)) = ws.recv().await {
//!     println!("gateway said: {frame}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
