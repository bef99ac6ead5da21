//! # Guild Gateway Client
//!
//! Async client for a chat platform's real-time gateway.
//!
//! The crate logs in over REST, discovers the gateway endpoint, opens a duplex
//! connection, identifies, keeps the connection alive with heartbeats and
//! turns the inbound event stream into a local mirror of guilds, members,
//! channels, roles and presences, calling your handlers as events arrive.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any
//!   backend; the REST side sits behind [`RestApi`]
//! - **WebSocket built-in**: `transport-websocket` (default) provides
//!   `WebSocketTransport` and `WebSocketConnector`
//! - **HTTP built-in**: `rest-http` (default) provides `HttpRestClient`
//! - **Typed events**: a closed [`EventKind`] set; unknown events are ignored
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use guild_gateway_client::{Credentials, Session, SessionConfig};
//!
//! let mut session = Session::with_http(SessionConfig::new())?;
//! session.set_message_handler(|msg, _handle| println!("{}: {}", msg.author.username, msg.content));
//! session.login(&Credentials::new("bot@example.com", "secret")).await?;
//! session.connect().await?;
//! let reason = session.run().await?;
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod protocol;
pub mod rest;
pub mod session;
pub mod store;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use config::SessionConfig;
pub use dispatch::Handlers;
pub use error::GatewayError;
pub use model::{Channel, Guild, Member, Presence, Role, User};
pub use protocol::{EventKind, GatewayEvent, MessageCreate};
pub use rest::{ChannelPatch, Credentials, GuildPatch, MessageSend, RestApi};
pub use session::{ExitReason, Session, SessionHandle, SessionState};
pub use store::{EntityStore, MergeOutcome};
pub use transport::{Connector, Transport};

#[cfg(feature = "rest-http")]
pub use rest::HttpRestClient;
#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
