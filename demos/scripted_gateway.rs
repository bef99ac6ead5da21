//! # Scripted Gateway Example
//!
//! Drives a [`Session`] without any network: a loopback [`Transport`] plays
//! the gateway and a stub [`RestApi`] answers the bootstrap calls. Useful as a
//! template for testing bot logic offline, or for plugging in a different I/O
//! layer.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example scripted_gateway
//! ```

use async_trait::async_trait;
use guild_gateway_client::rest::{GatewayResponse, LoginResponse};
use guild_gateway_client::{
    ChannelPatch, Connector, Credentials, EventKind, GatewayError, GuildPatch, MessageSend,
    RestApi, Session, SessionConfig, Transport,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-based loopback transport
// ─────────────────────────────────────────────────────────────────────

/// Client half of the loopback; implements [`Transport`].
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Gateway half of the loopback; the script drives the session through it.
pub struct LoopbackGateway {
    pub rx: mpsc::UnboundedReceiver<String>,
    pub tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackGateway) {
    let (client_tx, gateway_rx) = mpsc::unbounded_channel();
    let (gateway_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackGateway {
            rx: gateway_rx,
            tx: gateway_tx,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, frame: String) -> Result<(), GatewayError> {
        self.tx
            .send(frame)
            .map_err(|e| GatewayError::TransportSend(e.to_string()))
    }

    /// Cancel-safe because `UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, GatewayError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Hand the transport out through a Connector
// ─────────────────────────────────────────────────────────────────────

struct LoopbackConnector(Mutex<Option<LoopbackTransport>>);

#[async_trait]
impl Connector for LoopbackConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, GatewayError> {
        tracing::info!("Dialing {url} (loopback)");
        let transport = self
            .0
            .lock()
            .take()
            .ok_or_else(|| GatewayError::Connection("loopback already used".into()))?;
        Ok(Box::new(transport))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: A REST stub that accepts everything
// ─────────────────────────────────────────────────────────────────────

struct StubRest;

#[async_trait]
impl RestApi for StubRest {
    async fn authenticate(&self, _: &Credentials) -> Result<LoginResponse, GatewayError> {
        Ok(LoginResponse {
            token: Some("demo-token".into()),
        })
    }

    async fn discover_gateway(&self, _: &str) -> Result<GatewayResponse, GatewayError> {
        Ok(GatewayResponse {
            url: Some("wss://loopback.invalid".into()),
        })
    }

    async fn send_message(
        &self,
        _: &str,
        channel_id: &str,
        message: &MessageSend,
    ) -> Result<serde_json::Value, GatewayError> {
        tracing::info!("REST: post {:?} to {channel_id}", message.content);
        Ok(json!({"channel_id": channel_id, "content": message.content}))
    }

    async fn patch_member_roles(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &[String],
    ) -> Result<serde_json::Value, GatewayError> {
        Ok(serde_json::Value::Null)
    }

    async fn patch_channel(
        &self,
        _: &str,
        _: &str,
        _: &ChannelPatch,
    ) -> Result<serde_json::Value, GatewayError> {
        Ok(serde_json::Value::Null)
    }

    async fn patch_guild(
        &self,
        _: &str,
        _: &str,
        _: &GuildPatch,
    ) -> Result<serde_json::Value, GatewayError> {
        Ok(serde_json::Value::Null)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 4: Play a short script
// ─────────────────────────────────────────────────────────────────────

fn user(id: &str, name: &str) -> serde_json::Value {
    json!({"id": id, "username": name, "discriminator": "0001", "avatar": null})
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, mut gateway) = loopback_pair();
    let connector = LoopbackConnector(Mutex::new(Some(transport)));
    let mut session = Session::new(
        SessionConfig::new().with_concurrent_callbacks(false),
        StubRest,
        connector,
    );

    session.on(EventKind::PresenceUpdate, |handle| {
        for guild in handle.store().guilds() {
            for presence in &guild.presences {
                tracing::info!("{}: {} is {}", guild.name, presence.user.username, presence.status);
            }
        }
        handle.stop();
    });

    session.login(&Credentials::new("demo@example.com", "demo")).await?;
    session.connect().await?;

    let Some(identify) = gateway.rx.recv().await else {
        return Err("gateway channel closed before the handshake".into());
    };
    tracing::info!("Gateway received: {identify}");

    let frames = [
        json!({"op": 0, "s": 1, "t": "READY", "d": {
            "v": 2,
            "user": user("bot", "demo-bot"),
            "session_id": "loopback",
            "heartbeat_interval": 41250,
            "guilds": [{
                "id": "g1",
                "name": "Loopback Guild",
                "members": [
                    {"user": user("u1", "ann"), "roles": [], "joined_at": ""},
                    {"user": user("u2", "bob"), "roles": [], "joined_at": ""}
                ],
                "presences": [
                    {"user": user("u1", "ann"), "status": "online", "game_id": null},
                    {"user": user("u2", "bob"), "status": "online", "game_id": null}
                ]
            }]
        }}),
        json!({"op": 0, "s": 2, "t": "TYPING_START", "d": {"user_id": "u1"}}),
        json!({"op": 0, "s": 3, "t": "GUILD_MEMBER_REMOVE", "d": {"guild_id": "g1", "user": user("u2", "bob")}}),
        json!({"op": 0, "s": 4, "t": "PRESENCE_UPDATE", "d": {
            "guild_id": "g1", "user": user("u1", "ann"), "status": "idle", "game_id": null, "roles": []
        }}),
    ];
    for frame in frames {
        gateway.tx.send(frame.to_string())?;
    }

    let reason = session.run().await?;
    let members = session
        .store()
        .guild("g1")
        .map(|g| g.members.len())
        .unwrap_or_default();
    tracing::info!("Session exited ({reason:?}); g1 has {members} member(s)");
    Ok(())
}
