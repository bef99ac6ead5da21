#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for gateway client integration tests.
//!
//! Provides a channel-backed [`MockTransport`] (the test pushes inbound frames
//! through a [`GatewayScript`]), a [`MockConnector`] that hands those
//! transports to the session, a scripted [`MockRest`], and builders for
//! gateway frame JSON.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use guild_gateway_client::rest::{GatewayResponse, LoginResponse};
use guild_gateway_client::{
    ChannelPatch, Connector, Credentials, GatewayError, GuildPatch, MessageSend, RestApi,
    Session, SessionConfig, Transport,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub const TOKEN: &str = "test-token";
pub const GATEWAY_URL: &str = "wss://gateway.test";

// ── MockTransport ───────────────────────────────────────────────────

type Incoming = Result<String, GatewayError>;

/// Transport whose inbound frames are pushed by the test.
///
/// `recv` yields whatever is pushed through [`GatewayScript::tx`], and returns
/// `None` once every sender is dropped (a clean remote close).
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    /// Sends beyond this many fail.
    send_limit: Option<usize>,
}

/// The test's side of a [`MockTransport`].
pub struct GatewayScript {
    pub tx: mpsc::UnboundedSender<Incoming>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> (Self, GatewayScript) {
        Self::build(None)
    }

    /// A transport whose every `send` fails.
    pub fn failing_sends() -> (Self, GatewayScript) {
        Self::build(Some(0))
    }

    /// A transport that accepts `n` sends and fails every later one.
    pub fn failing_after(n: usize) -> (Self, GatewayScript) {
        Self::build(Some(n))
    }

    fn build(send_limit: Option<usize>) -> (Self, GatewayScript) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
            send_limit,
        };
        (transport, GatewayScript { tx, sent, closed })
    }
}

impl GatewayScript {
    /// Queue an inbound text frame.
    pub fn push(&self, frame: impl Into<String>) {
        self.tx.send(Ok(frame.into())).unwrap();
    }

    /// Queue an inbound transport error.
    pub fn push_error(&self, message: &str) {
        self.tx
            .send(Err(GatewayError::TransportReceive(message.into())))
            .unwrap();
    }

    /// All frames the client sent, parsed.
    pub fn sent_frames(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    /// Number of liveness frames sent so far.
    pub fn heartbeats(&self) -> usize {
        self.sent_frames().iter().filter(|f| f["op"] == 1).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), GatewayError> {
        let mut sent = self.sent.lock().unwrap();
        if self.send_limit.is_some_and(|limit| sent.len() >= limit) {
            return Err(GatewayError::TransportSend("broken pipe".into()));
        }
        sent.push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, GatewayError>> {
        self.incoming.recv().await
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out queued transports in order; fails to dial once empty.
#[derive(Clone, Default)]
pub struct MockConnector {
    transports: Arc<StdMutex<VecDeque<MockTransport>>>,
    pub dialed: Arc<StdMutex<Vec<String>>>,
}

impl MockConnector {
    pub fn with(transport: MockTransport) -> Self {
        let connector = Self::default();
        connector.queue(transport);
        connector
    }

    pub fn queue(&self, transport: MockTransport) {
        self.transports.lock().unwrap().push_back(transport);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, GatewayError> {
        self.dialed.lock().unwrap().push(url.to_string());
        match self.transports.lock().unwrap().pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
        }
    }
}

// ── MockRest ────────────────────────────────────────────────────────

/// Scripted REST surface that records every call as `"<name> <args>"`.
#[derive(Clone)]
pub struct MockRest {
    pub token: Option<String>,
    pub gateway_url: Option<String>,
    pub calls: Arc<StdMutex<Vec<String>>>,
}

impl Default for MockRest {
    fn default() -> Self {
        Self {
            token: Some(TOKEN.into()),
            gateway_url: Some(GATEWAY_URL.into()),
            calls: Arc::new(StdMutex::new(Vec::new())),
        }
    }
}

impl MockRest {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RestApi for MockRest {
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginResponse, GatewayError> {
        self.record(format!("authenticate {}", credentials.email));
        Ok(LoginResponse {
            token: self.token.clone(),
        })
    }

    async fn discover_gateway(&self, token: &str) -> Result<GatewayResponse, GatewayError> {
        self.record(format!("gateway {token}"));
        Ok(GatewayResponse {
            url: self.gateway_url.clone(),
        })
    }

    async fn send_message(
        &self,
        token: &str,
        channel_id: &str,
        message: &MessageSend,
    ) -> Result<Value, GatewayError> {
        self.record(format!("send_message {token} {channel_id} {}", message.content));
        Ok(json!({"id": "m-new", "content": message.content}))
    }

    async fn patch_member_roles(
        &self,
        token: &str,
        guild_id: &str,
        user_id: &str,
        roles: &[String],
    ) -> Result<Value, GatewayError> {
        self.record(format!(
            "patch_member_roles {token} {guild_id} {user_id} {}",
            roles.join(",")
        ));
        Ok(Value::Null)
    }

    async fn patch_channel(
        &self,
        token: &str,
        channel_id: &str,
        patch: &ChannelPatch,
    ) -> Result<Value, GatewayError> {
        self.record(format!("patch_channel {token} {channel_id} {patch:?}"));
        Ok(Value::Null)
    }

    async fn patch_guild(
        &self,
        token: &str,
        guild_id: &str,
        patch: &GuildPatch,
    ) -> Result<Value, GatewayError> {
        self.record(format!("patch_guild {token} {guild_id} {patch:?}"));
        Ok(Value::Null)
    }
}

// ── Session helpers ─────────────────────────────────────────────────

/// Config with inline callbacks so tests observe them deterministically.
pub fn inline_config() -> SessionConfig {
    SessionConfig::new().with_concurrent_callbacks(false)
}

/// A logged-in session with one queued mock transport.
pub fn session_with_transport(config: SessionConfig) -> (Session, GatewayScript, MockRest) {
    let (transport, script) = MockTransport::new();
    let rest = MockRest::default();
    let mut session = Session::new(config, rest.clone(), MockConnector::with(transport));
    session.login_with_token(TOKEN);
    (session, script, rest)
}

// ── Frame builders ──────────────────────────────────────────────────

/// A dispatch frame.
pub fn dispatch(tag: &str, seq: u64, d: Value) -> String {
    json!({"op": 0, "s": seq, "t": tag, "d": d}).to_string()
}

pub fn user(id: &str, name: &str) -> Value {
    json!({"id": id, "username": name, "discriminator": "0001", "avatar": null})
}

pub fn member(id: &str, name: &str, roles: &[&str]) -> Value {
    json!({
        "user": user(id, name),
        "roles": roles,
        "mute": false,
        "deaf": false,
        "joined_at": "2016-01-01T00:00:00.000000+00:00"
    })
}

pub fn presence(id: &str, name: &str, status: &str) -> Value {
    json!({"user": user(id, name), "status": status, "game_id": null})
}

/// A guild with two members (`u1` ann, `u2` bob), their presences, one role
/// and one channel.
pub fn guild_json(id: &str) -> Value {
    json!({
        "id": id,
        "name": "Test Guild",
        "region": "us-east",
        "owner_id": "u1",
        "icon": null,
        "afk_timeout": 300,
        "afk_channel_id": null,
        "joined_at": "2016-01-01T00:00:00.000000+00:00",
        "roles": [{"id": "r1", "name": "mod", "color": 0, "permissions": 8, "position": 1, "hoist": true}],
        "members": [member("u1", "ann", &["r1"]), member("u2", "bob", &["r1"])],
        "presences": [presence("u1", "ann", "online"), presence("u2", "bob", "online")],
        "channels": [{
            "id": "c1",
            "type": "text",
            "name": "general",
            "topic": "",
            "position": 0,
            "permission_overwrites": [],
            "last_message_id": null
        }],
        "voice_states": []
    })
}

pub fn ready(seq: u64, heartbeat_interval: u64, guilds: Vec<Value>) -> String {
    dispatch(
        "READY",
        seq,
        json!({
            "v": 2,
            "user": {"id": "bot", "username": "bot", "discriminator": "0001", "email": null, "verified": true},
            "session_id": "session-1",
            "read_state": [],
            "private_channels": [],
            "heartbeat_interval": heartbeat_interval,
            "guilds": guilds
        }),
    )
}

pub fn message_create(seq: u64, content: &str) -> String {
    dispatch(
        "MESSAGE_CREATE",
        seq,
        json!({
            "id": format!("m{seq}"),
            "channel_id": "c1",
            "author": user("u1", "ann"),
            "content": content,
            "timestamp": "2016-01-01T00:00:00.000000+00:00",
            "edited_timestamp": null,
            "tts": false,
            "mention_everyone": false,
            "mentions": [],
            "attachments": [],
            "embeds": [],
            "nonce": "123"
        }),
    )
}

pub fn member_add(seq: u64, guild_id: &str, id: &str, name: &str) -> String {
    dispatch(
        "GUILD_MEMBER_ADD",
        seq,
        json!({
            "guild_id": guild_id,
            "user": user(id, name),
            "roles": [],
            "joined_at": "2016-03-03T00:00:00.000000+00:00"
        }),
    )
}

pub fn member_remove(seq: u64, guild_id: &str, id: &str) -> String {
    dispatch(
        "GUILD_MEMBER_REMOVE",
        seq,
        json!({"guild_id": guild_id, "user": user(id, id)}),
    )
}

pub fn presence_update(seq: u64, guild_id: &str, id: &str, name: &str, status: &str) -> String {
    dispatch(
        "PRESENCE_UPDATE",
        seq,
        json!({
            "guild_id": guild_id,
            "user": user(id, name),
            "status": status,
            "game_id": null,
            "roles": ["r1"]
        }),
    )
}
