//! Wire types for the gateway protocol.
//!
//! Every gateway frame is a JSON envelope:
//!
//! ```json
//! {"op": 0, "s": 42, "t": "MESSAGE_CREATE", "d": { ... }}
//! ```
//!
//! `op` selects the frame class, `s` is the server's sequence number, `t` names
//! the event for dispatch frames and `d` carries the payload whose shape is
//! determined by `t`. Outbound frames (identify, heartbeat) only carry `op`
//! and `d`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Channel, Guild, User};

// ── Opcodes ─────────────────────────────────────────────────────────

/// Server → client event dispatch.
pub const OP_DISPATCH: u32 = 0;
/// Client → server liveness signal.
pub const OP_HEARTBEAT: u32 = 1;
/// Client → server handshake.
pub const OP_IDENTIFY: u32 = 2;

// ── Outbound frames ─────────────────────────────────────────────────

/// An outbound frame: an opcode plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame<T> {
    pub op: u32,
    pub d: T,
}

/// Client identification sent in the handshake. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProperties {
    #[serde(rename = "$os")]
    pub os: String,
    #[serde(rename = "$browser")]
    pub browser: String,
    #[serde(rename = "$device")]
    pub device: String,
    #[serde(rename = "$referrer")]
    pub referrer: String,
    #[serde(rename = "$referring_domain")]
    pub referring_domain: String,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
            referrer: String::new(),
            referring_domain: String::new(),
        }
    }
}

/// Payload of the identify (handshake) frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    pub token: String,
    pub properties: ClientProperties,
    pub v: u32,
}

impl OutboundFrame<Identify> {
    /// Build the handshake frame.
    pub fn identify(token: impl Into<String>, version: u32, properties: ClientProperties) -> Self {
        Self {
            op: OP_IDENTIFY,
            d: Identify {
                token: token.into(),
                properties,
                v: version,
            },
        }
    }
}

impl OutboundFrame<u64> {
    /// Build a liveness frame carrying a millisecond timestamp.
    pub fn heartbeat(timestamp_ms: u64) -> Self {
        Self {
            op: OP_HEARTBEAT,
            d: timestamp_ms,
        }
    }
}

// ── Inbound envelope ────────────────────────────────────────────────

/// Why an inbound frame could not be classified.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Not a JSON object, or a field has the wrong type (e.g. a numeric `t`).
    #[error("malformed frame envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A dispatch frame without an event tag.
    #[error("dispatch frame without event tag (seq {seq:?})")]
    MissingTag { seq: Option<u64> },
}

/// The outer structure of every inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Absent opcodes are treated as dispatch.
    #[serde(default)]
    pub op: u32,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: serde_json::Value,
}

/// A classified inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// An event dispatch; `data` still has to be decoded for `tag`.
    Dispatch {
        seq: Option<u64>,
        tag: String,
        data: serde_json::Value,
    },
    /// A non-dispatch frame (e.g. heartbeat acknowledgement). Ignored.
    ///
    /// Only dispatch frames are required to carry a tag. Untagged frames with
    /// any other opcode, including opcodes this client has never heard of,
    /// are skipped so that new control frames do not end the session.
    Control { op: u32, seq: Option<u64> },
}

impl Inbound {
    /// Parse and classify a raw text frame.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::Malformed`] when the text is not a valid envelope and
    /// [`EnvelopeError::MissingTag`] for a dispatch frame with a null or
    /// absent `t`.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        match (envelope.op, envelope.t) {
            (OP_DISPATCH, Some(tag)) => Ok(Self::Dispatch {
                seq: envelope.s,
                tag,
                data: envelope.d,
            }),
            (OP_DISPATCH, None) => Err(EnvelopeError::MissingTag { seq: envelope.s }),
            (op, _) => Ok(Self::Control { op, seq: envelope.s }),
        }
    }
}

// ── Event kinds ─────────────────────────────────────────────────────

/// The closed set of dispatch events this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    MessageCreate,
    GuildMemberAdd,
    GuildMemberRemove,
    GuildMemberUpdate,
    PresenceUpdate,
    ChannelUpdate,
    GuildUpdate,
}

impl EventKind {
    /// All known kinds.
    pub const ALL: [EventKind; 8] = [
        EventKind::Ready,
        EventKind::MessageCreate,
        EventKind::GuildMemberAdd,
        EventKind::GuildMemberRemove,
        EventKind::GuildMemberUpdate,
        EventKind::PresenceUpdate,
        EventKind::ChannelUpdate,
        EventKind::GuildUpdate,
    ];

    /// Map a wire tag to a kind. Unknown tags return `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "READY" => Self::Ready,
            "MESSAGE_CREATE" => Self::MessageCreate,
            "GUILD_MEMBER_ADD" => Self::GuildMemberAdd,
            "GUILD_MEMBER_REMOVE" => Self::GuildMemberRemove,
            "GUILD_MEMBER_UPDATE" => Self::GuildMemberUpdate,
            "PRESENCE_UPDATE" => Self::PresenceUpdate,
            "CHANNEL_UPDATE" => Self::ChannelUpdate,
            "GUILD_UPDATE" => Self::GuildUpdate,
            _ => return None,
        })
    }

    /// The wire tag for this kind.
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::MessageCreate => "MESSAGE_CREATE",
            Self::GuildMemberAdd => "GUILD_MEMBER_ADD",
            Self::GuildMemberRemove => "GUILD_MEMBER_REMOVE",
            Self::GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
            Self::PresenceUpdate => "PRESENCE_UPDATE",
            Self::ChannelUpdate => "CHANNEL_UPDATE",
            Self::GuildUpdate => "GUILD_UPDATE",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

// ── Event payloads ──────────────────────────────────────────────────

/// `READY`: the first dispatch of a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadyPayload {
    #[serde(default)]
    pub v: u32,
    /// The account this session is logged in as.
    #[serde(default)]
    pub user: User,
    #[serde(default)]
    pub session_id: String,
    /// Liveness period in milliseconds.
    #[serde(default)]
    pub heartbeat_interval: u64,
    #[serde(default)]
    pub guilds: Vec<Guild>,
}

/// `MESSAGE_CREATE`: a message was posted in a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageCreate {
    pub id: String,
    pub channel_id: String,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub edited_timestamp: Option<String>,
    #[serde(default)]
    pub tts: bool,
    #[serde(default)]
    pub mention_everyone: bool,
    #[serde(default)]
    pub mentions: Vec<User>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    #[serde(default)]
    pub embeds: Vec<serde_json::Value>,
    /// Client-chosen correlation value; strings or numbers on the wire.
    #[serde(default)]
    pub nonce: Option<serde_json::Value>,
}

/// `GUILD_MEMBER_ADD`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildMemberAdd {
    pub guild_id: String,
    pub user: User,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub joined_at: String,
}

/// `GUILD_MEMBER_REMOVE`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildMemberRemove {
    pub guild_id: String,
    pub user: User,
}

/// `GUILD_MEMBER_UPDATE`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildMemberUpdate {
    pub guild_id: String,
    pub user: User,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// `PRESENCE_UPDATE`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub guild_id: String,
    pub user: User,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub game_id: serde_json::Value,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// `CHANNEL_UPDATE`: the full channel object plus its guild.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelUpdate {
    /// `None` for channels outside any guild.
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(flatten)]
    pub channel: Channel,
}

// ── Decoded events ──────────────────────────────────────────────────

/// A decoded dispatch event.
///
/// Large payloads are boxed to keep the enum small.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready(Box<ReadyPayload>),
    MessageCreate(Box<MessageCreate>),
    GuildMemberAdd(GuildMemberAdd),
    GuildMemberRemove(GuildMemberRemove),
    GuildMemberUpdate(GuildMemberUpdate),
    PresenceUpdate(PresenceUpdate),
    ChannelUpdate(Box<ChannelUpdate>),
    GuildUpdate(Box<Guild>),
    /// A tag this client does not know. Legal and ignored.
    Unknown(String),
}

impl GatewayEvent {
    /// Decode `data` into the payload shape selected by `tag`.
    ///
    /// Unknown tags never fail; they produce [`GatewayEvent::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns the serde error when `data` does not match the shape of a known
    /// tag.
    pub fn decode(tag: &str, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        let Some(kind) = EventKind::from_tag(tag) else {
            return Ok(Self::Unknown(tag.to_string()));
        };
        Ok(match kind {
            EventKind::Ready => Self::Ready(Box::new(serde_json::from_value(data)?)),
            EventKind::MessageCreate => Self::MessageCreate(Box::new(serde_json::from_value(data)?)),
            EventKind::GuildMemberAdd => Self::GuildMemberAdd(serde_json::from_value(data)?),
            EventKind::GuildMemberRemove => Self::GuildMemberRemove(serde_json::from_value(data)?),
            EventKind::GuildMemberUpdate => Self::GuildMemberUpdate(serde_json::from_value(data)?),
            EventKind::PresenceUpdate => Self::PresenceUpdate(serde_json::from_value(data)?),
            EventKind::ChannelUpdate => Self::ChannelUpdate(Box::new(serde_json::from_value(data)?)),
            EventKind::GuildUpdate => Self::GuildUpdate(Box::new(serde_json::from_value(data)?)),
        })
    }

    /// The kind of this event, or `None` for [`GatewayEvent::Unknown`].
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Ready(_) => Some(EventKind::Ready),
            Self::MessageCreate(_) => Some(EventKind::MessageCreate),
            Self::GuildMemberAdd(_) => Some(EventKind::GuildMemberAdd),
            Self::GuildMemberRemove(_) => Some(EventKind::GuildMemberRemove),
            Self::GuildMemberUpdate(_) => Some(EventKind::GuildMemberUpdate),
            Self::PresenceUpdate(_) => Some(EventKind::PresenceUpdate),
            Self::ChannelUpdate(_) => Some(EventKind::ChannelUpdate),
            Self::GuildUpdate(_) => Some(EventKind::GuildUpdate),
            Self::Unknown(_) => None,
        }
    }
}

#[cfg(test)]
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
    use serde_json::json;

    #[test]
    fn identify_frame_wire_shape() {
        let props = ClientProperties {
            os: "linux".into(),
            browser: "bot".into(),
            device: "bot".into(),
            referrer: String::new(),
            referring_domain: String::new(),
        };
        let frame = OutboundFrame::identify("tok", 2, props);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["op"], 2);
        assert_eq!(value["d"]["token"], "tok");
        assert_eq!(value["d"]["v"], 2);
        assert_eq!(value["d"]["properties"]["$os"], "linux");
        assert_eq!(value["d"]["properties"]["$referring_domain"], "");
    }

    #[test]
    fn heartbeat_frame_wire_shape() {
        let json = serde_json::to_string(&OutboundFrame::heartbeat(1_700_000_000_000)).unwrap();
        assert_eq!(json, r#"{"op":1,"d":1700000000000}"#);
    }

    #[test]
    fn parse_dispatch_frame() {
        let inbound = Inbound::parse(r#"{"op":0,"s":3,"t":"FOO","d":{"x":1}}"#).unwrap();
        match inbound {
            Inbound::Dispatch { seq, tag, data } => {
                assert_eq!(seq, Some(3));
                assert_eq!(tag, "FOO");
                assert_eq!(data["x"], 1);
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_op_defaults_to_dispatch() {
        let inbound = Inbound::parse(r#"{"t":"READY","d":{}}"#).unwrap();
        assert!(matches!(inbound, Inbound::Dispatch { .. }));
    }

    #[test]
    fn dispatch_without_tag_is_an_error() {
        let err = Inbound::parse(r#"{"op":0,"s":9,"t":null,"d":{}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingTag { seq: Some(9) }));

        let err = Inbound::parse(r#"{"s":1,"d":{}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingTag { .. }));
    }

    #[test]
    fn non_string_tag_is_malformed() {
        let err = Inbound::parse(r#"{"op":0,"t":5,"d":{}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            Inbound::parse("not json").unwrap_err(),
            EnvelopeError::Malformed(_)
        ));
        assert!(matches!(
            Inbound::parse("[1,2,3]").unwrap_err(),
            EnvelopeError::Malformed(_)
        ));
    }

    #[test]
    fn control_frames_are_classified() {
        let inbound = Inbound::parse(r#"{"op":11}"#).unwrap();
        assert!(matches!(inbound, Inbound::Control { op: 11, seq: None }));
    }

    #[test]
    fn unfamiliar_opcodes_are_control_frames() {
        let inbound = Inbound::parse(r#"{"op":300,"s":4,"d":{"anything":true}}"#).unwrap();
        assert!(matches!(inbound, Inbound::Control { op: 300, seq: Some(4) }));
    }

    #[test]
    fn event_kind_tags_are_consistent() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_tag(kind.as_tag()), Some(kind));
        }
        assert_eq!(EventKind::from_tag("TYPING_START"), None);
    }

    #[test]
    fn unknown_tag_decodes_to_unknown() {
        let event = GatewayEvent::decode("TYPING_START", json!({"whatever": true})).unwrap();
        assert!(matches!(&event, GatewayEvent::Unknown(tag) if tag == "TYPING_START"));
        assert_eq!(event.kind(), None);
    }

    #[test]
    fn ready_payload_decodes() {
        let event = GatewayEvent::decode(
            "READY",
            json!({
                "v": 2,
                "user": {"id": "bot", "username": "bot", "discriminator": "0001"},
                "session_id": "abc",
                "heartbeat_interval": 41250,
                "guilds": [{"id": "g1", "name": "Guild"}]
            }),
        )
        .unwrap();
        let GatewayEvent::Ready(ready) = event else {
            panic!("expected Ready");
        };
        assert_eq!(ready.heartbeat_interval, 41250);
        assert_eq!(ready.session_id, "abc");
        assert_eq!(ready.guilds.len(), 1);
    }

    #[test]
    fn channel_update_flattens_channel() {
        let event = GatewayEvent::decode(
            "CHANNEL_UPDATE",
            json!({"guild_id": "g1", "id": "c1", "name": "renamed", "topic": null, "position": 4}),
        )
        .unwrap();
        let GatewayEvent::ChannelUpdate(update) = event else {
            panic!("expected ChannelUpdate");
        };
        assert_eq!(update.guild_id.as_deref(), Some("g1"));
        assert_eq!(update.channel.id, "c1");
        assert_eq!(update.channel.name, "renamed");
        assert_eq!(update.channel.topic, "");
        assert_eq!(update.channel.position, 4);
    }

    #[test]
    fn known_tag_with_bad_payload_fails() {
        let err = GatewayEvent::decode("GUILD_MEMBER_REMOVE", json!({"guild_id": 12}));
        assert!(err.is_err());
    }
}
