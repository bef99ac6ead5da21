//! Entity types mirrored from the gateway.
//!
//! These are the server-authoritative objects the [`EntityStore`](crate::store::EntityStore)
//! keeps a local copy of. All of them decode directly from gateway payloads;
//! fields the server may omit default to empty values.
//!
//! Timestamps are kept as the ISO 8601 strings the server sends.

use serde::{Deserialize, Deserializer, Serialize};

/// A lightweight identity record embedded in members, presences and messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    /// Four digit tag. Older payloads send it as a number.
    #[serde(default, deserialize_with = "string_or_number")]
    pub discriminator: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub avatar: String,
}

impl User {
    /// Mention markup that pings this user when embedded in message content.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

/// A user's membership in one guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub joined_at: String,
}

/// Online status of a user within one guild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub user: User,
    #[serde(default)]
    pub status: String,
    /// Opaque activity reference (`null` when idle).
    #[serde(default)]
    pub game_id: serde_json::Value,
}

/// Per-role or per-member permission override on a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub allow: u64,
    #[serde(default)]
    pub deny: u64,
}

/// A guild channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(rename = "type", default, deserialize_with = "string_or_number")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub topic: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub permission_overwrites: Vec<PermissionOverwrite>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_message_id: String,
}

/// A guild role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub permissions: u64,
    #[serde(default)]
    pub position: i64,
    /// Whether members with this role are listed separately.
    #[serde(default)]
    pub hoist: bool,
}

/// A guild and everything nested under it.
///
/// `id` never changes once the guild is in the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub region: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub owner_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub icon: String,
    #[serde(default)]
    pub afk_timeout: u64,
    #[serde(default)]
    pub afk_channel_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub joined_at: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub presences: Vec<Presence>,
}

impl Guild {
    /// Look up a member by user ID.
    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.user.id == user_id)
    }

    /// Look up a presence by user ID.
    pub fn presence(&self, user_id: &str) -> Option<&Presence> {
        self.presences.iter().find(|p| p.user.id == user_id)
    }

    /// Look up a channel by ID.
    pub fn channel(&self, channel_id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == channel_id)
    }

    /// Look up a role by ID.
    pub fn role(&self, role_id: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == role_id)
    }
}

// ── Lenient field decoders ──────────────────────────────────────────

/// Accept `"1234"`, `1234` or `null` and produce a string.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Str(s)) => s,
        Some(Raw::Int(n)) => n.to_string(),
        Some(Raw::Float(f)) => f.to_string(),
        None => String::new(),
    })
}

/// Treat an explicit `null` the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
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
    fn discriminator_accepts_number_and_string() {
        let a: User = serde_json::from_value(json!({"id": "1", "discriminator": 42})).unwrap();
        let b: User = serde_json::from_value(json!({"id": "1", "discriminator": "0042"})).unwrap();
        assert_eq!(a.discriminator, "42");
        assert_eq!(b.discriminator, "0042");
    }

    #[test]
    fn null_avatar_decodes_as_empty() {
        let user: User =
            serde_json::from_value(json!({"id": "7", "username": "ann", "avatar": null})).unwrap();
        assert_eq!(user.avatar, "");
        assert_eq!(user.mention(), "<@7>");
    }

    #[test]
    fn guild_decodes_with_missing_collections() {
        let guild: Guild = serde_json::from_value(json!({
            "id": "g1",
            "name": "Test",
            "afk_channel_id": null
        }))
        .unwrap();
        assert_eq!(guild.id, "g1");
        assert!(guild.members.is_empty());
        assert!(guild.presences.is_empty());
        assert!(guild.afk_channel_id.is_none());
    }

    #[test]
    fn guild_lookups_by_id() {
        let guild: Guild = serde_json::from_value(json!({
            "id": "g1",
            "roles": [{"id": "r1", "name": "mod", "hoist": true}],
            "channels": [{"id": "c1", "name": "general", "type": "text"}],
            "members": [{"user": {"id": "u1", "username": "ann"}, "roles": ["r1"]}],
            "presences": [{"user": {"id": "u1"}, "status": "online"}]
        }))
        .unwrap();

        assert!(guild.role("r1").unwrap().hoist);
        assert_eq!(guild.channel("c1").unwrap().kind, "text");
        assert_eq!(guild.member("u1").unwrap().roles, vec!["r1".to_string()]);
        assert_eq!(guild.presence("u1").unwrap().status, "online");
        assert!(guild.member("missing").is_none());
    }
}
