//! In-memory mirror of guild state.
//!
//! [`EntityStore`] owns every [`Guild`] the session knows about, together with
//! the members, presences, channels and roles nested inside them. The
//! dispatcher is the only writer: each gateway event maps to one merge
//! operation here, and every merge holds the store's single write lock for its
//! whole duration, so merges never interleave.
//!
//! Merges are partial updates. Lookups are linear scans by ID, and "not found"
//! is the normal outcome for events about entities outside the cached scope
//! (e.g. a guild whose member list has not been fully loaded). Such events are
//! dropped and reported through [`MergeOutcome`] rather than treated as errors.

use parking_lot::RwLock;
use tracing::debug;

use crate::model::{Channel, Guild, Member, Presence, User};
use crate::protocol::{GuildMemberAdd, GuildMemberUpdate, PresenceUpdate};

/// What a merge operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// An existing entity was updated in place.
    Applied,
    /// A new entity was added.
    Inserted,
    /// The target guild is not in the store; nothing changed.
    GuildNotFound,
    /// The guild exists but the target entity does not; nothing changed.
    EntityNotFound,
}

impl MergeOutcome {
    /// `true` if the store was modified.
    pub fn changed(self) -> bool {
        matches!(self, Self::Applied | Self::Inserted)
    }
}

/// Thread-safe mirror of guild state.
#[derive(Debug, Default)]
pub struct EntityStore {
    guilds: RwLock<Vec<Guild>>,
}

impl EntityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Snapshot of one guild.
    pub fn guild(&self, guild_id: &str) -> Option<Guild> {
        self.guilds.read().iter().find(|g| g.id == guild_id).cloned()
    }

    /// Snapshot of every guild.
    pub fn guilds(&self) -> Vec<Guild> {
        self.guilds.read().clone()
    }

    /// Number of cached guilds.
    pub fn guild_count(&self) -> usize {
        self.guilds.read().len()
    }

    /// Run `f` against a guild without cloning it.
    ///
    /// The read lock is held while `f` runs; do not call back into the store's
    /// merge operations from inside `f`.
    pub fn with_guild<R>(&self, guild_id: &str, f: impl FnOnce(&Guild) -> R) -> Option<R> {
        self.guilds.read().iter().find(|g| g.id == guild_id).map(f)
    }

    /// First member, across all guilds, whose username is `name`.
    pub fn member_by_name(&self, name: &str) -> Option<Member> {
        self.guilds
            .read()
            .iter()
            .flat_map(|g| g.members.iter())
            .find(|m| m.user.username == name)
            .cloned()
    }

    // ── Merges ──────────────────────────────────────────────────────

    /// Insert the guilds announced by `READY`.
    ///
    /// A guild whose ID is already cached is replaced wholesale, so the store
    /// never holds two guilds with the same ID.
    pub fn load_guilds(&self, incoming: Vec<Guild>) {
        let mut guilds = self.guilds.write();
        for guild in incoming {
            match guilds.iter_mut().find(|g| g.id == guild.id) {
                Some(existing) => *existing = guild,
                None => guilds.push(guild),
            }
        }
        debug!(guilds = guilds.len(), "store: guilds loaded");
    }

    /// Add a member to its guild.
    ///
    /// If a member with the same user ID is already present it is replaced, so
    /// `(guild, user id)` stays unique. Mute and deaf start cleared.
    pub fn add_member(&self, event: &GuildMemberAdd) -> MergeOutcome {
        let member = Member {
            user: event.user.clone(),
            roles: event.roles.clone(),
            mute: false,
            deaf: false,
            joined_at: event.joined_at.clone(),
        };
        self.merge_guild(&event.guild_id, |guild| {
            match guild.members.iter_mut().find(|m| m.user.id == member.user.id) {
                Some(existing) => {
                    *existing = member;
                    MergeOutcome::Applied
                }
                None => {
                    guild.members.push(member);
                    MergeOutcome::Inserted
                }
            }
        })
    }

    /// Remove the member with `user`'s ID. Idempotent.
    pub fn remove_member(&self, guild_id: &str, user: &User) -> MergeOutcome {
        self.merge_guild(guild_id, |guild| {
            let before = guild.members.len();
            guild.members.retain(|m| m.user.id != user.id);
            if guild.members.len() == before {
                MergeOutcome::EntityNotFound
            } else {
                MergeOutcome::Applied
            }
        })
    }

    /// Replace an existing member's role set and user snapshot.
    ///
    /// Best effort: when the member is not cached the update is dropped
    /// ([`MergeOutcome::EntityNotFound`]). A later `GUILD_MEMBER_ADD` or
    /// `READY` is the only way the member enters the store.
    pub fn update_member(&self, event: &GuildMemberUpdate) -> MergeOutcome {
        self.merge_guild(&event.guild_id, |guild| {
            match guild.members.iter_mut().find(|m| m.user.id == event.user.id) {
                Some(member) => {
                    member.roles = event.roles.clone();
                    member.user = event.user.clone();
                    MergeOutcome::Applied
                }
                None => MergeOutcome::EntityNotFound,
            }
        })
    }

    /// Update a user's presence, inserting it if the guild has none for them.
    ///
    /// Only the entry for `event.user.id` is touched.
    pub fn update_presence(&self, event: &PresenceUpdate) -> MergeOutcome {
        self.merge_guild(&event.guild_id, |guild| {
            match guild.presences.iter_mut().find(|p| p.user.id == event.user.id) {
                Some(presence) => {
                    presence.user = event.user.clone();
                    presence.status = event.status.clone();
                    presence.game_id = event.game_id.clone();
                    MergeOutcome::Applied
                }
                None => {
                    guild.presences.push(Presence {
                        user: event.user.clone(),
                        status: event.status.clone(),
                        game_id: event.game_id.clone(),
                    });
                    MergeOutcome::Inserted
                }
            }
        })
    }

    /// Overwrite a cached channel's name, topic and position.
    pub fn update_channel(&self, guild_id: &str, update: &Channel) -> MergeOutcome {
        self.merge_guild(guild_id, |guild| {
            match guild.channels.iter_mut().find(|c| c.id == update.id) {
                Some(channel) => {
                    channel.name = update.name.clone();
                    channel.topic = update.topic.clone();
                    channel.position = update.position;
                    MergeOutcome::Applied
                }
                None => MergeOutcome::EntityNotFound,
            }
        })
    }

    /// Overwrite a cached guild's display attributes.
    ///
    /// Nested collections and `joined_at` are left alone; `GUILD_UPDATE`
    /// payloads do not carry them.
    pub fn update_guild(&self, update: &Guild) -> MergeOutcome {
        self.merge_guild(&update.id, |guild| {
            guild.name = update.name.clone();
            guild.region = update.region.clone();
            guild.owner_id = update.owner_id.clone();
            guild.icon = update.icon.clone();
            guild.afk_timeout = update.afk_timeout;
            guild.afk_channel_id = update.afk_channel_id.clone();
            MergeOutcome::Applied
        })
    }

    /// Run `merge` on the guild with `guild_id` under the write lock.
    fn merge_guild(
        &self,
        guild_id: &str,
        merge: impl FnOnce(&mut Guild) -> MergeOutcome,
    ) -> MergeOutcome {
        let mut guilds = self.guilds.write();
        match guilds.iter_mut().find(|g| g.id == guild_id) {
            Some(guild) => merge(guild),
            None => MergeOutcome::GuildNotFound,
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

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.into(),
            username: name.into(),
            ..Default::default()
        }
    }

    fn member(id: &str, name: &str, roles: &[&str]) -> Member {
        Member {
            user: user(id, name),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    fn presence(id: &str, status: &str) -> Presence {
        Presence {
            user: user(id, id),
            status: status.into(),
            game_id: serde_json::Value::Null,
        }
    }

    fn seeded() -> EntityStore {
        let store = EntityStore::new();
        store.load_guilds(vec![Guild {
            id: "g1".into(),
            name: "Guild One".into(),
            region: "us-east".into(),
            joined_at: "2016-01-01T00:00:00Z".into(),
            members: vec![member("u1", "ann", &["r1"]), member("u2", "bob", &[])],
            presences: vec![presence("u1", "online"), presence("u2", "online")],
            channels: vec![Channel {
                id: "c1".into(),
                name: "general".into(),
                position: 0,
                ..Default::default()
            }],
            ..Default::default()
        }]);
        store
    }

    fn add(guild_id: &str, id: &str, roles: &[&str]) -> GuildMemberAdd {
        GuildMemberAdd {
            guild_id: guild_id.into(),
            user: user(id, id),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            joined_at: "2016-02-02T00:00:00Z".into(),
        }
    }

    #[test]
    fn load_guilds_keeps_one_guild_per_id() {
        let store = seeded();
        store.load_guilds(vec![Guild {
            id: "g1".into(),
            name: "Replaced".into(),
            ..Default::default()
        }]);
        assert_eq!(store.guild_count(), 1);
        assert_eq!(store.guild("g1").unwrap().name, "Replaced");
    }

    #[test]
    fn add_member_appends_with_cleared_flags() {
        let store = seeded();
        assert_eq!(store.add_member(&add("g1", "u3", &["r2"])), MergeOutcome::Inserted);

        let guild = store.guild("g1").unwrap();
        assert_eq!(guild.members.len(), 3);
        let added = guild.member("u3").unwrap();
        assert_eq!(added.roles, vec!["r2".to_string()]);
        assert_eq!(added.joined_at, "2016-02-02T00:00:00Z");
        assert!(!added.mute && !added.deaf);
    }

    #[test]
    fn add_member_twice_keeps_user_unique() {
        let store = seeded();
        store.add_member(&add("g1", "u3", &[]));
        assert_eq!(store.add_member(&add("g1", "u3", &["r9"])), MergeOutcome::Applied);

        let guild = store.guild("g1").unwrap();
        assert_eq!(guild.members.iter().filter(|m| m.user.id == "u3").count(), 1);
        assert_eq!(guild.member("u3").unwrap().roles, vec!["r9".to_string()]);
    }

    #[test]
    fn add_member_to_unknown_guild_is_noop() {
        let store = seeded();
        assert_eq!(store.add_member(&add("nope", "u3", &[])), MergeOutcome::GuildNotFound);
        assert_eq!(store.guild("g1").unwrap().members.len(), 2);
    }

    #[test]
    fn remove_member_filters_by_user_id() {
        let store = seeded();
        assert_eq!(store.remove_member("g1", &user("u1", "ann")), MergeOutcome::Applied);
        let guild = store.guild("g1").unwrap();
        assert_eq!(guild.members.len(), 1);
        assert!(guild.member("u1").is_none());
    }

    #[test]
    fn removing_absent_member_leaves_collection_unchanged() {
        let store = seeded();
        let before = store.guild("g1").unwrap().members;

        assert_eq!(
            store.remove_member("g1", &user("ghost", "ghost")),
            MergeOutcome::EntityNotFound
        );
        assert_eq!(store.guild("g1").unwrap().members, before);

        assert_eq!(
            store.remove_member("missing", &user("u1", "ann")),
            MergeOutcome::GuildNotFound
        );
    }

    #[test]
    fn update_member_replaces_roles_and_user() {
        let store = seeded();
        let outcome = store.update_member(&GuildMemberUpdate {
            guild_id: "g1".into(),
            user: user("u2", "bobby"),
            roles: vec!["r1".into(), "r2".into()],
        });
        assert_eq!(outcome, MergeOutcome::Applied);

        let guild = store.guild("g1").unwrap();
        let updated = guild.member("u2").unwrap();
        assert_eq!(updated.user.username, "bobby");
        assert_eq!(updated.roles, vec!["r1".to_string(), "r2".to_string()]);
        // The other member is untouched.
        assert_eq!(guild.member("u1").unwrap(), &member("u1", "ann", &["r1"]));
    }

    #[test]
    fn update_for_uncached_member_is_dropped() {
        let store = seeded();
        let before = store.guild("g1").unwrap();
        let outcome = store.update_member(&GuildMemberUpdate {
            guild_id: "g1".into(),
            user: user("u9", "late"),
            roles: vec!["r1".into()],
        });
        assert_eq!(outcome, MergeOutcome::EntityNotFound);
        assert_eq!(store.guild("g1").unwrap(), before);
    }

    #[test]
    fn member_events_apply_in_arrival_order() {
        let store = seeded();
        store.add_member(&add("g1", "u3", &["a"]));
        store.update_member(&GuildMemberUpdate {
            guild_id: "g1".into(),
            user: user("u3", "u3"),
            roles: vec!["b".into()],
        });
        store.remove_member("g1", &user("u1", "ann"));
        store.add_member(&add("g1", "u1", &["c"]));

        let guild = store.guild("g1").unwrap();
        let mut ids: Vec<_> = guild.members.iter().map(|m| m.user.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["u1", "u2", "u3"]);
        assert_eq!(guild.member("u3").unwrap().roles, vec!["b".to_string()]);
        assert_eq!(guild.member("u1").unwrap().roles, vec!["c".to_string()]);
    }

    #[test]
    fn presence_update_only_touches_target_user() {
        let store = seeded();
        let untouched = store.guild("g1").unwrap().presence("u1").cloned().unwrap();

        let outcome = store.update_presence(&PresenceUpdate {
            guild_id: "g1".into(),
            user: user("u2", "u2"),
            status: "idle".into(),
            game_id: serde_json::json!(7),
            roles: vec![],
        });
        assert_eq!(outcome, MergeOutcome::Applied);

        let guild = store.guild("g1").unwrap();
        assert_eq!(guild.presences.len(), 2);
        assert_eq!(guild.presence("u2").unwrap().status, "idle");
        assert_eq!(guild.presence("u2").unwrap().game_id, serde_json::json!(7));
        assert_eq!(guild.presence("u1").unwrap(), &untouched);
    }

    #[test]
    fn presence_for_unknown_user_is_inserted_not_written_over_slot_zero() {
        let store = seeded();
        let before = store.guild("g1").unwrap().presences;

        let outcome = store.update_presence(&PresenceUpdate {
            guild_id: "g1".into(),
            user: user("u7", "new"),
            status: "dnd".into(),
            ..Default::default()
        });
        assert_eq!(outcome, MergeOutcome::Inserted);

        let after = store.guild("g1").unwrap().presences;
        assert_eq!(after.len(), 3);
        assert_eq!(&after[..2], &before[..]);
        assert_eq!(after[2].user.id, "u7");
        assert_eq!(after[2].status, "dnd");
    }

    #[test]
    fn update_channel_overwrites_display_fields_only() {
        let store = seeded();
        let outcome = store.update_channel(
            "g1",
            &Channel {
                id: "c1".into(),
                name: "lounge".into(),
                topic: "chill".into(),
                position: 3,
                last_message_id: "should-not-copy".into(),
                ..Default::default()
            },
        );
        assert_eq!(outcome, MergeOutcome::Applied);

        let channel = store.guild("g1").unwrap().channel("c1").cloned().unwrap();
        assert_eq!(channel.name, "lounge");
        assert_eq!(channel.topic, "chill");
        assert_eq!(channel.position, 3);
        assert_eq!(channel.last_message_id, "");

        let missing = Channel {
            id: "c404".into(),
            ..Default::default()
        };
        assert_eq!(store.update_channel("g1", &missing), MergeOutcome::EntityNotFound);
    }

    #[test]
    fn update_guild_keeps_identity_and_nested_state() {
        let store = seeded();
        let outcome = store.update_guild(&Guild {
            id: "g1".into(),
            name: "Renamed".into(),
            region: "eu-west".into(),
            owner_id: "u2".into(),
            icon: "abc".into(),
            afk_timeout: 300,
            afk_channel_id: Some("c1".into()),
            ..Default::default()
        });
        assert_eq!(outcome, MergeOutcome::Applied);

        let guild = store.guild("g1").unwrap();
        assert_eq!(guild.id, "g1");
        assert_eq!(guild.name, "Renamed");
        assert_eq!(guild.region, "eu-west");
        assert_eq!(guild.owner_id, "u2");
        assert_eq!(guild.afk_timeout, 300);
        assert_eq!(guild.afk_channel_id.as_deref(), Some("c1"));
        assert_eq!(guild.joined_at, "2016-01-01T00:00:00Z");
        assert_eq!(guild.members.len(), 2);
        assert_eq!(guild.channels.len(), 1);

        let unknown = Guild {
            id: "g2".into(),
            ..Default::default()
        };
        assert_eq!(store.update_guild(&unknown), MergeOutcome::GuildNotFound);
        assert_eq!(store.guild_count(), 1);
    }

    #[test]
    fn member_by_name_searches_all_guilds() {
        let store = seeded();
        store.load_guilds(vec![Guild {
            id: "g2".into(),
            members: vec![member("u5", "carol", &[])],
            ..Default::default()
        }]);
        assert_eq!(store.member_by_name("carol").unwrap().user.id, "u5");
        assert_eq!(store.member_by_name("ann").unwrap().user.id, "u1");
        assert!(store.member_by_name("nobody").is_none());
    }

    #[test]
    fn with_guild_reads_without_cloning() {
        let store = seeded();
        assert_eq!(store.with_guild("g1", |g| g.members.len()), Some(2));
        assert_eq!(store.with_guild("g9", |g| g.members.len()), None);
    }

    #[test]
    fn concurrent_merges_on_distinct_members_are_all_applied() {
        let store = std::sync::Arc::new(seeded());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    store.add_member(&add("g1", &format!("t{i}"), &[]));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.guild("g1").unwrap().members.len(), 10);
    }
}
