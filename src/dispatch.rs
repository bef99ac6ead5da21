//! Event dispatch: store mutation followed by caller callbacks.
//!
//! Every decoded [`GatewayEvent`] goes through two steps, always in this
//! order:
//!
//! 1. [`apply`] merges it into the [`EntityStore`];
//! 2. [`Handlers::invoke`] runs the callbacks registered for its
//!    [`EventKind`], then (for `MESSAGE_CREATE` only) the default message
//!    handler.
//!
//! Callbacks therefore always see post-merge state for their own frame.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::protocol::{EventKind, GatewayEvent, MessageCreate};
use crate::session::SessionHandle;
use crate::store::{EntityStore, MergeOutcome};

/// Default handler for `MESSAGE_CREATE`.
pub type MessageHandler = Arc<dyn Fn(&MessageCreate, &SessionHandle) + Send + Sync>;

/// Per-kind callback. Reads updated state through the handle.
pub type EventCallback = Arc<dyn Fn(&SessionHandle) + Send + Sync>;

/// Callback table, fixed before the session runs.
#[derive(Clone, Default)]
pub struct Handlers {
    message: Option<MessageHandler>,
    callbacks: HashMap<EventKind, Vec<EventCallback>>,
}

impl Handlers {
    /// An empty table: no message handler, no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the default message handler, replacing any previous one.
    pub fn set_message_handler<F>(&mut self, handler: F)
    where
        F: Fn(&MessageCreate, &SessionHandle) + Send + Sync + 'static,
    {
        self.message = Some(Arc::new(handler));
    }

    /// Append a callback for `kind`. Callbacks run in registration order.
    pub fn on<F>(&mut self, kind: EventKind, callback: F)
    where
        F: Fn(&SessionHandle) + Send + Sync + 'static,
    {
        self.callbacks.entry(kind).or_default().push(Arc::new(callback));
    }

    /// Callbacks registered for `kind`.
    pub fn callbacks_for(&self, kind: EventKind) -> &[EventCallback] {
        self.callbacks.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_message_handler(&self) -> bool {
        self.message.is_some()
    }

    /// Run the callbacks for `event`: per-kind callbacks first, then the
    /// default message handler for `MESSAGE_CREATE`.
    pub fn invoke(&self, event: &GatewayEvent, handle: &SessionHandle) {
        let Some(kind) = event.kind() else {
            return;
        };
        for callback in self.callbacks_for(kind) {
            callback(handle);
        }
        if let (GatewayEvent::MessageCreate(message), Some(handler)) = (event, &self.message) {
            handler(message, handle);
        }
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.callbacks.keys().map(|k| k.as_tag()).collect();
        kinds.sort_unstable();
        f.debug_struct("Handlers")
            .field("message_handler", &self.message.is_some())
            .field("callback_kinds", &kinds)
            .finish()
    }
}

/// Merge `event` into `store`.
///
/// Returns `None` for events that carry no entity state (`MESSAGE_CREATE`,
/// unknown tags).
pub fn apply(store: &EntityStore, event: &GatewayEvent) -> Option<MergeOutcome> {
    let outcome = match event {
        GatewayEvent::Ready(ready) => {
            store.load_guilds(ready.guilds.clone());
            MergeOutcome::Applied
        }
        GatewayEvent::GuildMemberAdd(add) => store.add_member(add),
        GatewayEvent::GuildMemberRemove(remove) => {
            store.remove_member(&remove.guild_id, &remove.user)
        }
        GatewayEvent::GuildMemberUpdate(update) => store.update_member(update),
        GatewayEvent::PresenceUpdate(update) => store.update_presence(update),
        GatewayEvent::ChannelUpdate(update) => match &update.guild_id {
            Some(guild_id) => store.update_channel(guild_id, &update.channel),
            None => MergeOutcome::GuildNotFound,
        },
        GatewayEvent::GuildUpdate(guild) => store.update_guild(guild),
        GatewayEvent::MessageCreate(_) => return None,
        GatewayEvent::Unknown(tag) => {
            trace!(%tag, "dispatch: ignoring unknown event");
            return None;
        }
    };
    if !outcome.changed() {
        debug!(kind = ?event.kind(), ?outcome, "dispatch: event did not match cached state");
    }
    Some(outcome)
}

/// Ties the store and the callback table together for the session loop.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<EntityStore>,
    handlers: Arc<Handlers>,
    concurrent_callbacks: bool,
}

impl Dispatcher {
    pub fn new(store: Arc<EntityStore>, handlers: Arc<Handlers>, concurrent_callbacks: bool) -> Self {
        Self {
            store,
            handlers,
            concurrent_callbacks,
        }
    }

    /// Merge `event` and run its callbacks.
    ///
    /// The merge always happens on the caller's task, so merges apply in the
    /// order frames were read. Callbacks either run inline or on a spawned
    /// task depending on configuration; in the spawned case they may overlap
    /// with merges of later frames.
    pub fn dispatch(&self, event: GatewayEvent, handle: &SessionHandle) {
        apply(&self.store, &event);

        let Some(kind) = event.kind() else {
            return;
        };
        let has_work = !self.handlers.callbacks_for(kind).is_empty()
            || (kind == EventKind::MessageCreate && self.handlers.has_message_handler());
        if !has_work {
            return;
        }

        if self.concurrent_callbacks {
            let handlers = Arc::clone(&self.handlers);
            let handle = handle.clone();
            tokio::spawn(async move {
                handlers.invoke(&event, &handle);
            });
        } else {
            self.handlers.invoke(&event, handle);
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
    use crate::model::{Guild, Member, User};
    use crate::protocol::{GuildMemberRemove, ReadyPayload};
    use std::sync::Mutex as StdMutex;

    fn ready_with_member() -> GatewayEvent {
        GatewayEvent::Ready(Box::new(ReadyPayload {
            heartbeat_interval: 1000,
            guilds: vec![Guild {
                id: "g1".into(),
                members: vec![Member {
                    user: User {
                        id: "u1".into(),
                        ..Default::default()
                    },
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }))
    }

    fn message(content: &str) -> GatewayEvent {
        GatewayEvent::MessageCreate(Box::new(MessageCreate {
            id: "m1".into(),
            channel_id: "c1".into(),
            content: content.into(),
            ..Default::default()
        }))
    }

    #[test]
    fn unknown_event_leaves_store_untouched() {
        let store = EntityStore::new();
        apply(&store, &ready_with_member());
        let before = store.guilds();

        assert_eq!(apply(&store, &GatewayEvent::Unknown("TYPING_START".into())), None);
        assert_eq!(store.guilds(), before);
    }

    #[test]
    fn apply_routes_member_remove() {
        let store = EntityStore::new();
        apply(&store, &ready_with_member());
        let outcome = apply(
            &store,
            &GatewayEvent::GuildMemberRemove(GuildMemberRemove {
                guild_id: "g1".into(),
                user: User {
                    id: "u1".into(),
                    ..Default::default()
                },
            }),
        );
        assert_eq!(outcome, Some(MergeOutcome::Applied));
        assert!(store.guild("g1").unwrap().members.is_empty());
    }

    #[test]
    fn message_create_is_not_a_merge() {
        let store = EntityStore::new();
        assert_eq!(apply(&store, &message("hi")), None);
    }

    #[test]
    fn callbacks_run_in_registration_order_then_message_handler() {
        let log = Arc::new(StdMutex::new(Vec::<String>::new()));
        let mut handlers = Handlers::new();

        let l = Arc::clone(&log);
        handlers.on(EventKind::MessageCreate, move |_| l.lock().unwrap().push("first".into()));
        let l = Arc::clone(&log);
        handlers.on(EventKind::MessageCreate, move |_| l.lock().unwrap().push("second".into()));
        let l = Arc::clone(&log);
        handlers.set_message_handler(move |msg, _| {
            l.lock().unwrap().push(format!("default:{}", msg.content));
        });

        let handle = SessionHandle::detached();
        handlers.invoke(&message("hello"), &handle);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first", "second", "default:hello"]
        );
    }

    #[test]
    fn message_handler_only_fires_for_message_create() {
        let hits = Arc::new(StdMutex::new(0));
        let mut handlers = Handlers::new();
        let h = Arc::clone(&hits);
        handlers.set_message_handler(move |_, _| *h.lock().unwrap() += 1);

        let handle = SessionHandle::detached();
        handlers.invoke(&ready_with_member(), &handle);
        handlers.invoke(&GatewayEvent::Unknown("X".into()), &handle);
        assert_eq!(*hits.lock().unwrap(), 0);

        handlers.invoke(&message("x"), &handle);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn inline_dispatch_runs_callbacks_after_merge() {
        let handle = SessionHandle::detached();
        let seen = Arc::new(StdMutex::new(None));

        let mut handlers = Handlers::new();
        let s = Arc::clone(&seen);
        handlers.on(EventKind::Ready, move |h| {
            *s.lock().unwrap() = Some(h.store().guild_count());
        });

        let dispatcher = Dispatcher::new(handle.store_arc(), Arc::new(handlers), false);
        dispatcher.dispatch(ready_with_member(), &handle);

        assert_eq!(*seen.lock().unwrap(), Some(1));
    }

    #[test]
    fn handlers_debug_lists_kinds() {
        let mut handlers = Handlers::new();
        handlers.on(EventKind::GuildUpdate, |_| {});
        let debug = format!("{handlers:?}");
        assert!(debug.contains("GUILD_UPDATE"));
        assert!(debug.contains("message_handler: false"));
    }
}
