//! Gateway session engine.
//!
//! A [`Session`] walks through the connection lifecycle:
//!
//! ```text
//! Uninitialized ──login──▶ Authenticated ──connect──▶ Connected ──first frame──▶ Running ──▶ Stopped
//! ```
//!
//! [`Session::run`] owns the transport for the lifetime of the connection and
//! multiplexes three things with `tokio::select!`: inbound frames, outbound
//! liveness frames queued by the heartbeat task, and the stop signal. The
//! heartbeat task is spawned when the first `READY` arrives and is torn down on
//! every exit path.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut session = Session::with_http(SessionConfig::new())?;
//! session.set_message_handler(|msg, handle| {
//!     if msg.content == "!stop" {
//!         handle.stop();
//!     }
//! });
//! session.login(&Credentials::new("bot@example.com", "secret")).await?;
//! session.connect().await?;
//! let reason = session.run().await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::dispatch::{Dispatcher, Handlers};
use crate::error::{GatewayError, Result};
use crate::model::{Member, User};
use crate::protocol::{
    EnvelopeError, EventKind, GatewayEvent, Inbound, MessageCreate, OutboundFrame, ReadyPayload,
};
use crate::rest::{ChannelPatch, Credentials, GuildPatch, MessageSend, RestApi};
use crate::store::EntityStore;
use crate::transport::{Connector, Transport};

// ── State ───────────────────────────────────────────────────────────

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no token yet.
    Uninitialized,
    /// Holds a token.
    Authenticated,
    /// Transport open and handshake sent.
    Connected,
    /// At least one frame has been read.
    Running,
    /// The run loop has exited.
    Stopped,
}

/// Why [`Session::run`] returned.
#[derive(Debug)]
pub enum ExitReason {
    /// [`SessionHandle::stop`] was called.
    Stopped,
    /// The gateway closed the connection.
    Closed,
    /// Reading from the transport failed.
    ReadFailed(GatewayError),
    /// Writing a liveness frame failed.
    SendFailed(GatewayError),
    /// A frame envelope could not be classified.
    DecodeFailed(EnvelopeError),
}

impl ExitReason {
    /// `true` when the loop ended because the caller asked it to.
    pub fn is_requested(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// State shared between the session, its handles and callbacks.
struct Shared {
    store: Arc<EntityStore>,
    rest: Arc<dyn RestApi>,
    state: Mutex<SessionState>,
    token: RwLock<Option<String>>,
    current_user: RwLock<Option<User>>,
    session_id: RwLock<Option<String>>,
    last_sequence: Mutex<Option<u64>>,
    stop_tx: watch::Sender<bool>,
}

impl Shared {
    fn new(rest: Arc<dyn RestApi>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            store: Arc::new(EntityStore::new()),
            rest,
            state: Mutex::new(SessionState::Uninitialized),
            token: RwLock::new(None),
            current_user: RwLock::new(None),
            session_id: RwLock::new(None),
            last_sequence: Mutex::new(None),
            stop_tx,
        }
    }

    fn transition(&self, to: SessionState) {
        let mut state = self.state.lock();
        if *state != to {
            debug!(from = ?*state, ?to, "session: state transition");
            *state = to;
        }
    }
}

// ── Handle ──────────────────────────────────────────────────────────

/// Cheap, cloneable view of a session.
///
/// Handed to every callback. It reads the entity mirror, stops the session and
/// issues outbound REST actions. With concurrent callbacks enabled, store reads
/// may reflect merges from frames later than the one that triggered the
/// callback.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Ask the run loop to exit.
    ///
    /// Cooperative: a frame already being processed finishes first. Safe to
    /// call from any task, including from inside a callback, and any number of
    /// times.
    pub fn stop(&self) {
        let was_requested = self.shared.stop_tx.send_replace(true);
        if !was_requested {
            debug!("session: stop requested");
        }
    }

    /// `true` once [`stop`](Self::stop) has been called for the current run.
    pub fn is_stop_requested(&self) -> bool {
        *self.shared.stop_tx.borrow()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// The local entity mirror.
    pub fn store(&self) -> &EntityStore {
        &self.shared.store
    }

    pub(crate) fn store_arc(&self) -> Arc<EntityStore> {
        Arc::clone(&self.shared.store)
    }

    /// The account announced by `READY`.
    pub fn current_user(&self) -> Option<User> {
        self.shared.current_user.read().clone()
    }

    /// Gateway session ID announced by `READY`.
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id.read().clone()
    }

    /// Sequence number of the last frame received.
    pub fn last_sequence(&self) -> Option<u64> {
        *self.shared.last_sequence.lock()
    }

    /// `true` if the session holds a token.
    pub fn is_authenticated(&self) -> bool {
        self.shared.token.read().is_some()
    }

    /// Post a message into a channel.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotAuthenticated`] without a token, otherwise whatever
    /// the REST layer reports.
    pub async fn send_message(
        &self,
        channel_id: &str,
        message: &MessageSend,
    ) -> Result<serde_json::Value> {
        let token = self.require_token()?;
        self.shared.rest.send_message(&token, channel_id, message).await
    }

    /// Push `member`'s role set to the server.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotAuthenticated`] without a token, otherwise whatever
    /// the REST layer reports.
    pub async fn change_roles_for_user(
        &self,
        member: &Member,
        guild_id: &str,
    ) -> Result<serde_json::Value> {
        let token = self.require_token()?;
        self.shared
            .rest
            .patch_member_roles(&token, guild_id, &member.user.id, &member.roles)
            .await
    }

    /// Patch a channel.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotAuthenticated`] without a token, otherwise whatever
    /// the REST layer reports.
    pub async fn patch_channel(
        &self,
        channel_id: &str,
        patch: &ChannelPatch,
    ) -> Result<serde_json::Value> {
        let token = self.require_token()?;
        self.shared.rest.patch_channel(&token, channel_id, patch).await
    }

    /// Patch a guild.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotAuthenticated`] without a token, otherwise whatever
    /// the REST layer reports.
    pub async fn patch_guild(&self, guild_id: &str, patch: &GuildPatch) -> Result<serde_json::Value> {
        let token = self.require_token()?;
        self.shared.rest.patch_guild(&token, guild_id, patch).await
    }

    fn require_token(&self) -> Result<String> {
        self.shared
            .token
            .read()
            .clone()
            .ok_or(GatewayError::NotAuthenticated)
    }

    /// A handle not attached to any session, for unit tests.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            shared: Arc::new(Shared::new(Arc::new(tests::OfflineRest))),
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .field("stop_requested", &self.is_stop_requested())
            .field("guilds", &self.store().guild_count())
            .finish()
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// A gateway session: bootstrap, handshake, heartbeat and the read loop.
pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    handlers: Handlers,
    shared: Arc<Shared>,
    gateway_url: Option<String>,
    transport: Option<Box<dyn Transport>>,
}

impl Session {
    /// Create a session over the given REST surface and gateway connector.
    pub fn new(config: SessionConfig, rest: impl RestApi, connector: impl Connector) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            handlers: Handlers::new(),
            shared: Arc::new(Shared::new(Arc::new(rest))),
            gateway_url: None,
            transport: None,
        }
    }

    /// Create a session using HTTPS for REST and WebSocket for the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Http`] if the HTTP client cannot be built.
    #[cfg(all(feature = "rest-http", feature = "transport-websocket"))]
    pub fn with_http(config: SessionConfig) -> Result<Self> {
        let rest = crate::rest::HttpRestClient::new(&config)?;
        Ok(Self::new(config, rest, crate::transports::WebSocketConnector))
    }

    // ── Configuration ───────────────────────────────────────────────

    /// Install the default `MESSAGE_CREATE` handler.
    pub fn set_message_handler<F>(&mut self, handler: F)
    where
        F: Fn(&MessageCreate, &SessionHandle) + Send + Sync + 'static,
    {
        self.handlers.set_message_handler(handler);
    }

    /// Register a callback for `kind`.
    pub fn on<F>(&mut self, kind: EventKind, callback: F)
    where
        F: Fn(&SessionHandle) + Send + Sync + 'static,
    {
        self.handlers.on(kind, callback);
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// A cloneable handle for stopping the session and reading state.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The local entity mirror.
    pub fn store(&self) -> &EntityStore {
        &self.shared.store
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// The gateway URL found by the last discovery.
    pub fn gateway_url(&self) -> Option<&str> {
        self.gateway_url.as_deref()
    }

    /// Request the run loop to exit. See [`SessionHandle::stop`].
    pub fn stop(&self) {
        self.handle().stop();
    }

    // ── Bootstrap ───────────────────────────────────────────────────

    /// Exchange credentials for a token.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Auth`] if the response has no token; transport errors
    /// from the REST layer otherwise.
    pub async fn login(&mut self, credentials: &Credentials) -> Result<()> {
        let response = self.shared.rest.authenticate(credentials).await?;
        let token = response
            .token
            .filter(|t| !t.is_empty())
            .ok_or(GatewayError::Auth)?;
        self.login_with_token(token);
        info!("session: logged in");
        Ok(())
    }

    /// Use an already known token instead of exchanging credentials.
    pub fn login_with_token(&mut self, token: impl Into<String>) {
        *self.shared.token.write() = Some(token.into());
        self.shared.transition(SessionState::Authenticated);
    }

    /// Ask the REST surface where the gateway lives.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotAuthenticated`] before login,
    /// [`GatewayError::Discovery`] if the response has no URL.
    pub async fn discover_endpoint(&mut self) -> Result<String> {
        let token = self.handle().require_token()?;
        let response = self.shared.rest.discover_gateway(&token).await?;
        let url = response
            .url
            .filter(|u| !u.is_empty())
            .ok_or(GatewayError::Discovery)?;
        debug!(%url, "session: gateway discovered");
        self.gateway_url = Some(url.clone());
        Ok(url)
    }

    /// Discover the gateway, open the connection and send the handshake.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::NotAuthenticated`] when called before login. This is
    ///   a usage error and is logged at `error` level.
    /// - [`GatewayError::Discovery`] if no endpoint is returned.
    /// - [`GatewayError::Connection`] if dialing or sending the handshake
    ///   fails. The session is not usable afterwards; start again from login.
    ///
    /// A connection opened by an earlier `connect` and not yet consumed by
    /// [`run`](Self::run) is closed first.
    pub async fn connect(&mut self) -> Result<()> {
        let Some(token) = self.shared.token.read().clone() else {
            error!("session: connect called before login");
            return Err(GatewayError::NotAuthenticated);
        };

        if let Some(mut previous) = self.transport.take() {
            warn!("session: connect called while connected, closing previous connection");
            if let Err(e) = previous.close().await {
                debug!("session: closing previous transport failed: {e}");
            }
        }

        let url = self.discover_endpoint().await?;

        let mut transport = self
            .connector
            .open(&url)
            .await
            .map_err(|e| GatewayError::Connection(format!("dial {url}: {e}")))?;

        let identify = OutboundFrame::identify(
            token,
            self.config.protocol_version,
            self.config.properties.clone(),
        );
        let frame = serde_json::to_string(&identify)?;
        if let Err(e) = transport.send(frame).await {
            error!("session: handshake failed: {e}");
            let _ = transport.close().await;
            return Err(GatewayError::Connection(format!("handshake: {e}")));
        }

        // A stop requested during a previous run must not end this one.
        self.shared.stop_tx.send_replace(false);
        *self.shared.last_sequence.lock() = None;
        self.transport = Some(transport);
        self.shared.transition(SessionState::Connected);
        info!(%url, "session: connected");
        Ok(())
    }

    /// [`connect`](Self::connect) followed by [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Any error from `connect`.
    pub async fn start(&mut self) -> Result<ExitReason> {
        self.connect().await?;
        self.run().await
    }

    // ── Run loop ────────────────────────────────────────────────────

    /// Read and dispatch frames until the connection ends or
    /// [`stop`](SessionHandle::stop) is called.
    ///
    /// Run-phase failures are reported through the returned [`ExitReason`];
    /// the heartbeat task is cancelled and the transport closed before this
    /// returns.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotConnected`] if called without a successful
    /// [`connect`](Self::connect).
    pub async fn run(&mut self) -> Result<ExitReason> {
        let Some(mut transport) = self.transport.take() else {
            error!("session: run called without a connection");
            return Err(GatewayError::NotConnected);
        };

        let handle = self.handle();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.shared.store),
            Arc::new(self.handlers.clone()),
            self.config.concurrent_callbacks,
        );
        let (outbound_tx, mut outbound_rx) =
            mpsc::channel::<String>(self.config.outbound_channel_capacity.max(1));
        let mut stop_rx = self.shared.stop_tx.subscribe();
        let mut heartbeat: Option<Heartbeat> = None;

        debug!("session: run loop started");

        let exit = loop {
            if *stop_rx.borrow_and_update() {
                break ExitReason::Stopped;
            }

            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        // Sender lives in `Shared`, which we hold; unreachable in practice.
                        break ExitReason::Stopped;
                    }
                }

                Some(frame) = outbound_rx.recv() => {
                    if let Err(e) = transport.send(frame).await {
                        error!("session: liveness send failed: {e}");
                        break ExitReason::SendFailed(e);
                    }
                }

                incoming = transport.recv() => {
                    match incoming {
                        Some(Ok(text)) => {
                            if self.state() == SessionState::Connected {
                                self.shared.transition(SessionState::Running);
                            }
                            if let Err(e) =
                                self.handle_frame(&text, &dispatcher, &handle, &mut heartbeat, &outbound_tx)
                            {
                                error!("session: {e}");
                                break ExitReason::DecodeFailed(e);
                            }
                        }
                        Some(Err(e)) => {
                            error!("session: read error: {e}");
                            break ExitReason::ReadFailed(e);
                        }
                        None => {
                            info!("session: gateway closed the connection");
                            break ExitReason::Closed;
                        }
                    }
                }
            }
        };

        if let Some(heartbeat) = heartbeat.take() {
            heartbeat.cancel();
        }
        if let Err(e) = transport.close().await {
            debug!("session: transport close failed: {e}");
        }
        self.shared.transition(SessionState::Stopped);
        info!(reason = ?exit, "session: run loop exited");
        Ok(exit)
    }

    /// Classify, decode and dispatch one frame.
    ///
    /// Only an unclassifiable envelope is an error; a bad payload under a known
    /// tag is logged and skipped.
    fn handle_frame(
        &self,
        text: &str,
        dispatcher: &Dispatcher,
        handle: &SessionHandle,
        heartbeat: &mut Option<Heartbeat>,
        outbound_tx: &mpsc::Sender<String>,
    ) -> std::result::Result<(), EnvelopeError> {
        match Inbound::parse(text)? {
            Inbound::Control { op, seq } => {
                self.record_sequence(seq);
                debug!(op, "session: ignoring control frame");
            }
            Inbound::Dispatch { seq, tag, data } => {
                self.record_sequence(seq);
                match GatewayEvent::decode(&tag, data) {
                    Ok(event) => {
                        if let GatewayEvent::Ready(ready) = &event {
                            self.on_ready(ready, heartbeat, outbound_tx);
                        }
                        dispatcher.dispatch(event, handle);
                    }
                    Err(e) => {
                        warn!(%tag, ?seq, "session: dropping undecodable event: {e}");
                    }
                }
            }
        }
        Ok(())
    }

    fn record_sequence(&self, seq: Option<u64>) {
        if let Some(seq) = seq {
            *self.shared.last_sequence.lock() = Some(seq);
        }
    }

    fn on_ready(
        &self,
        ready: &ReadyPayload,
        heartbeat: &mut Option<Heartbeat>,
        outbound_tx: &mpsc::Sender<String>,
    ) {
        *self.shared.current_user.write() = Some(ready.user.clone());
        *self.shared.session_id.write() = Some(ready.session_id.clone());

        if heartbeat.is_some() {
            debug!("session: repeated READY, keeping existing heartbeat");
            return;
        }
        if ready.heartbeat_interval == 0 {
            warn!("session: READY without heartbeat interval, not sending heartbeats");
            return;
        }
        let interval = Duration::from_millis(ready.heartbeat_interval);
        info!(interval_ms = ready.heartbeat_interval, "session: starting heartbeat");
        *heartbeat = Some(Heartbeat::spawn(interval, outbound_tx.clone()));
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("gateway_url", &self.gateway_url)
            .field("connected", &self.transport.is_some())
            .field("handlers", &self.handlers)
            .finish()
    }
}

// ── Heartbeat ───────────────────────────────────────────────────────

/// Background task queueing a liveness frame every interval.
///
/// Dropping it aborts the task, so it cannot outlive the run loop.
struct Heartbeat {
    task: JoinHandle<()>,
    done: Option<oneshot::Sender<()>>,
}

impl Heartbeat {
    fn spawn(interval: Duration, outbound: mpsc::Sender<String>) -> Self {
        let (done_tx, mut done_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            // First beat one full interval after READY.
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut done_rx => break,
                    _ = ticker.tick() => {
                        let frame = match serde_json::to_string(&OutboundFrame::heartbeat(now_ms())) {
                            Ok(frame) => frame,
                            Err(e) => {
                                error!("heartbeat: failed to encode frame: {e}");
                                continue;
                            }
                        };
                        if outbound.send(frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("heartbeat: stopped");
        });
        Self {
            task,
            done: Some(done_tx),
        }
    }

    /// Signal the task to stop and abort it if it is mid-send.
    fn cancel(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        self.task.abort();
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
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
pub(crate) mod tests {
    use super::*;
    use crate::rest::{GatewayResponse, LoginResponse};
    use async_trait::async_trait;

    /// REST stub for detached handles; every call fails.
    pub(crate) struct OfflineRest;

    #[async_trait]
    impl RestApi for OfflineRest {
        async fn authenticate(&self, _: &Credentials) -> Result<LoginResponse> {
            Err(GatewayError::NotConnected)
        }
        async fn discover_gateway(&self, _: &str) -> Result<GatewayResponse> {
            Err(GatewayError::NotConnected)
        }
        async fn send_message(&self, _: &str, _: &str, _: &MessageSend) -> Result<serde_json::Value> {
            Err(GatewayError::NotConnected)
        }
        async fn patch_member_roles(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[String],
        ) -> Result<serde_json::Value> {
            Err(GatewayError::NotConnected)
        }
        async fn patch_channel(&self, _: &str, _: &str, _: &ChannelPatch) -> Result<serde_json::Value> {
            Err(GatewayError::NotConnected)
        }
        async fn patch_guild(&self, _: &str, _: &str, _: &GuildPatch) -> Result<serde_json::Value> {
            Err(GatewayError::NotConnected)
        }
    }

    #[test]
    fn stop_is_idempotent() {
        let handle = SessionHandle::detached();
        assert!(!handle.is_stop_requested());
        handle.stop();
        handle.stop();
        assert!(handle.is_stop_requested());
        assert_eq!(handle.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn outbound_actions_require_token() {
        let handle = SessionHandle::detached();
        let err = handle
            .send_message("c1", &MessageSend::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotAuthenticated));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_first_tick_waits_one_interval() {
        let (tx, mut rx) = mpsc::channel(8);
        let heartbeat = Heartbeat::spawn(Duration::from_millis(100), tx);

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let frame: OutboundFrame<u64> = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame.op, crate::protocol::OP_HEARTBEAT);

        heartbeat.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
