//! Session configuration.

use std::time::Duration;

use crate::protocol::ClientProperties;

/// Default REST API root.
pub const DEFAULT_API_BASE_URL: &str = "https://discordapp.com/api";

/// Default `origin` header sent with endpoint discovery.
pub const DEFAULT_ORIGIN: &str = "https://discordapp.com";

/// Gateway protocol version announced in the handshake.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 2;

/// Default timeout for REST requests.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default capacity of the outbound (liveness → writer) queue.
const DEFAULT_OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Configuration for a [`Session`](crate::session::Session).
///
/// Every field has a default, so `SessionConfig::new()` is enough to talk to
/// the public service.
///
/// # Example
///
/// ```
/// use guild_gateway_client::config::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new()
///     .with_api_base_url("http://127.0.0.1:8080/api")
///     .with_http_timeout(Duration::from_secs(5))
///     .with_concurrent_callbacks(false);
/// assert_eq!(config.login_url(), "http://127.0.0.1:8080/api/auth/login");
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// REST API root; login, gateway discovery and outbound actions hang off it.
    pub api_base_url: String,
    /// `origin` header for endpoint discovery.
    pub origin: String,
    /// Protocol version sent in the identify frame.
    pub protocol_version: u32,
    /// Client identification sent in the identify frame.
    pub properties: ClientProperties,
    /// Timeout applied to every REST request.
    pub http_timeout: Duration,
    /// Run callbacks on a spawned task per frame instead of inline.
    ///
    /// With `true` (the default) a slow callback never stalls the read loop,
    /// but a callback may observe store state from a later frame. With `false`
    /// callbacks run inline right after their frame's merge.
    pub concurrent_callbacks: bool,
    /// Capacity of the queue between the liveness task and the writer.
    ///
    /// Defaults to **64**. Values below 1 are clamped to 1.
    pub outbound_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            properties: ClientProperties::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            concurrent_callbacks: true,
            outbound_channel_capacity: DEFAULT_OUTBOUND_CHANNEL_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the client at a different REST API root. A trailing `/` is dropped.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.api_base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Set the `origin` header used for endpoint discovery.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Set the protocol version sent in the handshake.
    #[must_use]
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Set the client identification sent in the handshake.
    #[must_use]
    pub fn with_properties(mut self, properties: ClientProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Set the REST request timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Choose between spawned (`true`) and inline (`false`) callbacks.
    #[must_use]
    pub fn with_concurrent_callbacks(mut self, concurrent: bool) -> Self {
        self.concurrent_callbacks = concurrent;
        self
    }

    /// Set the outbound queue capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_outbound_channel_capacity(mut self, capacity: usize) -> Self {
        self.outbound_channel_capacity = capacity.max(1);
        self
    }

    /// `POST` target of the credential exchange.
    pub fn login_url(&self) -> String {
        format!("{}/auth/login", self.api_base_url)
    }

    /// `GET` target of endpoint discovery.
    pub fn gateway_url(&self) -> String {
        format!("{}/gateway", self.api_base_url)
    }

    /// Route for posting into a channel.
    pub fn channel_messages_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{channel_id}/messages", self.api_base_url)
    }

    /// Route for patching a channel.
    pub fn channel_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{channel_id}", self.api_base_url)
    }

    /// Route for patching a guild.
    pub fn guild_url(&self, guild_id: &str) -> String {
        format!("{}/guilds/{guild_id}", self.api_base_url)
    }

    /// Route for patching a guild member.
    pub fn guild_member_url(&self, guild_id: &str, user_id: &str) -> String {
        format!("{}/guilds/{guild_id}/members/{user_id}", self.api_base_url)
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

    #[test]
    fn config_defaults() {
        let config = SessionConfig::new();
        assert_eq!(config.api_base_url, "https://discordapp.com/api");
        assert_eq!(config.origin, "https://discordapp.com");
        assert_eq!(config.protocol_version, 2);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(config.concurrent_callbacks);
        assert_eq!(config.outbound_channel_capacity, 64);
        assert_eq!(config.properties.browser, env!("CARGO_PKG_NAME"));
    }

    #[test]
    fn routes_derive_from_base_url() {
        let config = SessionConfig::new().with_api_base_url("http://localhost:9/api/");
        assert_eq!(config.login_url(), "http://localhost:9/api/auth/login");
        assert_eq!(config.gateway_url(), "http://localhost:9/api/gateway");
        assert_eq!(
            config.channel_messages_url("c1"),
            "http://localhost:9/api/channels/c1/messages"
        );
        assert_eq!(config.channel_url("c1"), "http://localhost:9/api/channels/c1");
        assert_eq!(config.guild_url("g1"), "http://localhost:9/api/guilds/g1");
        assert_eq!(
            config.guild_member_url("g1", "u1"),
            "http://localhost:9/api/guilds/g1/members/u1"
        );
    }

    #[test]
    fn outbound_capacity_is_clamped() {
        let config = SessionConfig::new().with_outbound_channel_capacity(0);
        assert_eq!(config.outbound_channel_capacity, 1);
    }
}
