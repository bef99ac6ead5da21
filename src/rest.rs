//! REST surface used around the gateway.
//!
//! The session needs exactly two request/response exchanges to bootstrap:
//! trading credentials for a token and asking where the gateway lives.
//! Outbound actions (send a message, patch roles, channels and guilds) go
//! through the same surface and never touch the gateway connection.
//!
//! [`RestApi`] is the seam; [`HttpRestClient`] (feature `rest-http`) is the
//! `reqwest` implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::User;

// ── Request and response bodies ─────────────────────────────────────

/// Account credentials for the credential exchange.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Response of the credential exchange. `token` is absent on bad credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// Response of endpoint discovery.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayResponse {
    #[serde(default)]
    pub url: Option<String>,
}

/// A message to post into a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSend {
    pub content: String,
    /// User IDs mentioned by the message.
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub tts: bool,
}

impl MessageSend {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Record `user` as mentioned.
    pub fn add_mention(&mut self, user: &User) {
        self.mentions.push(user.id.clone());
    }

    /// Builder form of [`add_mention`](Self::add_mention).
    #[must_use]
    pub fn with_mention(mut self, user: &User) -> Self {
        self.add_mention(user);
        self
    }

    #[must_use]
    pub fn with_tts(mut self, tts: bool) -> Self {
        self.tts = tts;
        self
    }
}

/// Body of a member roles patch.
#[derive(Debug, Clone, Serialize)]
pub struct RolesPatch<'a> {
    pub roles: &'a [String],
}

/// Partial channel update. `None` fields are left unchanged server-side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

/// Partial guild update. `None` fields are left unchanged server-side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GuildPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub afk_channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub afk_timeout: Option<u64>,
}

// ── Trait ───────────────────────────────────────────────────────────

/// The REST calls the session and its handle rely on.
///
/// Implementations report transport failures as errors but hand bootstrap
/// responses back as-is: deciding that a missing `token` or `url` is fatal is
/// the session's job.
#[async_trait]
pub trait RestApi: Send + Sync + 'static {
    /// Exchange credentials for a session token.
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginResponse>;

    /// Ask for the current gateway endpoint.
    async fn discover_gateway(&self, token: &str) -> Result<GatewayResponse>;

    /// Post a message into a channel; returns the created message as JSON.
    async fn send_message(
        &self,
        token: &str,
        channel_id: &str,
        message: &MessageSend,
    ) -> Result<serde_json::Value>;

    /// Replace a member's role set.
    async fn patch_member_roles(
        &self,
        token: &str,
        guild_id: &str,
        user_id: &str,
        roles: &[String],
    ) -> Result<serde_json::Value>;

    /// Patch a channel's attributes.
    async fn patch_channel(
        &self,
        token: &str,
        channel_id: &str,
        patch: &ChannelPatch,
    ) -> Result<serde_json::Value>;

    /// Patch a guild's attributes.
    async fn patch_guild(
        &self,
        token: &str,
        guild_id: &str,
        patch: &GuildPatch,
    ) -> Result<serde_json::Value>;
}

// ── reqwest implementation ──────────────────────────────────────────

#[cfg(feature = "rest-http")]
pub use http::HttpRestClient;

#[cfg(feature = "rest-http")]
mod http {
    use async_trait::async_trait;
    use reqwest::{Method, Response};
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use tracing::debug;

    use super::{
        ChannelPatch, Credentials, GatewayResponse, GuildPatch, LoginResponse, MessageSend,
        RestApi, RolesPatch,
    };
    use crate::config::SessionConfig;
    use crate::error::{GatewayError, Result};

    /// [`RestApi`] over HTTPS with `reqwest`.
    #[derive(Debug, Clone)]
    pub struct HttpRestClient {
        client: reqwest::Client,
        config: SessionConfig,
    }

    impl HttpRestClient {
        /// Build a client honoring `config`'s base URL and timeout.
        ///
        /// # Errors
        ///
        /// Returns [`GatewayError::Http`] if the TLS backend cannot be set up.
        pub fn new(config: &SessionConfig) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(config.http_timeout)
                .build()?;
            Ok(Self {
                client,
                config: config.clone(),
            })
        }

        /// Wrap an existing `reqwest` client (shared pools, custom TLS).
        pub fn with_client(client: reqwest::Client, config: &SessionConfig) -> Self {
            Self {
                client,
                config: config.clone(),
            }
        }

        /// Send an authorized JSON request and return the body, failing on
        /// non-success statuses.
        async fn action<B: Serialize + ?Sized + Sync>(
            &self,
            method: Method,
            url: String,
            token: &str,
            body: &B,
        ) -> Result<serde_json::Value> {
            debug!(%method, %url, "rest: sending action");
            let resp = self
                .client
                .request(method, url)
                .header(reqwest::header::AUTHORIZATION, token)
                .json(body)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(GatewayError::Api {
                    status: status.as_u16(),
                    body,
                });
            }
            json_body(resp).await
        }
    }

    /// Decode a response body; an empty body decodes as the type's JSON `null`.
    async fn json_body<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[async_trait]
    impl RestApi for HttpRestClient {
        async fn authenticate(&self, credentials: &Credentials) -> Result<LoginResponse> {
            debug!(email = %credentials.email, "rest: authenticating");
            let resp = self
                .client
                .post(self.config.login_url())
                .json(credentials)
                .send()
                .await?;
            // Rejected logins come back as JSON without a token; the caller
            // turns that into `GatewayError::Auth`.
            let body: Option<LoginResponse> = json_body(resp).await?;
            Ok(body.unwrap_or_default())
        }

        async fn discover_gateway(&self, token: &str) -> Result<GatewayResponse> {
            debug!("rest: discovering gateway");
            let resp = self
                .client
                .get(self.config.gateway_url())
                .header(reqwest::header::ORIGIN, &self.config.origin)
                .header(reqwest::header::AUTHORIZATION, token)
                .send()
                .await?;
            let body: Option<GatewayResponse> = json_body(resp).await?;
            Ok(body.unwrap_or_default())
        }

        async fn send_message(
            &self,
            token: &str,
            channel_id: &str,
            message: &MessageSend,
        ) -> Result<serde_json::Value> {
            self.action(
                Method::POST,
                self.config.channel_messages_url(channel_id),
                token,
                message,
            )
            .await
        }

        async fn patch_member_roles(
            &self,
            token: &str,
            guild_id: &str,
            user_id: &str,
            roles: &[String],
        ) -> Result<serde_json::Value> {
            self.action(
                Method::PATCH,
                self.config.guild_member_url(guild_id, user_id),
                token,
                &RolesPatch { roles },
            )
            .await
        }

        async fn patch_channel(
            &self,
            token: &str,
            channel_id: &str,
            patch: &ChannelPatch,
        ) -> Result<serde_json::Value> {
            self.action(Method::PATCH, self.config.channel_url(channel_id), token, patch)
                .await
        }

        async fn patch_guild(
            &self,
            token: &str,
            guild_id: &str,
            patch: &GuildPatch,
        ) -> Result<serde_json::Value> {
            self.action(Method::PATCH, self.config.guild_url(guild_id), token, patch)
                .await
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

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("bot@example.com", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("bot@example.com"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn message_send_collects_mentions() {
        let ann = User {
            id: "u1".into(),
            ..Default::default()
        };
        let mut msg = MessageSend::new("hi").with_tts(true);
        msg.add_mention(&ann);
        assert_eq!(msg.mentions, vec!["u1".to_string()]);

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "hi");
        assert_eq!(json["tts"], true);
    }

    #[test]
    fn patches_skip_unset_fields() {
        let patch = ChannelPatch {
            topic: Some("new topic".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&patch).unwrap(),
            r#"{"topic":"new topic"}"#
        );
        assert_eq!(serde_json::to_string(&GuildPatch::default()).unwrap(), "{}");
    }

    #[test]
    fn bootstrap_responses_tolerate_missing_fields() {
        let login: LoginResponse = serde_json::from_str(r#"{"email":["bad"]}"#).unwrap();
        assert!(login.token.is_none());
        let gateway: GatewayResponse = serde_json::from_str("{}").unwrap();
        assert!(gateway.url.is_none());
    }
}
