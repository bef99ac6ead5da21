#![cfg(feature = "rest-http")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! `HttpRestClient` against a local HTTP mock.

mod common;

use common::{MockConnector, MockTransport};
use guild_gateway_client::{
    ChannelPatch, Credentials, GatewayError, GuildPatch, HttpRestClient, Member, MessageSend,
    RestApi, Session, SessionConfig, SessionState, User,
};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer) -> (HttpRestClient, SessionConfig) {
    let config = SessionConfig::new()
        .with_api_base_url(format!("{}/api", server.uri()))
        .with_origin("https://chat.test");
    (HttpRestClient::new(&config).unwrap(), config)
}

#[tokio::test]
async fn authenticate_posts_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"email": "bot@example.com", "password": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server).await;
    let response = client
        .authenticate(&Credentials::new("bot@example.com", "secret"))
        .await
        .unwrap();

    assert_eq!(response.token.as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn rejected_login_has_no_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"password": ["Password does not match."]})),
        )
        .mount(&server)
        .await;

    let (client, config) = client_for(&server).await;
    let mut session = Session::new(config, client, MockConnector::default());

    let err = session
        .login(&Credentials::new("bot@example.com", "wrong"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Auth));
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[tokio::test]
async fn discover_gateway_sends_token_and_origin() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/gateway"))
        .and(header("authorization", "tok-1"))
        .and(header("origin", "https://chat.test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "wss://gateway.test"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server).await;
    let response = client.discover_gateway("tok-1").await.unwrap();

    assert_eq!(response.url.as_deref(), Some("wss://gateway.test"));
}

#[tokio::test]
async fn session_bootstraps_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/gateway"))
        .and(header("authorization", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "wss://gateway.test"})))
        .mount(&server)
        .await;

    let (client, config) = client_for(&server).await;
    let (transport, script) = MockTransport::new();
    let connector = MockConnector::with(transport);
    let mut session = Session::new(config, client, connector.clone());

    session
        .login(&Credentials::new("bot@example.com", "secret"))
        .await
        .unwrap();
    session.connect().await.unwrap();

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(*connector.dialed.lock().unwrap(), vec!["wss://gateway.test"]);
    assert_eq!(script.sent_frames()[0]["d"]["token"], "tok-1");
}

#[tokio::test]
async fn empty_gateway_body_is_discovery_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/gateway"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (client, config) = client_for(&server).await;
    let mut session = Session::new(config, client, MockConnector::default());
    session.login_with_token("tok-1");

    let err = session.discover_endpoint().await.unwrap_err();
    assert!(matches!(err, GatewayError::Discovery));
}

#[tokio::test]
async fn send_message_posts_to_channel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/channels/c1/messages"))
        .and(header("authorization", "tok-1"))
        .and(body_json(json!({"content": "hello", "mentions": ["u1"], "tts": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m9", "content": "hello"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server).await;
    let ann = User {
        id: "u1".into(),
        username: "ann".into(),
        ..Default::default()
    };
    let created = client
        .send_message("tok-1", "c1", &MessageSend::new("hello").with_mention(&ann))
        .await
        .unwrap();

    assert_eq!(created["id"], "m9");
}

#[tokio::test]
async fn change_roles_patches_member() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/guilds/g1/members/u1"))
        .and(header("authorization", "tok-1"))
        .and(body_json(json!({"roles": ["r1", "r2"]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (client, config) = client_for(&server).await;
    let mut session = Session::new(config, client, MockConnector::default());
    session.login_with_token("tok-1");

    let member = Member {
        user: User {
            id: "u1".into(),
            ..Default::default()
        },
        roles: vec!["r1".into(), "r2".into()],
        ..Default::default()
    };
    let body = session
        .handle()
        .change_roles_for_user(&member, "g1")
        .await
        .unwrap();

    assert!(body.is_null());
}

#[tokio::test]
async fn patches_send_only_set_fields() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/channels/c1"))
        .and(body_json(json!({"topic": "release day"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/guilds/g1"))
        .and(body_json(json!({"name": "Renamed", "afk_timeout": 600})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "g1"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server).await;
    let channel = ChannelPatch {
        topic: Some("release day".into()),
        ..Default::default()
    };
    assert_ok!(client.patch_channel("tok-1", "c1", &channel).await);

    let guild = GuildPatch {
        name: Some("Renamed".into()),
        afk_timeout: Some(600),
        ..Default::default()
    };
    assert_ok!(client.patch_guild("tok-1", "g1", &guild).await);
}

#[tokio::test]
async fn error_status_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/channels/c1/messages"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Missing Permissions"))
        .mount(&server)
        .await;

    let (client, _) = client_for(&server).await;
    let err = client
        .send_message("tok-1", "c1", &MessageSend::new("hi"))
        .await
        .unwrap_err();

    match err {
        GatewayError::Api { status, body } => {
            assert_eq!(status, 403);
            assert_eq!(body, "Missing Permissions");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_server_is_http_error() {
    let config = SessionConfig::new().with_api_base_url("http://127.0.0.1:1/api");
    let client = HttpRestClient::new(&config).unwrap();

    let err = assert_err!(client.discover_gateway("tok-1").await);
    assert!(matches!(err, GatewayError::Http(_)));
}

#[tokio::test]
async fn shared_reqwest_client_is_used_as_is() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/gateway"))
        .and(header("authorization", "tok-1"))
        .and(header("user-agent", "gateway-tests/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "wss://gateway.test"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = SessionConfig::new().with_api_base_url(format!("{}/api", server.uri()));
    let shared = reqwest::Client::builder()
        .user_agent("gateway-tests/1.0")
        .build()
        .unwrap();
    let client = HttpRestClient::with_client(shared, &config);

    let response = assert_ok!(client.discover_gateway("tok-1").await);
    assert_eq!(response.url.as_deref(), Some("wss://gateway.test"));
}
