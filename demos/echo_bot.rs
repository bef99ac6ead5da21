//! # Echo Bot Example
//!
//! Logs in with an account, connects to the gateway and echoes every message
//! that starts with `!echo ` back into its channel. `!quit` stops the session.
//!
//! ## Running
//!
//! ```sh
//! GATEWAY_EMAIL=bot@example.com GATEWAY_PASSWORD=secret cargo run --example echo_bot
//!
//! # Skip the credential exchange with a known token:
//! GATEWAY_TOKEN=... cargo run --example echo_bot
//! ```

use guild_gateway_client::{
    Credentials, EventKind, ExitReason, MessageSend, Session, SessionConfig,
};

const ECHO_PREFIX: &str = "!echo ";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut session = Session::with_http(SessionConfig::new())?;

    // ── Handlers ────────────────────────────────────────────────────
    session.on(EventKind::Ready, |handle| {
        let name = handle
            .current_user()
            .map(|u| u.username)
            .unwrap_or_default();
        tracing::info!(
            "Ready as {name}: {} guild(s) cached",
            handle.store().guild_count()
        );
    });

    session.on(EventKind::GuildMemberAdd, |handle| {
        tracing::info!("Member joined; {} guild(s) cached", handle.store().guild_count());
    });

    session.set_message_handler(|msg, handle| {
        if msg.content == "!quit" {
            handle.stop();
            return;
        }
        let Some(text) = msg.content.strip_prefix(ECHO_PREFIX) else {
            return;
        };

        let reply = MessageSend::new(text).with_mention(&msg.author);
        let channel_id = msg.channel_id.clone();
        let handle = handle.clone();
        // Handlers are synchronous; REST calls go on their own task.
        tokio::spawn(async move {
            if let Err(e) = handle.send_message(&channel_id, &reply).await {
                tracing::warn!("echo failed: {e}");
            }
        });
    });

    // ── Bootstrap ───────────────────────────────────────────────────
    match std::env::var("GATEWAY_TOKEN") {
        Ok(token) => session.login_with_token(token),
        Err(_) => {
            let email = std::env::var("GATEWAY_EMAIL")?;
            let password = std::env::var("GATEWAY_PASSWORD")?;
            session.login(&Credentials::new(email, password)).await?;
        }
    }
    session.connect().await?;

    // ── Run until !quit, Ctrl+C or disconnect ───────────────────────
    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, stopping");
            handle.stop();
        }
    });

    match session.run().await? {
        ExitReason::Stopped | ExitReason::Closed => tracing::info!("Session ended"),
        other => tracing::warn!("Session ended abnormally: {other:?}"),
    }
    Ok(())
}
