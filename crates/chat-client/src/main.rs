//! Chat client entry point
//!
//! Run with:
//! ```bash
//! CHAT_TOKEN=... cargo run -p chat-client
//! ```
//!
//! Connects with configuration from the environment and logs every event
//! until interrupted.

use anyhow::Context;
use chat_client::events::{MessageCreate, Ready};
use chat_client::{Event, Session};
use chat_common::{try_init_tracing_with_config, ClientConfig, TracingConfig};
use chat_core::User;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = try_init_tracing_with_config(TracingConfig::from_env()) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = %format!("{e:#}"), "Client failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ClientConfig::from_env().context("loading configuration")?;
    info!(
        api_url = %config.api_url,
        gateway_version = config.gateway_version,
        "Configuration loaded"
    );

    let session = Session::builder()
        .config(config)
        .build()
        .context("building session")?;

    session.add_handler(|_: &Session, ready: &Ready| {
        info!(user = %ready.user.tag(), guilds = ready.guilds.len(), "Logged in");
    });
    session.add_handler(|_: &Session, message: &MessageCreate| {
        let author = message.author.as_ref().map(User::tag).unwrap_or_default();
        info!(channel_id = %message.channel_id, author = %author, "{}", message.content);
    });
    session.add_handler(|_: &Session, event: &Event| {
        tracing::debug!(event = %event.name(), "Event received");
    });

    session.open().await.context("opening gateway connection")?;

    match session.wait_until_ready(Duration::from_secs(30)).await {
        Ok(()) => info!(session_id = ?session.session_id(), "Session ready"),
        Err(e) => tracing::warn!(error = %e, "Session not ready yet"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;

    info!("Shutting down");
    session.close().await.context("closing session")?;
    Ok(())
}
