//! End-to-end tests over real sockets against a local fake platform
//!
//! Run with: cargo test -p integration-tests --test platform_tests

use std::time::Duration;

use chat_client::protocol::OpCode;
use chat_client::{ConnectionState, Session};
use chat_common::{ClientConfig, ClientError};
use integration_tests::*;

fn platform_config(platform: &FakePlatform, token: &str) -> ClientConfig {
    ClientConfig {
        token: Some(token.to_string()),
        api_url: platform.api_url(),
        hello_timeout: Duration::from_secs(5),
        close_timeout: Duration::from_secs(2),
        backoff_base: Duration::from_millis(50),
        backoff_max: Duration::from_millis(200),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_open_ready_and_status_update() -> anyhow::Result<()> {
    let platform = FakePlatform::start(TEST_TOKEN).await?;
    let session = Session::builder()
        .config(platform_config(&platform, TEST_TOKEN))
        .build()?;

    session.open().await?;
    session.wait_until_ready(Duration::from_secs(10)).await?;
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.session_id().as_deref(), Some("platform-session"));

    session.update_game_status(None, "checkers").await?;
    let status = platform.wait_for(OpCode::PresenceUpdate).await?;
    let payload = status.d.expect("presence payload");
    assert_eq!(payload["activities"][0]["name"], "checkers");

    session.close().await?;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_current_user() -> anyhow::Result<()> {
    let platform = FakePlatform::start(TEST_TOKEN).await?;
    let session = Session::builder()
        .config(platform_config(&platform, TEST_TOKEN))
        .build()?;

    let user = session.current_user().await?;
    assert_eq!(user.username, "testbot");
    assert!(user.bot);
    Ok(())
}

#[tokio::test]
async fn test_invalid_token_is_unauthorized() -> anyhow::Result<()> {
    let platform = FakePlatform::start(TEST_TOKEN).await?;
    let session = Session::builder()
        .config(platform_config(&platform, "wrong-token"))
        .build()?;

    assert!(matches!(
        session.current_user().await,
        Err(ClientError::Unauthorized)
    ));
    Ok(())
}

#[tokio::test]
async fn test_invalid_token_stops_gateway() -> anyhow::Result<()> {
    let platform = FakePlatform::start(TEST_TOKEN).await?;
    let session = Session::builder()
        .config(platform_config(&platform, "wrong-token"))
        .build()?;

    session.open().await?;
    eventually(|| session.state() == ConnectionState::Disconnected).await?;
    assert!(!session.data_ready());
    assert!(session.session_id().is_none());
    Ok(())
}

#[tokio::test]
async fn test_session_without_token() -> anyhow::Result<()> {
    let platform = FakePlatform::start(TEST_TOKEN).await?;
    let config = ClientConfig {
        token: None,
        ..platform_config(&platform, TEST_TOKEN)
    };
    let session = Session::builder().config(config).build()?;

    assert!(session.token().is_none());
    assert!(matches!(session.open().await, Err(ClientError::MissingToken)));
    assert!(matches!(
        session.current_user().await,
        Err(ClientError::Unauthorized)
    ));
    Ok(())
}
