//! Gateway lifecycle tests against the in-memory transport
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_client::events::{Connect, Disconnect, MessageCreate};
use chat_client::protocol::{GatewayMessage, OpCode};
use chat_client::{ConnectionState, Session};
use chat_common::ClientError;
use integration_tests::*;

fn setup() -> anyhow::Result<(Session, Arc<MockConnector>, GatewayQueue)> {
    setup_with(test_config())
}

fn setup_with(
    config: chat_common::ClientConfig,
) -> anyhow::Result<(Session, Arc<MockConnector>, GatewayQueue)> {
    let (connector, gateways) = MockConnector::new();
    let session = session_with(config, connector.clone(), MockExecutor::new())?;
    Ok((session, connector, gateways))
}

// ============================================================================
// Open / Close
// ============================================================================

#[tokio::test]
async fn test_open_ready_status_update_close() -> anyhow::Result<()> {
    let (session, connector, mut gateways) = setup()?;

    let opener = {
        let session = session.clone();
        tokio::spawn(async move { session.open().await })
    };
    let mut gateway = gateways.next().await?;
    let identify = gateway.handshake("sess-1").await?;
    opener.await??;

    let identify = identify.as_identify().expect("identify payload");
    assert_eq!(identify.token, format!("Bot {TEST_TOKEN}"));
    assert_eq!(
        connector.urls(),
        vec![format!("{MOCK_GATEWAY_URL}?v=10&encoding=json")]
    );

    session.wait_until_ready(STEP_TIMEOUT).await?;
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.session_id().as_deref(), Some("sess-1"));
    assert_eq!(session.sequence(), Some(1));

    session.update_game_status(None, "chess").await?;
    let status = gateway.expect(OpCode::PresenceUpdate).await?;
    let d = status.d.expect("presence payload");
    assert_eq!(d["activities"][0]["name"], "chess");
    assert!(d["since"].is_null());

    session.close().await?;
    assert_eq!(gateway.expect_close().await?, Some(1000));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.session_id().is_none());
    assert!(session.sequence().is_none());
    assert!(!session.data_ready());

    assert!(matches!(
        session.update_game_status(None, "chess").await,
        Err(ClientError::NotConnected)
    ));
    Ok(())
}

#[tokio::test]
async fn test_open_twice_fails() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;
    let _gateway = open_session(&session, &mut gateways, "sess-1").await?;

    assert!(matches!(
        session.open().await,
        Err(ClientError::AlreadyConnected)
    ));

    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_open_connect_failure_is_returned() -> anyhow::Result<()> {
    let (session, connector, _gateways) = setup()?;
    connector.fail_next(1);

    assert!(matches!(session.open().await, Err(ClientError::Transport(_))));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_open_hello_timeout() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;

    let opener = {
        let session = session.clone();
        tokio::spawn(async move { session.open().await })
    };
    let _silent = gateways.next().await?;

    assert!(matches!(opener.await?, Err(ClientError::Handshake(_))));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;
    let _gateway = open_session(&session, &mut gateways, "sess-1").await?;

    session.close().await?;
    session.close().await?;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    Ok(())
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test]
async fn test_missed_heartbeat_ack_resumes() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;
    let mut gateway = open_session_with(&session, &mut gateways, "sess-1", 50).await?;

    // Never acknowledge: the client gives up on this connection
    assert_eq!(gateway.expect_close().await?, Some(4000));

    let mut next = gateways.next().await?;
    assert!(next.url.starts_with("wss://resume.mock"));
    next.hello(45_000);
    let resume = next.expect(OpCode::Resume).await?;
    let resume = resume.as_resume().expect("resume payload");
    assert_eq!(resume.session_id, "sess-1");
    assert_eq!(resume.seq, 1);

    next.send(&resumed(2));
    eventually(|| session.state() == ConnectionState::Connected && session.sequence() == Some(2))
        .await?;

    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_server_heartbeat_request_answered_with_sequence() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;
    let mut gateway = open_session(&session, &mut gateways, "sess-1").await?;

    gateway.send(&message_create(7, "hi"));
    eventually(|| session.sequence() == Some(7)).await?;

    gateway.send(&GatewayMessage::heartbeat(None));
    let heartbeat = gateway.expect(OpCode::Heartbeat).await?;
    assert_eq!(heartbeat.as_heartbeat_seq(), Some(Some(7)));

    gateway.send(&GatewayMessage::heartbeat_ack());
    eventually(|| session.last_heartbeat_ack().is_some()).await?;

    session.close().await?;
    Ok(())
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test]
async fn test_server_reconnect_request_resumes() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;
    let mut gateway = open_session(&session, &mut gateways, "sess-1").await?;

    gateway.send(&GatewayMessage::reconnect());
    assert_eq!(gateway.expect_close().await?, Some(4000));

    let mut next = gateways.next().await?;
    next.hello(45_000);
    next.expect(OpCode::Resume).await?;

    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_session_resumable_resumes_on_same_connection() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;
    let mut gateway = open_session(&session, &mut gateways, "sess-1").await?;

    gateway.send(&GatewayMessage::invalid_session(true));
    let resume = gateway.expect(OpCode::Resume).await?;
    assert_eq!(resume.as_resume().expect("resume payload").session_id, "sess-1");
    assert!(gateways.is_empty());

    session.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_invalid_session_not_resumable_reidentifies() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;
    let mut gateway = open_session(&session, &mut gateways, "sess-1").await?;

    let invalidated_at = tokio::time::Instant::now();
    gateway.send(&GatewayMessage::invalid_session(false));
    gateway.expect(OpCode::Identify).await?;

    assert!(invalidated_at.elapsed() >= Duration::from_secs(1));
    assert!(session.session_id().is_none());

    gateway.send(&ready("sess-2", 1));
    eventually(|| session.session_id().as_deref() == Some("sess-2")).await?;

    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_session_invalidating_close_code_reidentifies() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;
    let gateway = open_session(&session, &mut gateways, "sess-1").await?;

    // Session timed out
    gateway.close(4009);

    let mut next = gateways.next().await?;
    assert!(next.url.starts_with(MOCK_GATEWAY_URL));
    next.hello(45_000);
    next.expect(OpCode::Identify).await?;

    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_resumable_close_code_resumes() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;
    let gateway = open_session(&session, &mut gateways, "sess-1").await?;

    gateway.close(4000);

    let mut next = gateways.next().await?;
    next.hello(45_000);
    next.expect(OpCode::Resume).await?;

    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_not_ready_while_reconnecting() -> anyhow::Result<()> {
    let config = chat_common::ClientConfig {
        backoff_base: Duration::from_millis(500),
        backoff_max: Duration::from_secs(1),
        ..test_config()
    };
    let (session, _connector, mut gateways) = setup_with(config)?;
    let mut gateway = open_session(&session, &mut gateways, "sess-1").await?;
    assert!(session.data_ready());

    gateway.hang_up();
    eventually(|| session.state() == ConnectionState::Reconnecting).await?;
    assert!(!session.data_ready());
    assert_eq!(session.session_id().as_deref(), Some("sess-1"));
    assert!(session
        .wait_until_ready(Duration::from_millis(50))
        .await
        .is_err());

    let mut next = gateways.next().await?;
    next.hello(45_000);
    next.expect(OpCode::Resume).await?;
    next.send(&resumed(2));

    session.wait_until_ready(Duration::from_secs(5)).await?;
    assert!(session.data_ready());
    assert_eq!(session.state(), ConnectionState::Connected);

    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_fatal_close_code_stops() -> anyhow::Result<()> {
    let (session, connector, mut gateways) = setup()?;
    let gateway = open_session(&session, &mut gateways, "sess-1").await?;

    // Authentication failed
    gateway.close(4004);

    eventually(|| session.state() == ConnectionState::Disconnected).await?;
    assert!(session.session_id().is_none());
    assert_eq!(connector.connects(), 1);
    assert!(matches!(
        session.update_game_status(None, "chess").await,
        Err(ClientError::NotConnected)
    ));

    // The manager is gone, so opening again is allowed
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _gateway = open_session(&session, &mut gateways, "sess-2").await?;
    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_reconnect_attempts_exhausted() -> anyhow::Result<()> {
    let config = chat_common::ClientConfig {
        max_reconnect_attempts: 2,
        ..test_config()
    };
    let (session, connector, mut gateways) = setup_with(config)?;
    let gateway = open_session(&session, &mut gateways, "sess-1").await?;

    connector.fail_always();
    gateway.fail();

    eventually(|| session.state() == ConnectionState::Disconnected).await?;
    assert_eq!(connector.connects(), 3);
    assert!(session.session_id().is_none());
    assert!(matches!(
        session.update_game_status(None, "chess").await,
        Err(ClientError::NotConnected)
    ));
    Ok(())
}

#[tokio::test]
async fn test_close_during_backoff_returns_promptly() -> anyhow::Result<()> {
    let config = chat_common::ClientConfig {
        backoff_base: Duration::from_secs(30),
        backoff_max: Duration::from_secs(60),
        ..test_config()
    };
    let (session, _connector, mut gateways) = setup_with(config)?;
    let mut gateway = open_session(&session, &mut gateways, "sess-1").await?;

    gateway.hang_up();
    eventually(|| session.state() == ConnectionState::Reconnecting).await?;

    tokio::time::timeout(Duration::from_secs(2), session.close()).await??;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(gateways.is_empty());
    Ok(())
}

// ============================================================================
// Frames
// ============================================================================

#[tokio::test]
async fn test_malformed_frames_are_discarded() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;

    let contents = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = contents.clone();
    session.add_handler(move |_: &Session, message: &MessageCreate| {
        sink.lock().push(message.content.clone());
    });

    let gateway = open_session(&session, &mut gateways, "sess-1").await?;

    gateway.send_text("not json");
    gateway.send_text(r#"{"op": 99, "d": null}"#);
    gateway.send(&GatewayMessage::dispatch(
        "MESSAGE_CREATE",
        2,
        serde_json::json!({"id": ["not", "a", "snowflake"]}),
    ));
    gateway.send(&message_create(3, "hello"));

    eventually(|| contents.lock().len() == 1).await?;
    assert_eq!(contents.lock().as_slice(), ["hello".to_string()]);
    assert_eq!(session.sequence(), Some(3));
    assert_eq!(session.state(), ConnectionState::Connected);

    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_connect_and_disconnect_events() -> anyhow::Result<()> {
    let (session, _connector, mut gateways) = setup()?;

    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let c = connects.clone();
    session.add_handler(move |_: &Session, _: &Connect| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    let d = disconnects.clone();
    session.add_handler(move |_: &Session, _: &Disconnect| {
        d.fetch_add(1, Ordering::SeqCst);
    });

    let _gateway = open_session(&session, &mut gateways, "sess-1").await?;
    eventually(|| connects.load(Ordering::SeqCst) == 1).await?;

    session.close().await?;
    eventually(|| disconnects.load(Ordering::SeqCst) == 1).await?;
    Ok(())
}
