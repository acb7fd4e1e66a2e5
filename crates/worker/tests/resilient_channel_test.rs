use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use trainsync_testing_utils::MockConnector;
use trainsync_worker::{ChannelSettings, ResilientChannel, SendOutcome};

const HEARTBEAT: Duration = Duration::from_secs(10);
const BACKOFF: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn settings() -> ChannelSettings {
    ChannelSettings {
        heartbeat_interval: HEARTBEAT,
        receive_backoff: BACKOFF,
        heartbeat_payload: "ping".to_string(),
        greeting: None,
        connect_timeout: CONNECT_TIMEOUT,
    }
}

fn channel(connector: &MockConnector) -> ResilientChannel {
    ResilientChannel::new(Arc::new(connector.clone()), settings())
}

#[tokio::test(start_paused = true)]
async fn test_start_connects_and_sends() {
    let connector = MockConnector::new();
    let channel = channel(&connector);
    assert!(!channel.is_running());

    channel.start().await.unwrap();
    assert!(channel.is_running());
    assert!(channel.is_connected());
    assert_eq!(connector.connect_count(), 1);

    assert_eq!(channel.send("hello").await, SendOutcome::Sent);
    assert_eq!(
        channel.send(json!({ "type": "status" })).await,
        SendOutcome::Sent
    );
    assert_eq!(connector.sent(), vec!["hello", r#"{"type":"status"}"#]);

    channel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_channel_cannot_start_twice() {
    let connector = MockConnector::new();
    let channel = channel(&connector);
    channel.start().await.unwrap();
    assert!(channel.start().await.is_err());
    channel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_sends_probe() {
    let connector = MockConnector::new();
    let channel = channel(&connector);
    channel.start().await.unwrap();

    tokio::time::sleep(HEARTBEAT + Duration::from_millis(100)).await;
    assert_eq!(connector.sent(), vec!["ping"]);

    tokio::time::sleep(HEARTBEAT).await;
    assert_eq!(connector.sent(), vec!["ping", "ping"]);
    assert_eq!(connector.connect_count(), 1);

    channel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_reconnects_on_next_heartbeat() {
    let connector = MockConnector::new();
    let channel = channel(&connector);
    channel.start().await.unwrap();

    connector.set_fail_sends(true);
    assert_eq!(channel.send("progress").await, SendOutcome::Failed);
    assert!(!channel.is_connected());
    assert_eq!(connector.connect_count(), 1);

    tokio::time::sleep(HEARTBEAT + Duration::from_millis(100)).await;
    assert_eq!(connector.connect_count(), 2);
    assert!(channel.is_connected());

    connector.set_fail_sends(false);
    assert_eq!(channel.send("progress").await, SendOutcome::Sent);
    assert_eq!(connector.sent(), vec!["progress"]);

    channel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_while_disconnected_is_dropped_not_retried() {
    let connector = MockConnector::new();
    connector.set_fail_connects(true);
    let channel = channel(&connector);
    channel.start().await.unwrap();
    assert!(!channel.is_connected());

    let outcome = tokio::time::timeout(Duration::from_millis(50), channel.send("lost"))
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::Dropped);

    connector.set_fail_connects(false);
    tokio::time::sleep(HEARTBEAT * 3).await;
    assert!(channel.is_connected());
    let sent = connector.sent();
    assert!(!sent.is_empty());
    assert!(sent.iter().all(|text| text == "ping"));

    channel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_triggers_backoff_and_reconnect() {
    let connector = MockConnector::new();
    let channel = channel(&connector);
    channel.start().await.unwrap();
    tokio::task::yield_now().await;

    assert!(connector.fail_latest_read());
    tokio::time::sleep(BACKOFF / 2).await;
    assert!(!channel.is_connected());
    assert_eq!(connector.connect_count(), 1);

    tokio::time::sleep(BACKOFF).await;
    assert!(channel.is_connected());
    assert_eq!(connector.connect_count(), 2);

    channel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_inbound_messages_reach_handler() {
    let connector = MockConnector::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let channel = ResilientChannel::new(Arc::new(connector.clone()), settings())
        .with_inbound_handler(Arc::new(move |text: String| {
            let _ = tx.send(text);
        }));
    channel.start().await.unwrap();

    assert!(connector.push_inbound("task:cancel"));
    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap();
    assert_eq!(received.as_deref(), Some("task:cancel"));

    channel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_greeting_sent_on_every_connect() {
    let connector = MockConnector::new();
    let channel = ResilientChannel::new(
        Arc::new(connector.clone()),
        ChannelSettings {
            greeting: Some("hello".to_string()),
            ..settings()
        },
    );
    channel.start().await.unwrap();
    assert_eq!(connector.sent(), vec!["hello"]);

    connector.set_fail_sends(true);
    assert_eq!(channel.send("x").await, SendOutcome::Failed);
    connector.set_fail_sends(false);
    tokio::time::sleep(HEARTBEAT + Duration::from_millis(100)).await;

    assert_eq!(connector.sent(), vec!["hello", "hello"]);
    channel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_ends_loops_without_further_calls() {
    let connector = MockConnector::new();
    let channel = channel(&connector);
    channel.start().await.unwrap();

    channel.stop().await;
    assert!(!channel.is_running());
    assert!(!channel.is_connected());
    assert_eq!(connector.close_count(), 1);

    let connects = connector.connect_count();
    let sent = connector.sent().len();
    tokio::time::sleep(HEARTBEAT * 5).await;
    assert_eq!(channel.send("late").await, SendOutcome::Dropped);

    assert_eq!(connector.connect_count(), connects);
    assert_eq!(connector.sent().len(), sent);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_connect_never_blocks_send_or_stop() {
    let connector = MockConnector::new();
    let channel = channel(&connector);
    channel.start().await.unwrap();

    connector.set_fail_sends(true);
    assert_eq!(channel.send("x").await, SendOutcome::Failed);
    connector.set_fail_sends(false);
    connector.set_hang_connects(true);

    let outcome = tokio::time::timeout(Duration::from_millis(50), channel.send("lost"))
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::Dropped);

    tokio::time::sleep(HEARTBEAT + CONNECT_TIMEOUT + Duration::from_millis(100)).await;
    assert!(!channel.is_connected());
    assert!(connector.connect_count() >= 2);
    assert_eq!(
        tokio::time::timeout(Duration::from_millis(50), channel.send("still lost"))
            .await
            .unwrap(),
        SendOutcome::Dropped
    );

    tokio::time::timeout(CONNECT_TIMEOUT * 3, channel.stop())
        .await
        .unwrap();
    assert!(!channel.is_running());
    assert!(connector.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_write_fails_after_timeout() {
    let connector = MockConnector::new();
    let channel = channel(&connector);
    channel.start().await.unwrap();

    connector.set_hang_sends(true);
    let outcome = tokio::time::timeout(CONNECT_TIMEOUT * 2, channel.send("slow"))
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::Failed);
    assert!(!channel.is_connected());

    connector.set_hang_sends(false);
    channel.stop().await;
}
