//! WebSocket notification tests driven by WebDAV writes.

mod common;

use common::{TestServer, PASSWORD, USERNAME};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Handshake and authentication
// ============================================================================

#[tokio::test]
async fn test_header_authenticated_connection_is_welcomed() {
    let server = TestServer::start().await;

    let mut ws = server.connect(true).await;
    let greeting = ws.recv().await;
    assert_eq!(greeting["type"], "connected");
    assert!(greeting["message"].is_string());
}

#[tokio::test]
async fn test_anonymous_connection_must_authenticate() {
    let server = TestServer::start().await;
    let mut ws = server.connect(false).await;
    assert_eq!(ws.recv().await["type"], "auth_required");

    let reply = ws.subscribe("/").await;
    assert_eq!(reply["type"], "auth_required");
    assert_eq!(server.server.engine().active_subscriptions(), 0);

    ws.send(json!({ "type": "authenticate", "username": USERNAME, "password": "nope" }))
        .await;
    assert_eq!(ws.recv().await["type"], "auth_failed");

    ws.send(json!({ "type": "authenticate", "username": USERNAME }))
        .await;
    assert_eq!(ws.recv().await["type"], "auth_error");

    ws.send(json!({ "type": "authenticate", "username": USERNAME, "password": PASSWORD }))
        .await;
    assert_eq!(ws.recv().await["type"], "auth_success");
    assert_eq!(ws.recv().await["type"], "connected");

    // The rejected subscribe left nothing behind.
    ws.send(json!({ "type": "getSubscriptions" })).await;
    assert_eq!(ws.recv().await["subscriptions"], json!([]));

    let reply = ws.subscribe("/").await;
    assert_eq!(reply["type"], "subscriptionConfirmed");
    assert_eq!(reply["path"], "/");
}

#[tokio::test]
async fn test_malformed_message_gets_error() {
    let server = TestServer::start().await;
    let mut ws = server.observer().await;

    ws.send_raw("this is not json").await;
    let reply = ws.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(
        reply["message"],
        "Invalid message format. Please send a valid JSON message."
    );

    ws.send(json!({ "type": "authenticate", "username": 5 })).await;
    let reply = ws.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(
        reply["message"],
        "Invalid message format. Please send a valid JSON message."
    );

    ws.send(json!({ "type": "launchMissiles" })).await;
    let reply = ws.recv().await;
    assert_eq!(reply["message"], "Unrecognized message type: launchMissiles");

    // The session survives.
    assert_eq!(ws.subscribe("/docs").await["type"], "subscriptionConfirmed");
}

// ============================================================================
// Subscription management
// ============================================================================

#[tokio::test]
async fn test_subscription_commands() {
    let server = TestServer::start().await;
    let mut ws = server.observer().await;

    assert_eq!(ws.subscribe("/docs/*").await["type"], "subscriptionConfirmed");
    let again = ws.subscribe("/docs/*").await;
    assert_eq!(again["type"], "subscriptionInfo");
    assert_eq!(again["message"], "Already subscribed to /docs/*");

    let rejected = ws.subscribe("/docs/*/deep").await;
    assert_eq!(rejected["type"], "subscriptionError");
    let rejected = ws.subscribe("/../etc").await;
    assert_eq!(rejected["type"], "subscriptionError");

    ws.subscribe("/media/**").await;
    ws.send(json!({ "type": "getSubscriptions" })).await;
    let list = ws.recv().await;
    assert_eq!(list["type"], "subscriptionsList");
    assert_eq!(list["subscriptions"], json!(["/docs/*", "/media/**"]));

    ws.send(json!({ "type": "unsubscribe", "path": "/docs/*" }))
        .await;
    assert_eq!(ws.recv().await["type"], "unsubscriptionConfirmed");
    ws.send(json!({ "type": "unsubscribe", "path": "/docs/*" }))
        .await;
    let reply = ws.recv().await;
    assert_eq!(reply["type"], "unsubscriptionError");
    assert_eq!(reply["message"], "Not subscribed to /docs/*");

    assert_eq!(server.server.engine().active_subscriptions(), 1);
}

#[tokio::test]
async fn test_metrics_and_client_info() {
    let server = TestServer::start().await;
    let mut ws = server.observer().await;
    ws.subscribe("/").await;
    server.put_ok("/a.txt", "a").await;
    ws.next_change().await;

    ws.send(json!({ "type": "getMetrics" })).await;
    let reply = ws.recv().await;
    assert_eq!(reply["type"], "metrics");
    let metrics = &reply["metrics"];
    assert_eq!(metrics["totalFileEvents"], 1);
    assert_eq!(metrics["totalNotificationsSent"], 1);
    assert_eq!(metrics["activeSubscriptions"], 1);
    assert_eq!(metrics["activeClients"], 1);

    ws.send(json!({ "type": "getClientInfo" })).await;
    let reply = ws.recv().await;
    assert_eq!(reply["type"], "clientInfo");
    let info = &reply["clientInfo"];
    assert_eq!(info["authenticated"], true);
    assert_eq!(info["subscriptionCount"], 1);
    assert!(info["id"].as_str().unwrap().starts_with("client_"));
}

// ============================================================================
// Notifications from WebDAV writes
// ============================================================================

#[tokio::test]
async fn test_put_notifies_created_then_updated() {
    let server = TestServer::start().await;
    let mut ws = server.observer().await;
    ws.subscribe("/docs/*").await;

    server.put_ok("/docs/report.txt", "draft").await;
    let change = ws.next_change().await;
    assert_eq!(change["eventType"], "created");
    assert_eq!(change["path"], "docs/report.txt");
    assert_eq!(change["size"], 5);
    assert_eq!(change["mimeType"], "text/plain");
    assert!(change["timestamp"].as_str().unwrap().ends_with('Z'));

    server.put_ok("/docs/report.txt", "final version").await;
    let change = ws.next_change().await;
    assert_eq!(change["eventType"], "updated");
    assert_eq!(change["size"], 13);

    // One notification per write.
    ws.assert_quiet().await;
}

#[tokio::test]
async fn test_non_matching_writes_are_not_delivered() {
    let server = TestServer::start().await;
    let mut ws = server.observer().await;
    ws.subscribe("/docs/*").await;

    server.put_ok("/other/a.txt", "x").await;
    server.put_ok("/docs/sub/deep.txt", "x").await;
    ws.assert_quiet().await;

    server.put_ok("/docs/top.txt", "x").await;
    assert_eq!(ws.next_change().await["path"], "docs/top.txt");
}

#[tokio::test]
async fn test_overlapping_patterns_deliver_once_per_pattern() {
    let server = TestServer::start().await;
    let mut ws = server.observer().await;
    ws.subscribe("/docs/*").await;
    ws.subscribe("/docs/**").await;

    server.put_ok("/docs/a.txt", "a").await;
    ws.next_change().await;
    ws.next_change().await;
    ws.assert_quiet().await;
}

#[tokio::test]
async fn test_directory_and_delete_events() {
    let server = TestServer::start().await;
    let mut ws = server.observer().await;
    ws.subscribe("/**").await;

    server.mkcol("/photos").await;
    let change = ws.next_change().await;
    assert_eq!(change["eventType"], "directoryCreated");
    assert_eq!(change["path"], "photos");
    assert!(change.get("mimeType").is_none());

    server.put_ok("/photos/cat.png", vec![0u8; 16]).await;
    let change = ws.next_change().await;
    assert_eq!(change["eventType"], "created");
    assert_eq!(change["mimeType"], "image/png");

    server.delete("/photos/cat.png").await;
    let change = ws.next_change().await;
    assert_eq!(change["eventType"], "deleted");
    assert_eq!(change["size"], 0);

    server.delete("/photos").await;
    assert_eq!(ws.next_change().await["eventType"], "deleted");
}

#[tokio::test]
async fn test_every_observer_gets_its_own_copy() {
    let server = TestServer::start().await;
    let mut first = server.observer().await;
    let mut second = server.observer().await;
    let mut bystander = server.observer().await;
    first.subscribe("/").await;
    second.subscribe("/shared").await;
    bystander.subscribe("/private").await;

    server.put_ok("/shared/doc.txt", "x").await;
    assert_eq!(first.next_change().await["path"], "shared/doc.txt");
    assert_eq!(second.next_change().await["path"], "shared/doc.txt");
    bystander.assert_quiet().await;
}

#[tokio::test]
async fn test_watch_paths_limit_notifications() {
    let server = TestServer::with_config(|config| {
        config.watch_paths = vec!["docs".into()];
    })
    .await;
    let mut ws = server.observer().await;
    ws.subscribe("/**").await;

    server.put_ok("/elsewhere/a.txt", "x").await;
    ws.assert_quiet().await;

    server.put_ok("/docs/a.txt", "x").await;
    assert_eq!(ws.next_change().await["path"], "docs/a.txt");
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_disconnect_removes_subscriptions() {
    let server = TestServer::start().await;
    let mut ws = server.observer().await;
    ws.subscribe("/a").await;
    ws.subscribe("/b/**").await;
    assert_eq!(server.server.engine().active_subscriptions(), 2);

    ws.close().await;
    let engine = server.server.engine();
    for _ in 0..50 {
        if engine.observer_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(engine.observer_count(), 0);
    assert_eq!(engine.active_subscriptions(), 0);

    // Writes after the disconnect go nowhere.
    server.put_ok("/a", "x").await;
}

#[tokio::test]
async fn test_unresponsive_client_is_dropped() {
    let server = TestServer::with_config(|config| {
        config.heartbeat_interval_ms = 100;
    })
    .await;
    let mut ws = server.observer().await;
    ws.subscribe("/").await;
    assert_eq!(server.server.engine().observer_count(), 1);

    // Not polling the socket means pings go unanswered.
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(server.server.engine().observer_count(), 0);
    assert!(ws.is_closed().await);
}

#[tokio::test]
async fn test_responsive_client_stays_connected() {
    let server = TestServer::with_config(|config| {
        config.heartbeat_interval_ms = 100;
    })
    .await;
    let mut ws = server.observer().await;
    ws.subscribe("/").await;

    // Polling answers each ping with a pong.
    assert!(ws.recv_within(Duration::from_millis(600)).await.is_none());

    server.put_ok("/still-here.txt", "x").await;
    assert_eq!(ws.next_change().await["path"], "still-here.txt");
}
