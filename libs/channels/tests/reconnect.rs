//! Reconnection Tests

mod common;

use channels::{Channel, ChannelStatus, ReconnectPolicy, ServerChannel};
use common::*;
use std::time::Duration;

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy::enabled(Duration::from_millis(20), Duration::from_millis(200))
}

fn reconnecting_client(endpoint: &str) -> Channel<String> {
    Channel::builder()
        .pipeline(text_pipeline())
        .correlator(key_of)
        .endpoint(endpoint)
        .unwrap()
        .connect_timeout(Duration::from_millis(500))
        .reconnect(fast_policy())
        .build()
}

#[test_log::test(tokio::test)]
async fn test_reconnects_after_peer_drops_connection() {
    let server = start_server().await;
    let client = reconnecting_client(server.local_endpoint());
    client.connect().await.unwrap();
    assert!(eventually(|| server.child_count() == 1).await);

    let first_child = server.children().pop().unwrap();
    first_child.close();

    assert!(eventually(|| client.stats().connects == 2).await);
    assert!(client.wait_for_status(ChannelStatus::Connected, WAIT).await);
    assert!(eventually(|| server.child_count() == 1).await);

    let second_child = server.children().pop().unwrap();
    assert_ne!(second_child, first_child);

    let stats = client.stats();
    assert_eq!(stats.connects, 2);
    assert!(stats.reconnect_attempts >= 1);

    // The new connection carries traffic
    let request = client
        .send_expecting_response("1:again".to_string(), Duration::from_secs(2), false, None)
        .unwrap();
    let delivery = within(server.receive(None)).await.unwrap().unwrap();
    let descriptor = delivery.as_received().unwrap();
    server.send_to(descriptor.source(), "1:ok".to_string());
    assert!(request.wait_completion(Some(WAIT), false).await);
    assert_eq!(request.response().as_deref(), Some("1:ok"));

    client.close();
    server.close();
}

#[test_log::test(tokio::test)]
async fn test_failed_connect_keeps_retrying() {
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let endpoint = format!("127.0.0.1:{port}");

    let client = reconnecting_client(&endpoint);
    assert!(client.connect().await.is_err());
    assert_eq!(client.status(), ChannelStatus::Disconnected);

    let server = ServerChannel::builder()
        .bind(endpoint.clone())
        .pipeline(text_pipeline())
        .start()
        .await
        .unwrap();

    assert!(client.wait_for_status(ChannelStatus::Connected, WAIT).await);
    assert!(client.stats().reconnect_attempts >= 1);
    assert!(eventually(|| server.child_count() == 1).await);

    client.close();
    server.close();
}

#[test_log::test(tokio::test)]
async fn test_explicit_disconnect_does_not_reconnect() {
    let server = start_server().await;
    let client = reconnecting_client(server.local_endpoint());
    client.connect().await.unwrap();
    assert!(eventually(|| server.child_count() == 1).await);

    client.disconnect();
    assert!(eventually(|| server.child_count() == 0).await);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.status(), ChannelStatus::Disconnected);
    assert_eq!(server.child_count(), 0);

    // A manual connect still works afterwards
    client.connect().await.unwrap();
    assert!(eventually(|| server.child_count() == 1).await);

    client.close();
    server.close();
}

#[test_log::test(tokio::test)]
async fn test_close_stops_reconnection() {
    let server = start_server().await;
    let client = reconnecting_client(server.local_endpoint());
    client.connect().await.unwrap();
    assert!(eventually(|| server.child_count() == 1).await);

    server.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.status(), ChannelStatus::Closed);
    assert!(client.connect().await.is_err());
}
