//! Request/Response Correlation Tests
//!
//! Two channels over an in-memory pipe: the client correlates by the text
//! before the first `:`, the peer answers (or stays silent) by hand.

mod common;

use channels::{
    Channel, ChannelError, ChannelStatus, PipelineContext, RequestStatus, Result, Sink,
};
use common::*;
use std::time::Duration;

/// Refuses outbound messages starting with `bad`
#[derive(Debug, Clone)]
struct RejectingSink;

impl Sink<String> for RejectingSink {
    fn name(&self) -> &str {
        "reject"
    }

    fn send(&mut self, ctx: &mut PipelineContext<String>) -> Result<()> {
        match ctx.message_to_send() {
            Some(message) if message.starts_with("bad") => {
                Err(ChannelError::format("refused by policy"))
            }
            _ => Ok(()),
        }
    }

    fn clone_sink(&self) -> Box<dyn Sink<String>> {
        Box::new(self.clone())
    }
}

fn rejecting_pair() -> (Channel<String>, Channel<String>) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let client = Channel::builder()
        .pipeline(text_pipeline().with(RejectingSink))
        .correlator(key_of)
        .build();
    let peer = Channel::builder().pipeline(text_pipeline()).build();
    client.attach(left).unwrap();
    peer.attach(right).unwrap();
    (client, peer)
}

fn is_rejected_by_stage(cause: Option<&ChannelError>) -> bool {
    matches!(cause, Some(ChannelError::Pipeline { stage, .. }) if stage == "reject")
}

#[test_log::test(tokio::test)]
async fn test_response_completes_request() {
    let (client, peer) = duplex_pair();

    let request = client
        .send_expecting_response("7:ping".to_string(), Duration::from_secs(2), false, None)
        .unwrap();

    let incoming = peer.receive(Some(WAIT)).await.unwrap().unwrap();
    let descriptor = incoming.as_received().unwrap();
    assert_eq!(descriptor.message(), "7:ping");
    assert_eq!(descriptor.source(), &peer.address());

    assert!(peer.send("7:pong".to_string()).wait_completion(Some(WAIT), false).await);
    assert!(request.wait_completion(Some(WAIT), false).await);
    assert!(request.is_succeeded());
    assert_eq!(request.response().as_deref(), Some("7:pong"));
    assert_eq!(request.request().unwrap().status(), RequestStatus::Responded);
    assert_eq!(client.pending_count(), 0);

    // Not published when send_to_tuple_space is false
    let published = client.receive(Some(Duration::from_millis(50))).await.unwrap();
    assert!(published.is_none());
}

#[test_log::test(tokio::test)]
async fn test_responded_request_published_when_requested() {
    let (client, peer) = duplex_pair();

    let request = client
        .send_expecting_response("8:ping".to_string(), Duration::from_secs(2), true, None)
        .unwrap();
    within(peer.receive(None)).await.unwrap();
    peer.send("8:pong".to_string());

    let delivery = client.receive(Some(WAIT)).await.unwrap().unwrap();
    let completed = delivery.as_completed().unwrap();
    assert!(completed.is_responded());
    assert_eq!(completed.key(), "8");
    assert_eq!(completed.response().as_deref(), Some("8:pong"));
    assert!(request.is_succeeded());
}

#[test_log::test(tokio::test)]
async fn test_explicit_key_overrides_correlator() {
    let (client, peer) = duplex_pair();

    let request = client
        .send_expecting_response(
            "hello".to_string(),
            Duration::from_secs(2),
            false,
            Some("k1".to_string()),
        )
        .unwrap();
    assert!(client.pending_request("k1").is_some());

    within(peer.receive(None)).await.unwrap();
    peer.send("k1:world".to_string());

    assert!(request.wait_completion(Some(WAIT), false).await);
    assert_eq!(request.response().as_deref(), Some("k1:world"));
}

#[test_log::test(tokio::test)]
async fn test_duplicate_live_key_rejected() {
    let (client, _peer) = duplex_pair();

    let first = client
        .send_expecting_response("9:a".to_string(), Duration::from_secs(2), false, None)
        .unwrap();
    let second = client
        .send_expecting_response("9:b".to_string(), Duration::from_secs(2), false, None)
        .unwrap();

    assert!(second.is_completed());
    assert!(!second.is_succeeded());
    assert!(second.request().is_none());
    assert!(second
        .message()
        .unwrap()
        .contains("already a pending request with the same key"));

    assert!(!first.is_completed());
    assert_eq!(client.pending_count(), 1);
}

#[test_log::test(tokio::test)]
async fn test_empty_key_rejected() {
    let (client, _peer) = duplex_pair();

    // No ':' so the correlator yields nothing
    let computed = client
        .send_expecting_response("nokey".to_string(), Duration::from_secs(1), false, None)
        .unwrap();
    assert!(computed.is_completed());
    assert!(!computed.is_succeeded());
    assert!(computed.request().is_none());

    let explicit = client
        .send_expecting_response(
            "1:x".to_string(),
            Duration::from_secs(1),
            false,
            Some(String::new()),
        )
        .unwrap();
    assert!(explicit.is_completed());
    assert!(!explicit.is_succeeded());
    assert_eq!(client.pending_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_configuration_errors_are_returned() {
    let (client, peer) = duplex_pair();

    let err = peer
        .send_expecting_response("1:x".to_string(), Duration::from_secs(1), false, None)
        .unwrap_err();
    assert!(matches!(err, ChannelError::NotConfigured(_)));

    let err = client
        .send_expecting_response("1:x".to_string(), Duration::from_micros(500), false, None)
        .unwrap_err();
    assert!(matches!(err, ChannelError::OutOfRange { name: "timeout", .. }));
    assert_eq!(client.pending_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_unanswered_request_expires_into_tuple_space() {
    let (client, peer) = duplex_pair();

    let request = client
        .send_expecting_response("42:hold".to_string(), Duration::from_millis(100), true, None)
        .unwrap();
    within(peer.receive(None)).await.unwrap();

    let delivery = client.receive(Some(WAIT)).await.unwrap().unwrap();
    let expired = delivery.as_completed().unwrap();
    assert_eq!(expired.key(), "42");
    assert!(expired.is_expired());
    assert!(expired.transmitted_at().is_some());
    assert!(expired.response().is_none());

    assert!(request.is_completed());
    assert!(!request.is_succeeded());
    assert!(matches!(
        request.cause().as_deref(),
        Some(ChannelError::Timeout { .. })
    ));
    assert_eq!(client.pending_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_late_response_becomes_receive_descriptor() {
    let (client, peer) = duplex_pair();

    let request = client
        .send_expecting_response("5:slow".to_string(), Duration::from_millis(50), false, None)
        .unwrap();
    assert!(request.wait_completion(Some(WAIT), false).await);
    assert!(!request.is_succeeded());
    assert_eq!(request.request().unwrap().status(), RequestStatus::Expired);

    within(peer.receive(None)).await.unwrap();
    peer.send("5:finally".to_string());

    let delivery = client.receive(Some(WAIT)).await.unwrap().unwrap();
    let descriptor = delivery.as_received().unwrap();
    assert_eq!(descriptor.message(), "5:finally");
    assert_eq!(descriptor.source(), &client.address());
}

#[test_log::test(tokio::test)]
async fn test_cancel_publishes_when_requested() {
    let (client, _peer) = duplex_pair();

    let request = client
        .send_expecting_response("3:x".to_string(), Duration::from_secs(5), true, None)
        .unwrap();
    assert!(request.cancel());
    assert!(!request.cancel());

    let delivery = client.receive(Some(WAIT)).await.unwrap().unwrap();
    assert!(delivery.as_completed().unwrap().is_cancelled());
    assert!(request.is_completed());
    assert!(!request.is_succeeded());
    assert_eq!(client.pending_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_disconnect_cancels_pending_without_publishing() {
    let (client, peer) = duplex_pair();

    let first = client
        .send_expecting_response("1:a".to_string(), Duration::from_secs(5), true, None)
        .unwrap();
    let second = client
        .send_expecting_response("2:b".to_string(), Duration::from_secs(5), true, None)
        .unwrap();
    assert_eq!(client.pending_count(), 2);

    client.disconnect();

    assert_eq!(client.status(), ChannelStatus::Disconnected);
    assert_eq!(client.pending_count(), 0);
    for request in [&first, &second] {
        assert!(request.is_completed());
        assert!(!request.is_succeeded());
        assert!(request.request().unwrap().is_cancelled());
    }
    let published = client.receive(Some(Duration::from_millis(50))).await.unwrap();
    assert!(published.is_none());

    assert!(peer.wait_for_status(ChannelStatus::Disconnected, WAIT).await);
}

#[test_log::test(tokio::test)]
async fn test_send_on_disconnected_channel_fails() {
    let (client, _peer) = duplex_pair();
    client.disconnect();

    let operation = client.send("1:x".to_string());
    assert!(operation.is_completed());
    assert!(!operation.is_succeeded());
    assert!(matches!(
        operation.cause().as_deref(),
        Some(ChannelError::NotConnected)
    ));

    let request = client
        .send_expecting_response("1:x".to_string(), Duration::from_secs(1), false, None)
        .unwrap();
    assert!(request.is_completed());
    assert!(!request.is_succeeded());
    assert_eq!(client.pending_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_closed_channel_is_terminal() {
    let (client, _peer) = duplex_pair();
    client.close();
    client.close();

    assert_eq!(client.status(), ChannelStatus::Closed);
    assert!(client.is_closed());
    let (stream, _other) = tokio::io::duplex(1024);
    assert!(matches!(client.attach(stream), Err(ChannelError::Closed)));
}

#[test_log::test(tokio::test)]
async fn test_failing_send_stage_fails_operation() {
    let (client, peer) = rejecting_pair();

    let refused = client.send("bad:1".to_string());
    assert!(refused.is_completed());
    assert!(!refused.is_succeeded());
    assert!(is_rejected_by_stage(refused.cause().as_deref()));

    let request = client
        .send_expecting_response("bad:2".to_string(), Duration::from_secs(1), false, None)
        .unwrap();
    assert!(request.is_completed());
    assert!(!request.is_succeeded());
    assert!(is_rejected_by_stage(request.cause().as_deref()));
    assert_eq!(client.pending_count(), 0);

    // The connection survives and later sends go through
    assert!(client.is_connected());
    let sent = client.send("ok:3".to_string());
    assert!(sent.wait_completion(Some(WAIT), false).await);
    let delivery = peer.receive(Some(WAIT)).await.unwrap().unwrap();
    assert_eq!(delivery.as_received().unwrap().message(), "ok:3");
}
