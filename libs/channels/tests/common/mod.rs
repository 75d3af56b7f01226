//! Shared helpers for channel integration tests

#![allow(dead_code)]

use channels::sinks::{FormatterSink, Utf8Formatter};
use channels::{Channel, ChannelAddress, Pipeline, ServerChannel, ServerListener};
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(2);

/// Key is the text before the first `:`
pub fn key_of(message: &String) -> Option<String> {
    message.split_once(':').map(|(key, _)| key.to_string())
}

pub fn text_pipeline() -> Pipeline<String> {
    Pipeline::new().with(FormatterSink::new(Utf8Formatter))
}

/// Two channels joined by an in-memory pipe; only the first has a correlator
pub fn duplex_pair() -> (Channel<String>, Channel<String>) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let client = Channel::builder()
        .name("client")
        .pipeline(text_pipeline())
        .correlator(key_of)
        .build();
    let peer = Channel::builder()
        .name("peer")
        .pipeline(text_pipeline())
        .build();
    client.attach(left).unwrap();
    peer.attach(right).unwrap();
    (client, peer)
}

pub async fn start_server() -> ServerChannel<String> {
    ServerChannel::builder()
        .name("test-server")
        .bind("127.0.0.1:0")
        .pipeline(text_pipeline())
        .correlator(key_of)
        .start()
        .await
        .unwrap()
}

pub async fn connect_client(endpoint: &str) -> Channel<String> {
    let client = Channel::builder()
        .pipeline(text_pipeline())
        .correlator(key_of)
        .endpoint(endpoint)
        .unwrap()
        .build();
    client.connect().await.unwrap();
    client
}

/// Poll `condition` until it holds or `WAIT` elapses
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting")
}

/// Records server notifications as text
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl ServerListener<String> for RecordingListener {
    fn on_child_connected(&self, _child: &Channel<String>) {
        self.events.lock().push("connected".to_string());
    }

    fn on_child_disconnected(&self, _child: &Channel<String>) {
        self.events.lock().push("disconnected".to_string());
    }

    fn on_child_address_changed(&self, child: &Channel<String>, old: &ChannelAddress) {
        self.events
            .lock()
            .push(format!("moved {} -> {}", old.key(), child.address().key()));
    }
}
