//! Sender/Receiver Channel
//!
//! A [`Channel`] owns one connection at a time, a pipeline instance, a
//! pending-request table and a handle to the tuple space its deliveries are
//! published to. Handles are cheap to clone; all clones drive the same
//! channel.
//!
//! ## Inbound path
//!
//! ```text
//! socket ─► frame decoder ─► pipeline (back to front)
//!                               │
//!            ┌──────────────────┼─────────────────────┐
//!            ▼                  ▼                     ▼
//!        consumed        pending request       ReceiveDescriptor
//!       by a sink     (response correlated)    ─► tuple space
//! ```
//!
//! ## Outbound path
//!
//! `send` runs the pipeline front to back, frames the body and queues it for
//! the writer task; frames are written in the order they were queued.

mod builder;
mod listener;
pub(crate) mod shared;
mod stats;

pub use builder::{ChannelBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_FRAME_LEN};
pub(crate) use listener::dispatch;
pub use listener::{ChannelListener, ServerListener};
pub use stats::{ChannelStats, StatsSnapshot};

use crate::address::{ChannelAddress, ChannelId};
use crate::delivery::Delivery;
use crate::error::Result;
use crate::message::Message;
use crate::operation::{RequestOperation, SendOperation};
use crate::pipeline::ChannelEvent;
use crate::request::Request;
use crate::transport::AsyncStream;
use parking_lot::ReentrantMutex;
use shared::ChannelShared;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;
use tuplespace::TupleSpace;

/// Connection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal
    Closed,
}

/// Owner of child channels (a server)
///
/// Children hold it through a `Weak` handle.
pub(crate) trait ChildHost<M: Message>: Send + Sync {
    /// Re-key `child` under `new`
    ///
    /// Must run `swap` (which installs `new` and returns the previous
    /// address) while the child table is locked, so the table move and the
    /// address change are one step. Returns the previous address.
    fn address_changing(
        &self,
        child: &Channel<M>,
        new: &ChannelAddress,
        swap: &mut dyn FnMut() -> ChannelAddress,
    ) -> ChannelAddress;

    fn child_disconnected(&self, child: &Channel<M>);
}

/// Handle to a channel
pub struct Channel<M: Message> {
    pub(crate) shared: Arc<ChannelShared<M>>,
}

impl<M: Message> Clone for Channel<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Message> fmt::Debug for Channel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("address", &*self.shared.address.read())
            .field("status", &self.status())
            .finish()
    }
}

impl<M: Message> PartialEq for Channel<M> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<M: Message> Eq for Channel<M> {}

impl<M: Message> Channel<M> {
    pub fn builder() -> ChannelBuilder<M> {
        ChannelBuilder::new()
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    pub fn address(&self) -> ChannelAddress {
        self.shared.address.read().clone()
    }

    /// Re-address the channel
    ///
    /// A parent server moves its table entry under its own lock before the
    /// new address becomes visible.
    pub fn set_address(&self, address: ChannelAddress) {
        let old = {
            let mut swap = || std::mem::replace(&mut *self.shared.address.write(), address.clone());
            match self.shared.parent() {
                Some(host) => host.address_changing(self, &address, &mut swap),
                None => swap(),
            }
        };
        if old == address {
            return;
        }
        self.shared
            .broadcast(ChannelEvent::AddressChanged { old, new: address });
    }

    pub fn status(&self) -> ChannelStatus {
        *self.shared.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Wait until the channel reaches `status`; `false` on timeout
    pub async fn wait_for_status(&self, status: ChannelStatus, timeout: Duration) -> bool {
        let mut watcher = self.shared.status.subscribe();
        let reached = async move { watcher.wait_for(|current| *current == status).await.is_ok() };
        tokio::time::timeout(timeout, reached).await.unwrap_or(false)
    }

    /// Connect through the configured connector
    ///
    /// With reconnection enabled a failed attempt also schedules retries.
    pub async fn connect(&self) -> Result<()> {
        self.shared.connect().await
    }

    /// Run the channel over an already established stream
    pub fn attach<S: AsyncStream + 'static>(&self, stream: S) -> Result<()> {
        self.shared.install(Box::new(stream))
    }

    /// Tear down the transport and cancel pending requests; the channel may reconnect later
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Release the channel for good; idempotent
    pub fn close(&self) {
        self.shared.close();
    }

    /// Queue `message` for transmission
    pub fn send(&self, message: M) -> SendOperation {
        self.shared.send(message)
    }

    /// Send `message` and correlate the response
    ///
    /// `key` overrides the correlator's key for this request. Configuration
    /// errors (timeout below 1ms, no correlator) are returned as `Err`;
    /// an empty key, a duplicate live key or a disconnected channel fail the
    /// returned handle instead, without registering a request.
    pub fn send_expecting_response(
        &self,
        message: M,
        timeout: Duration,
        send_to_tuple_space: bool,
        key: Option<String>,
    ) -> Result<RequestOperation<M>> {
        self.shared
            .send_expecting_response(message, timeout, send_to_tuple_space, key)
    }

    /// Cancel every pending request without publishing them; returns how many were live
    pub fn cancel_pending_requests(&self) -> usize {
        self.shared.cancel_pending_requests()
    }

    /// Number of live pending requests
    pub fn pending_count(&self) -> usize {
        self.shared.pending_count()
    }

    pub fn pending_request(&self, key: &str) -> Option<Arc<Request<M>>> {
        self.shared.pending_request(key)
    }

    pub fn tuple_space(&self) -> &Arc<TupleSpace<Delivery<M>>> {
        &self.shared.tuple_space
    }

    /// Tuple-space partition deliveries are written to
    pub fn context(&self) -> &str {
        &self.shared.context
    }

    /// Take the next delivery from this channel's partition
    pub async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Delivery<M>>> {
        Ok(self
            .shared
            .tuple_space
            .take(None, timeout, &self.shared.context)
            .await?)
    }

    pub fn add_listener(&self, listener: Arc<dyn ChannelListener<M>>) {
        self.shared.listeners.write().push(listener);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Lock for composing higher layers with the channel's lifecycle transitions
    pub fn sync_root(&self) -> &ReentrantMutex<()> {
        &self.shared.sync_root
    }

    pub fn span(&self) -> &Span {
        &self.shared.span
    }
}
