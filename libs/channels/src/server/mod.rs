//! Server Channel
//!
//! Accepts connections and materializes each one as a child [`Channel`]
//! with its own clone of the template pipeline. Children share the server's
//! correlator and tuple space. The child table is keyed by each child's
//! current stringified address: re-addressing a child moves its entry under
//! the table lock, and a disconnected child is removed and closed.

mod builder;

pub use builder::{PipelineFactory, ServerChannelBuilder};

use crate::address::{ChannelAddress, ChannelId};
use crate::channel::{dispatch, Channel, ChannelBuilder, ChannelListener, ChildHost, ServerListener};
use crate::delivery::Delivery;
use crate::error::{ChannelError, Result};
use crate::message::{Correlator, Message};
use crate::operation::SendOperation;
use crate::pipeline::BufferStrategy;
use crate::transport::framing::FrameHeader;
use crate::transport::{Acceptor, BoxedStream};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use tuplespace::TupleSpace;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub(crate) struct ServerShared<M: Message> {
    id: ChannelId,
    name: Option<String>,
    span: Span,
    local_endpoint: String,
    children: Mutex<HashMap<String, Channel<M>>>,

    pipeline_factory: PipelineFactory<M>,
    buffer_strategy: Option<BufferStrategy>,
    header: Arc<dyn FrameHeader>,
    max_frame_len: usize,
    correlator: Option<Arc<dyn Correlator<M>>>,
    tuple_space: Arc<TupleSpace<Delivery<M>>>,
    context: String,
    delivery_ttl: Duration,
    max_connections: Option<usize>,

    listeners: RwLock<Vec<Arc<dyn ServerListener<M>>>>,
    child_listeners: Vec<Arc<dyn ChannelListener<M>>>,

    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    accepted: AtomicU64,
    rejected: AtomicU64,
    me: Weak<ServerShared<M>>,
}

impl<M: Message> ServerShared<M> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn notify<F>(&self, child: Channel<M>, notify: F)
    where
        F: Fn(&dyn ServerListener<M>, &Channel<M>) + Send + 'static,
    {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        dispatch(&self.span, async move {
            for listener in &listeners {
                notify(listener.as_ref(), &child);
            }
        });
    }

    /// Wrap an accepted stream in a new child channel
    fn adopt(&self, stream: BoxedStream, peer: String) {
        if self.is_closed() {
            return;
        }
        // Only the accept loop adds children, so the count cannot grow before the insert below
        if let Some(max) = self.max_connections {
            if self.children.lock().len() >= max {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(%peer, max, "Connection limit reached, closing accepted connection");
                return;
            }
        }

        let host: Weak<dyn ChildHost<M>> = self.me.clone();
        let mut builder = ChannelBuilder::new()
            .name(peer.clone())
            .pipeline((self.pipeline_factory)())
            .shared_header(Arc::clone(&self.header))
            .max_frame_len(self.max_frame_len)
            .tuple_space(Arc::clone(&self.tuple_space))
            .context(self.context.clone())
            .delivery_ttl(self.delivery_ttl)
            .span(info_span!(parent: &self.span, "child", %peer))
            .parent(host);
        if let Some(correlator) = &self.correlator {
            builder = builder.shared_correlator(Arc::clone(correlator));
        }
        if let Some(strategy) = self.buffer_strategy {
            builder = builder.buffer_strategy(strategy);
        }
        for listener in &self.child_listeners {
            builder = builder.listener(Arc::clone(listener));
        }
        let child = builder.build();
        let key = child.address().key();

        self.children.lock().insert(key.clone(), child.clone());

        if let Err(e) = child.shared.install(stream) {
            warn!(%peer, error = %e, "Failed to start child channel");
            self.children.lock().remove(&key);
            return;
        }

        self.accepted.fetch_add(1, Ordering::Relaxed);
        info!(%peer, child = %key, "Accepted connection");
        self.notify(child, |listener, child| listener.on_child_connected(child));
    }
}

impl<M: Message> ChildHost<M> for ServerShared<M> {
    fn address_changing(
        &self,
        child: &Channel<M>,
        new: &ChannelAddress,
        swap: &mut dyn FnMut() -> ChannelAddress,
    ) -> ChannelAddress {
        let (old, moved) = {
            let mut children = self.children.lock();
            let old = swap();
            let old_key = old.key();
            let new_key = new.key();
            let moved = old_key != new_key && children.get(&old_key).is_some_and(|c| c == child);
            if moved {
                children.remove(&old_key);
                if let Some(displaced) = children.insert(new_key.clone(), child.clone()) {
                    warn!(key = %new_key, displaced = %displaced.id(), "Address taken over by another child");
                }
            }
            (old, moved)
        };

        if moved {
            debug!(old = %old, new = %new, "Child re-addressed");
            let previous = old.clone();
            self.notify(child.clone(), move |listener, child| {
                listener.on_child_address_changed(child, &previous)
            });
        }
        old
    }

    fn child_disconnected(&self, child: &Channel<M>) {
        // Addresses of registered children only change under this lock
        let removed = {
            let mut children = self.children.lock();
            let key = child.address().key();
            if children.get(&key).is_some_and(|c| c == child) {
                children.remove(&key)
            } else {
                None
            }
        };

        if let Some(child) = removed {
            debug!(child = %child.address(), "Child disconnected");
            child.close();
            self.notify(child, |listener, child| listener.on_child_disconnected(child));
        }
    }
}

impl<M: Message> Drop for ServerShared<M> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn accept_loop<M: Message>(
    server: Weak<ServerShared<M>>,
    acceptor: Arc<dyn Acceptor>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.changed() => break,
            accepted = acceptor.accept() => accepted,
        };
        let Some(server) = server.upgrade() else {
            break;
        };
        match accepted {
            Ok((stream, peer)) => server.adopt(stream, peer),
            Err(e) => {
                drop(server);
                e.log("Accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
    debug!(endpoint = %acceptor.local_endpoint(), "Accept loop stopped");
}

/// Handle to a listening server channel
pub struct ServerChannel<M: Message> {
    shared: Arc<ServerShared<M>>,
}

impl<M: Message> Clone for ServerChannel<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Message> fmt::Debug for ServerChannel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerChannel")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("local_endpoint", &self.shared.local_endpoint)
            .field("children", &self.child_count())
            .finish()
    }
}

impl<M: Message> ServerChannel<M> {
    pub fn builder() -> ServerChannelBuilder<M> {
        ServerChannelBuilder::new()
    }

    pub(crate) fn start(parts: builder::ServerParts<M>, acceptor: Arc<dyn Acceptor>) -> Self {
        let (shutdown, stop) = watch::channel(false);
        let local_endpoint = acceptor.local_endpoint();
        let span = parts.span;

        let shared = Arc::new_cyclic(|me| ServerShared {
            id: parts.id,
            name: parts.name,
            span: span.clone(),
            local_endpoint: local_endpoint.clone(),
            children: Mutex::new(HashMap::new()),
            pipeline_factory: parts.pipeline_factory,
            buffer_strategy: parts.buffer_strategy,
            header: parts.header,
            max_frame_len: parts.max_frame_len,
            correlator: parts.correlator,
            tuple_space: parts.tuple_space,
            context: parts.context,
            delivery_ttl: parts.delivery_ttl,
            max_connections: parts.max_connections,
            listeners: RwLock::new(parts.listeners),
            child_listeners: parts.child_listeners,
            shutdown,
            closed: AtomicBool::new(false),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            me: me.clone(),
        });

        tokio::spawn(accept_loop(Arc::downgrade(&shared), acceptor, stop).instrument(span.clone()));
        span.in_scope(|| info!(endpoint = %local_endpoint, "Server listening"));
        Self { shared }
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    /// Bound endpoint, with the real port when bound to port 0
    pub fn local_endpoint(&self) -> &str {
        &self.shared.local_endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Snapshot of the connected children
    pub fn children(&self) -> Vec<Channel<M>> {
        self.shared.children.lock().values().cloned().collect()
    }

    /// Child registered under the stringified address `key`
    pub fn child(&self, key: &str) -> Option<Channel<M>> {
        self.shared.children.lock().get(key).cloned()
    }

    pub fn child_by_address(&self, address: &ChannelAddress) -> Option<Channel<M>> {
        self.child(&address.key())
    }

    pub fn child_count(&self) -> usize {
        self.shared.children.lock().len()
    }

    /// Send to the child currently registered under `address`
    pub fn send_to(&self, address: &ChannelAddress, message: M) -> SendOperation {
        match self.child_by_address(address) {
            Some(child) => child.send(message),
            None => SendOperation::failed(
                format!("no connected child with address '{address}'"),
                Some(ChannelError::NotConnected),
            ),
        }
    }

    /// Tuple space shared by every child
    pub fn tuple_space(&self) -> &Arc<TupleSpace<Delivery<M>>> {
        &self.shared.tuple_space
    }

    pub fn context(&self) -> &str {
        &self.shared.context
    }

    /// Take the next delivery published by any child
    pub async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Delivery<M>>> {
        Ok(self
            .shared
            .tuple_space
            .take(None, timeout, &self.shared.context)
            .await?)
    }

    pub fn add_listener(&self, listener: Arc<dyn ServerListener<M>>) {
        self.shared.listeners.write().push(listener);
    }

    pub fn accepted_connections(&self) -> u64 {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    /// Connections closed on accept because of `max_connections`
    pub fn rejected_connections(&self) -> u64 {
        self.shared.rejected.load(Ordering::Relaxed)
    }

    /// Stop accepting, then close every known child; idempotent
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.send_replace(true);

        let snapshot = self.children();
        for child in &snapshot {
            child.close();
        }
        self.shared.children.lock().clear();
        self.shared
            .span
            .in_scope(|| info!(children = snapshot.len(), "Server closed"));
    }
}
