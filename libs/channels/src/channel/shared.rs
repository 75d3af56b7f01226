//! Channel State Shared Between Handles and I/O Tasks
//!
//! Lock order: `sync_root` → `connection` → `pipeline` → `pending`.
//! No lock is held across an `.await`, and listener, parent and tuple-space
//! notifications happen after every lock has been released.

use super::listener::{dispatch, ChannelListener};
use super::stats::ChannelStats;
use super::{Channel, ChannelStatus, ChildHost};
use crate::address::{ChannelAddress, ChannelId};
use crate::delivery::{Delivery, ReceiveDescriptor};
use crate::error::{ChannelError, Result};
use crate::message::{correlation_key, Correlator, Message};
use crate::operation::{RequestOperation, SendOperation};
use crate::pipeline::{ChannelEvent, PassOutcome, Pipeline, PipelineContext};
use crate::request::{Request, RequestOwner};
use crate::transport::framing::{encode_frame, Frame, FrameDecoder, FrameHeader};
use crate::transport::link::{Link, LinkEvents, Outbound};
use crate::transport::reconnect::{Backoff, ReconnectPolicy};
use crate::transport::{BoxedStream, Connector};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn, Instrument, Span};
use tuplespace::TupleSpace;

pub(crate) struct PipelineState<M> {
    pub(crate) pipeline: Pipeline<M>,
    pub(crate) ctx: PipelineContext<M>,
}

#[derive(Default)]
struct ConnectionState {
    generation: u64,
    link: Option<Link>,
    connected_at: Option<Instant>,
}

pub(crate) struct ChannelShared<M: Message> {
    pub(crate) id: ChannelId,
    pub(crate) name: Option<String>,
    pub(crate) address: RwLock<ChannelAddress>,
    pub(crate) span: Span,
    pub(crate) sync_root: ReentrantMutex<()>,

    pub(crate) pipeline: Mutex<PipelineState<M>>,
    pub(crate) header: Arc<dyn FrameHeader>,
    pub(crate) max_frame_len: usize,

    pub(crate) correlator: Option<Arc<dyn Correlator<M>>>,
    pub(crate) tuple_space: Arc<TupleSpace<Delivery<M>>>,
    pub(crate) context: String,
    pub(crate) delivery_ttl: Duration,
    pending: Mutex<HashMap<String, Arc<Request<M>>>>,

    connection: Mutex<ConnectionState>,
    pub(crate) status: watch::Sender<ChannelStatus>,
    pub(crate) connector: Option<Arc<dyn Connector>>,
    pub(crate) connect_timeout: Duration,
    pub(crate) reconnect: ReconnectPolicy,
    backoff: Mutex<Backoff>,
    reconnect_task: Mutex<Option<AbortHandle>>,

    pub(crate) listeners: RwLock<Vec<Arc<dyn ChannelListener<M>>>>,
    pub(crate) parent: Option<Weak<dyn ChildHost<M>>>,
    pub(crate) stats: ChannelStats,
    closed: AtomicBool,
    me: Weak<ChannelShared<M>>,
}

/// Everything the builder decides; turned into [`ChannelShared`] by `new`
pub(crate) struct ChannelParts<M: Message> {
    pub(crate) id: ChannelId,
    pub(crate) name: Option<String>,
    pub(crate) address: ChannelAddress,
    pub(crate) span: Span,
    pub(crate) pipeline: Pipeline<M>,
    pub(crate) header: Arc<dyn FrameHeader>,
    pub(crate) max_frame_len: usize,
    pub(crate) correlator: Option<Arc<dyn Correlator<M>>>,
    pub(crate) tuple_space: Arc<TupleSpace<Delivery<M>>>,
    pub(crate) context: String,
    pub(crate) delivery_ttl: Duration,
    pub(crate) connector: Option<Arc<dyn Connector>>,
    pub(crate) connect_timeout: Duration,
    pub(crate) reconnect: ReconnectPolicy,
    pub(crate) listeners: Vec<Arc<dyn ChannelListener<M>>>,
    pub(crate) parent: Option<Weak<dyn ChildHost<M>>>,
}

impl<M: Message> ChannelShared<M> {
    pub(crate) fn new(parts: ChannelParts<M>) -> Arc<Self> {
        let ctx = parts.pipeline.new_context();
        let (status, _) = watch::channel(ChannelStatus::Disconnected);
        Arc::new_cyclic(|me| Self {
            id: parts.id,
            name: parts.name,
            address: RwLock::new(parts.address),
            span: parts.span,
            sync_root: ReentrantMutex::new(()),
            pipeline: Mutex::new(PipelineState {
                pipeline: parts.pipeline,
                ctx,
            }),
            header: parts.header,
            max_frame_len: parts.max_frame_len,
            correlator: parts.correlator,
            tuple_space: parts.tuple_space,
            context: parts.context,
            delivery_ttl: parts.delivery_ttl,
            pending: Mutex::new(HashMap::new()),
            connection: Mutex::new(ConnectionState::default()),
            status,
            connector: parts.connector,
            connect_timeout: parts.connect_timeout,
            reconnect: parts.reconnect,
            backoff: Mutex::new(Backoff::new(parts.reconnect)),
            reconnect_task: Mutex::new(None),
            listeners: RwLock::new(parts.listeners),
            parent: parts.parent,
            stats: ChannelStats::default(),
            closed: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    /// A strong handle, unless the channel is being dropped
    pub(crate) fn handle(&self) -> Option<Channel<M>> {
        self.me.upgrade().map(|shared| Channel { shared })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection.lock().link.is_some()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.connection
            .lock()
            .link
            .as_ref()
            .is_some_and(|link| link.generation() == generation)
    }

    fn set_status(&self, status: ChannelStatus) {
        self.status.send_if_modified(|current| {
            // Closed is terminal
            if *current == status || *current == ChannelStatus::Closed {
                return false;
            }
            *current = status;
            true
        });
    }

    pub(crate) fn parent(&self) -> Option<Arc<dyn ChildHost<M>>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Broadcast `event` through the pipeline, logging (not propagating) sink failures
    pub(crate) fn broadcast(&self, event: ChannelEvent) {
        let mut state = self.pipeline.lock();
        let PipelineState { pipeline, ctx } = &mut *state;
        if let Err(e) = pipeline.process_event(ctx, &event, true) {
            warn!(%event, error = %e, "Event broadcast failed");
        }
    }

    fn notify_listeners<F>(&self, notify: F)
    where
        F: Fn(&dyn ChannelListener<M>, &Channel<M>) + Send + 'static,
    {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        let Some(channel) = self.handle() else {
            return;
        };
        dispatch(&self.span, async move {
            for listener in &listeners {
                notify(listener.as_ref(), &channel);
            }
        });
    }

    // Connection lifecycle

    pub(crate) async fn connect(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let connector = self.connector.clone().ok_or_else(|| {
            ChannelError::not_configured("channel has no connector; attach a stream instead")
        })?;
        if self.is_connected() {
            return Ok(());
        }

        let result = self.connect_once(connector).await;
        if result.is_err() && self.reconnect.enabled {
            self.schedule_reconnect(None);
        }
        result
    }

    async fn connect_once(&self, connector: Arc<dyn Connector>) -> Result<()> {
        self.set_status(ChannelStatus::Connecting);
        self.broadcast(ChannelEvent::ConnectionRequested);
        debug!(endpoint = %connector.endpoint(), "Connecting");

        let attempt = tokio::time::timeout(self.connect_timeout, connector.connect()).await;
        let stream = match attempt {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.connect_failed(e)),
            Err(_) => {
                let e = ChannelError::timeout(
                    format!("connect to {}", connector.endpoint()),
                    self.connect_timeout.as_millis() as u64,
                );
                return Err(self.connect_failed(e));
            }
        };

        match self.install(stream) {
            // Lost a race with a concurrent attempt; keep the existing connection
            Err(ChannelError::InvalidArgument { .. }) if self.is_connected() => Ok(()),
            other => other,
        }
    }

    fn connect_failed(&self, error: ChannelError) -> ChannelError {
        error.log("Connection attempt failed");
        if !self.is_connected() {
            self.set_status(ChannelStatus::Disconnected);
        }
        self.broadcast(ChannelEvent::ConnectionFailed(error.to_string()));
        error
    }

    /// Start the I/O tasks over `stream`
    pub(crate) fn install(&self, stream: BoxedStream) -> Result<()> {
        {
            let _root = self.sync_root.lock();
            if self.is_closed() {
                return Err(ChannelError::Closed);
            }

            let mut connection = self.connection.lock();
            if connection.link.is_some() {
                return Err(ChannelError::invalid_argument(
                    "stream",
                    "channel is already connected",
                ));
            }

            let initial_capacity = {
                let mut state = self.pipeline.lock();
                state.ctx.reset_receive();
                state.pipeline.buffer_strategy().initial_capacity
            };

            connection.generation += 1;
            let generation = connection.generation;
            let decoder = FrameDecoder::new(self.header.clone(), self.max_frame_len, initial_capacity);
            let events: Weak<dyn LinkEvents> = self.me.clone();
            connection.link = Some(Link::spawn(stream, generation, decoder, events, self.span.clone()));
            connection.connected_at = Some(Instant::now());
        }

        self.stats.record_connect();
        self.set_status(ChannelStatus::Connected);
        info!(address = %self.address.read(), "Channel connected");
        self.broadcast(ChannelEvent::Connected);
        self.notify_listeners(|listener, channel| listener.on_connected(channel));
        Ok(())
    }

    /// Tear down the current connection
    ///
    /// With `generation`, only that connection is torn down (stale reports
    /// from an earlier connection are ignored). Returns whether a connection
    /// was actually torn down.
    pub(crate) fn teardown(&self, cause: Option<ChannelError>, generation: Option<u64>) -> bool {
        let (link, lifetime) = {
            let _root = self.sync_root.lock();
            let mut connection = self.connection.lock();
            if generation.is_some_and(|g| g != connection.generation) {
                return false;
            }
            let Some(link) = connection.link.take() else {
                return false;
            };
            (link, connection.connected_at.take().map(|at| at.elapsed()))
        };
        link.shutdown();
        drop(link);

        match &cause {
            Some(e) => e.log("Connection lost"),
            None => info!("Channel disconnected"),
        }

        let cancelled = self.cancel_pending_requests();
        if cancelled > 0 {
            debug!(cancelled, "Pending requests cancelled on disconnect");
        }

        self.set_status(ChannelStatus::Disconnected);
        self.broadcast(ChannelEvent::Disconnected);
        self.notify_listeners(|listener, channel| listener.on_disconnected(channel));
        if let (Some(parent), Some(channel)) = (self.parent(), self.handle()) {
            parent.child_disconnected(&channel);
        }

        if cause.is_some() && self.reconnect.enabled && self.connector.is_some() && !self.is_closed() {
            self.schedule_reconnect(lifetime);
        }
        true
    }

    pub(crate) fn disconnect(&self) {
        self.cancel_reconnect();
        self.backoff.lock().reset();
        self.teardown(None, None);
    }

    pub(crate) fn close(&self) {
        {
            let _root = self.sync_root.lock();
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        self.cancel_reconnect();
        let torn_down = self.teardown(None, None);
        self.cancel_pending_requests();

        if !torn_down {
            if let (Some(parent), Some(channel)) = (self.parent(), self.handle()) {
                parent.child_disconnected(&channel);
            }
        }

        self.broadcast(ChannelEvent::Closed);
        self.set_status(ChannelStatus::Closed);
        info!("Channel closed");
    }

    fn schedule_reconnect(&self, lifetime: Option<Duration>) {
        let first_delay = self.backoff.lock().next_delay(lifetime);
        let weak = self.me.clone();
        debug!(delay_ms = first_delay.as_millis() as u64, "Reconnection scheduled");

        let task = tokio::spawn(
            async move {
                let mut delay = first_delay;
                loop {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let Some(shared) = weak.upgrade() else {
                        return;
                    };
                    if shared.is_closed() || shared.is_connected() {
                        return;
                    }
                    let Some(connector) = shared.connector.clone() else {
                        return;
                    };

                    shared.stats.record_reconnect_attempt();
                    info!(endpoint = %connector.endpoint(), "Reconnecting");
                    if shared.connect_once(connector).await.is_ok() {
                        return;
                    }
                    delay = shared.backoff.lock().next_delay(None);
                }
            }
            .instrument(self.span.clone()),
        );

        if let Some(previous) = self.reconnect_task.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
    }

    // Outbound

    /// Run the send pass and queue the frame, atomically with respect to other sends
    fn transmit(
        &self,
        message: M,
        key: Option<String>,
        operation: Option<SendOperation>,
        on_written: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let connection = self.connection.lock();
        let link = connection.link.as_ref().ok_or(ChannelError::NotConnected)?;

        let body = {
            let mut state = self.pipeline.lock();
            let PipelineState { pipeline, ctx } = &mut *state;
            ctx.begin_send(message, key);
            let result = pipeline.send(ctx);
            let body = ctx.finish_send();
            result?;
            body
        };

        if body.is_empty() {
            return Err(ChannelError::format(
                "send pass produced an empty frame; is a formatter sink configured?",
            ));
        }
        if body.len() > self.max_frame_len {
            return Err(ChannelError::FrameTooLarge {
                length: body.len(),
                max: self.max_frame_len,
            });
        }

        let frame = encode_frame(self.header.as_ref(), &body)?;
        link.enqueue(Outbound {
            frame,
            operation,
            on_written,
        })
        .map_err(|_| ChannelError::NotConnected)
    }

    pub(crate) fn send(&self, message: M) -> SendOperation {
        let operation = SendOperation::pending();
        if let Err(e) = self.transmit(message, None, Some(operation.clone()), None) {
            debug!(error = %e, "Send failed");
            operation.complete_failure(e.to_string(), Some(e));
        }
        operation
    }

    pub(crate) fn send_expecting_response(
        &self,
        message: M,
        timeout: Duration,
        send_to_tuple_space: bool,
        key: Option<String>,
    ) -> Result<RequestOperation<M>> {
        if timeout < Duration::from_millis(1) {
            return Err(ChannelError::out_of_range(
                "timeout",
                format!("must be at least 1ms, got {timeout:?}"),
            ));
        }
        let correlator = self.correlator.as_ref().ok_or_else(|| {
            ChannelError::not_configured("unable to match requests with responses: no correlator")
        })?;

        let key = match key {
            Some(key) => key,
            None => correlator.compute_identifier(&message).unwrap_or_default(),
        };
        if key.is_empty() {
            warn!("Request rejected: empty correlation key");
            return Ok(RequestOperation::failed(
                "unable to compute a correlation key for the request",
                None,
            ));
        }

        let owner: Weak<dyn RequestOwner<M>> = self.me.clone();
        let request = Request::new(
            key.clone(),
            message.clone(),
            timeout,
            send_to_tuple_space,
            owner,
            self.span.clone(),
        );

        {
            let mut pending = self.pending.lock();
            if pending.get(&key).is_some_and(|live| !live.is_completed()) {
                debug!(%key, "Request rejected: key already pending");
                return Ok(RequestOperation::failed(
                    format!("there is already a pending request with the same key '{key}'"),
                    None,
                ));
            }
            pending.insert(key.clone(), Arc::clone(&request));
        }

        let written = Arc::downgrade(&request);
        let on_written = Box::new(move || {
            if let Some(request) = written.upgrade() {
                request.mark_transmitted();
                request.start_timer();
            }
        });

        if let Err(e) = self.transmit(message, Some(key), None, Some(on_written)) {
            self.remove_pending(&request);
            request.cancel(false);
            debug!(error = %e, "Request send failed");
            return Ok(RequestOperation::failed(e.to_string(), Some(e)));
        }

        trace!(key = %request.key(), "Request queued");
        Ok(RequestOperation::new(request))
    }

    fn remove_pending(&self, request: &Arc<Request<M>>) {
        let mut pending = self.pending.lock();
        if pending
            .get(request.key())
            .is_some_and(|registered| Arc::ptr_eq(registered, request))
        {
            pending.remove(request.key());
        }
    }

    /// Drain the pending table and cancel every live request without publishing
    pub(crate) fn cancel_pending_requests(&self) -> usize {
        let drained: Vec<Arc<Request<M>>> = self.pending.lock().drain().map(|(_, r)| r).collect();
        drained.iter().filter(|request| request.cancel(false)).count()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .values()
            .filter(|request| !request.is_completed())
            .count()
    }

    pub(crate) fn pending_request(&self, key: &str) -> Option<Arc<Request<M>>> {
        self.pending.lock().get(key).cloned()
    }

    // Inbound

    /// Append `body` and run receive passes until the buffer is drained or a stage waits
    fn run_receive(&self, body: &[u8]) -> Result<Vec<(M, Option<String>)>> {
        let mut state = self.pipeline.lock();
        let PipelineState { pipeline, ctx } = &mut *state;
        ctx.receive_buffer_mut().extend_from_slice(body);

        let mut completed = Vec::new();
        loop {
            let before = ctx.receive_buffer().len();
            match pipeline.receive(ctx) {
                Ok(PassOutcome::Complete) => {
                    if let Some(message) = ctx.take_received_message() {
                        completed.push((message, ctx.take_receive_correlation_id()));
                    }
                }
                Ok(PassOutcome::Consumed) => {
                    ctx.set_receive_correlation_id(None);
                    trace!("Inbound message consumed by pipeline");
                }
                Ok(PassOutcome::Incomplete) => {
                    let expected = ctx.expected_bytes();
                    pipeline
                        .buffer_strategy()
                        .grow(ctx.receive_buffer_mut(), expected)?;
                    break;
                }
                Err(e) => {
                    e.log("Receive pass aborted");
                    ctx.reset_receive();
                    break;
                }
            }
            let remaining = ctx.receive_buffer().len();
            if remaining == 0 || remaining == before {
                break;
            }
        }
        Ok(completed)
    }

    /// Complete the matching pending request, or publish a receive descriptor
    fn deliver(&self, message: M, key: Option<String>) {
        let key = key.filter(|k| !k.is_empty()).or_else(|| {
            self.correlator
                .as_ref()
                .and_then(|correlator| correlation_key(correlator.as_ref(), &message))
        });

        let mut message = message;
        if let Some(key) = key {
            let request = self.pending.lock().remove(&key);
            if let Some(request) = request {
                match request.set_response(message) {
                    Ok(()) => {
                        trace!(%key, "Response correlated");
                        return;
                    }
                    Err(unclaimed) => message = unclaimed,
                }
            }
        }

        let source = self.address.read().clone();
        self.publish(Delivery::Received(ReceiveDescriptor::new(source, message)));
    }

    fn publish(&self, delivery: Delivery<M>) {
        match self
            .tuple_space
            .write(delivery.clone(), self.delivery_ttl, &self.context)
        {
            Ok(()) => {
                self.notify_listeners(move |listener, channel| listener.on_delivery(channel, &delivery));
            }
            Err(e) => warn!(error = %e, "Failed to publish delivery"),
        }
    }
}

impl<M: Message> LinkEvents for ChannelShared<M> {
    fn on_frame(&self, generation: u64, frame: Frame) {
        if !self.is_current(generation) {
            return;
        }
        match frame {
            Frame::Heartbeat => {
                trace!("Heartbeat received");
                self.broadcast(ChannelEvent::Heartbeat);
            }
            Frame::Body(body) => {
                self.stats.record_frame(body.len());
                match self.run_receive(&body) {
                    Ok(messages) => {
                        for (message, key) in messages {
                            self.stats.record_message();
                            self.deliver(message, key);
                        }
                    }
                    Err(e) => {
                        self.teardown(Some(e), Some(generation));
                    }
                }
            }
        }
    }

    fn on_frame_written(&self, _generation: u64, bytes: usize) {
        self.stats.record_written(bytes);
    }

    fn on_link_closed(&self, generation: u64, cause: ChannelError) {
        self.teardown(Some(cause), Some(generation));
    }
}

impl<M: Message> RequestOwner<M> for ChannelShared<M> {
    fn release_request(&self, request: &Arc<Request<M>>, publish: bool) {
        self.remove_pending(request);
        if publish {
            self.publish(Delivery::Completed(Arc::clone(request)));
        }
    }
}

impl<M: Message> Drop for ChannelShared<M> {
    fn drop(&mut self) {
        if let Some(task) = self.reconnect_task.get_mut().take() {
            task.abort();
        }
    }
}
