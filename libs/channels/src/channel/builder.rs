use super::shared::{ChannelParts, ChannelShared};
use super::{Channel, ChannelListener, ChildHost};
use crate::address::{ChannelAddress, ChannelId};
use crate::delivery::Delivery;
use crate::error::Result;
use crate::message::{Correlator, Message};
use crate::pipeline::{BufferStrategy, Pipeline, Sink};
use crate::settings::frame_header;
use crate::transport::framing::{BinaryLengthHeader, FrameHeader};
use crate::transport::reconnect::ReconnectPolicy;
use crate::transport::{connector_for, Connector};
use link_config::ChannelSettings;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{info_span, Span};
use tuplespace::{TupleSpace, NO_EXPIRY};

/// Default upper bound for a frame body (16MB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Default connection attempt timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for [`Channel`]
///
/// Defaults: 4-byte big-endian length header, 16MB frames, 5s connect
/// timeout, no reconnection, a private tuple space, deliveries that never
/// expire, and a reference address.
pub struct ChannelBuilder<M: Message> {
    name: Option<String>,
    address: Option<ChannelAddress>,
    pipeline: Pipeline<M>,
    buffer_strategy: Option<BufferStrategy>,
    header: Arc<dyn FrameHeader>,
    max_frame_len: usize,
    correlator: Option<Arc<dyn Correlator<M>>>,
    tuple_space: Option<Arc<TupleSpace<Delivery<M>>>>,
    context: String,
    delivery_ttl: Duration,
    connector: Option<Arc<dyn Connector>>,
    connect_timeout: Duration,
    reconnect: ReconnectPolicy,
    span: Option<Span>,
    listeners: Vec<Arc<dyn ChannelListener<M>>>,
    parent: Option<Weak<dyn ChildHost<M>>>,
}

impl<M: Message> Default for ChannelBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> ChannelBuilder<M> {
    pub fn new() -> Self {
        Self {
            name: None,
            address: None,
            pipeline: Pipeline::new(),
            buffer_strategy: None,
            header: Arc::new(BinaryLengthHeader::default()),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            correlator: None,
            tuple_space: None,
            context: tuplespace::DEFAULT_CONTEXT.to_string(),
            delivery_ttl: NO_EXPIRY,
            connector: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::disabled(),
            span: None,
            listeners: Vec::new(),
            parent: None,
        }
    }

    /// Builder preconfigured from declarative settings
    pub fn from_settings(settings: &ChannelSettings) -> Result<Self> {
        settings.validate("channel")?;

        let mut builder = Self::new()
            .shared_header(frame_header(&settings.header)?)
            .max_frame_len(settings.max_frame_len)
            .buffer_strategy(BufferStrategy::new(settings.receive_buffer, settings.max_frame_len))
            .connect_timeout(settings.connect_timeout())
            .reconnect(ReconnectPolicy::from(&settings.reconnect))
            .context(settings.tuple_space_context.clone())
            .delivery_ttl(settings.delivery_ttl().unwrap_or(NO_EXPIRY));

        if let Some(name) = &settings.name {
            builder = builder.name(name.clone());
        }
        if let Some(address) = &settings.address {
            builder = builder.address(ChannelAddress::named(address.clone()));
        }
        if let Some(remote) = &settings.remote {
            builder = builder.endpoint(remote)?;
        }
        Ok(builder)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Initial address; a reference address is generated when unset
    pub fn address(mut self, address: ChannelAddress) -> Self {
        self.address = Some(address);
        self
    }

    pub fn pipeline(mut self, pipeline: Pipeline<M>) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Prepend a sink to the pipeline
    pub fn sink(mut self, sink: impl Sink<M> + 'static) -> Self {
        self.pipeline.push(sink);
        self
    }

    pub fn buffer_strategy(mut self, strategy: BufferStrategy) -> Self {
        self.buffer_strategy = Some(strategy);
        self
    }

    pub fn header(self, header: impl FrameHeader + 'static) -> Self {
        self.shared_header(Arc::new(header))
    }

    pub fn shared_header(mut self, header: Arc<dyn FrameHeader>) -> Self {
        self.header = header;
        self
    }

    pub fn max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn correlator(self, correlator: impl Correlator<M> + 'static) -> Self {
        self.shared_correlator(Arc::new(correlator))
    }

    pub fn shared_correlator(mut self, correlator: Arc<dyn Correlator<M>>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    /// Publish deliveries to a shared tuple space instead of a private one
    pub fn tuple_space(mut self, space: Arc<TupleSpace<Delivery<M>>>) -> Self {
        self.tuple_space = Some(space);
        self
    }

    /// Tuple-space partition deliveries are written to
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn delivery_ttl(mut self, ttl: Duration) -> Self {
        self.delivery_ttl = ttl;
        self
    }

    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Connect to `host:port` or `unix:/path`
    pub fn endpoint(mut self, endpoint: &str) -> Result<Self> {
        self.connector = Some(connector_for(endpoint)?);
        Ok(self)
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Span every log line and task of the channel runs in
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ChannelListener<M>>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub(crate) fn parent(mut self, parent: Weak<dyn ChildHost<M>>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn build(self) -> Channel<M> {
        let id = ChannelId::new();
        let span = self.span.unwrap_or_else(|| {
            info_span!("channel", %id, name = self.name.as_deref().unwrap_or(""))
        });

        let mut pipeline = self.pipeline;
        if let Some(strategy) = self.buffer_strategy {
            pipeline.set_buffer_strategy(strategy);
        }

        let tuple_space = self
            .tuple_space
            .unwrap_or_else(|| Arc::new(TupleSpace::with_name(format!("channel-{id}"))));

        Channel {
            shared: ChannelShared::new(ChannelParts {
                id,
                name: self.name,
                address: self.address.unwrap_or(ChannelAddress::Reference(id)),
                span,
                pipeline,
                header: self.header,
                max_frame_len: self.max_frame_len,
                correlator: self.correlator,
                tuple_space,
                context: self.context,
                delivery_ttl: self.delivery_ttl,
                connector: self.connector,
                connect_timeout: self.connect_timeout,
                reconnect: self.reconnect,
                listeners: self.listeners,
                parent: self.parent,
            }),
        }
    }
}
