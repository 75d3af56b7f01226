use super::ServerChannel;
use crate::address::ChannelId;
use crate::channel::{ChannelListener, ServerListener, DEFAULT_MAX_FRAME_LEN};
use crate::delivery::Delivery;
use crate::error::{ChannelError, Result};
use crate::message::{Correlator, Message};
use crate::pipeline::{BufferStrategy, Pipeline};
use crate::settings::frame_header;
use crate::transport::framing::{BinaryLengthHeader, FrameHeader};
use crate::transport::{bind, Acceptor};
use link_config::ServerSettings;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info_span, Span};
use tuplespace::{TupleSpace, NO_EXPIRY};

/// Produces the pipeline for each accepted connection
pub type PipelineFactory<M> = Arc<dyn Fn() -> Pipeline<M> + Send + Sync>;

pub(crate) struct ServerParts<M: Message> {
    pub(crate) id: ChannelId,
    pub(crate) name: Option<String>,
    pub(crate) span: Span,
    pub(crate) pipeline_factory: PipelineFactory<M>,
    pub(crate) buffer_strategy: Option<BufferStrategy>,
    pub(crate) header: Arc<dyn FrameHeader>,
    pub(crate) max_frame_len: usize,
    pub(crate) correlator: Option<Arc<dyn Correlator<M>>>,
    pub(crate) tuple_space: Arc<TupleSpace<Delivery<M>>>,
    pub(crate) context: String,
    pub(crate) delivery_ttl: Duration,
    pub(crate) max_connections: Option<usize>,
    pub(crate) listeners: Vec<Arc<dyn ServerListener<M>>>,
    pub(crate) child_listeners: Vec<Arc<dyn ChannelListener<M>>>,
}

/// Builder for [`ServerChannel`]
///
/// Each accepted connection gets a deep clone of the template pipeline
/// unless a factory is supplied.
pub struct ServerChannelBuilder<M: Message> {
    name: Option<String>,
    endpoint: Option<String>,
    acceptor: Option<Arc<dyn Acceptor>>,
    pipeline_factory: Option<PipelineFactory<M>>,
    buffer_strategy: Option<BufferStrategy>,
    header: Arc<dyn FrameHeader>,
    max_frame_len: usize,
    correlator: Option<Arc<dyn Correlator<M>>>,
    tuple_space: Option<Arc<TupleSpace<Delivery<M>>>>,
    context: String,
    delivery_ttl: Duration,
    max_connections: Option<usize>,
    listeners: Vec<Arc<dyn ServerListener<M>>>,
    child_listeners: Vec<Arc<dyn ChannelListener<M>>>,
    span: Option<Span>,
}

impl<M: Message> Default for ServerChannelBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> ServerChannelBuilder<M> {
    pub fn new() -> Self {
        Self {
            name: None,
            endpoint: None,
            acceptor: None,
            pipeline_factory: None,
            buffer_strategy: None,
            header: Arc::new(BinaryLengthHeader::default()),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            correlator: None,
            tuple_space: None,
            context: tuplespace::DEFAULT_CONTEXT.to_string(),
            delivery_ttl: NO_EXPIRY,
            max_connections: None,
            listeners: Vec::new(),
            child_listeners: Vec::new(),
            span: None,
        }
    }

    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        settings.validate("server")?;

        let mut builder = Self::new()
            .bind(settings.bind.clone())
            .shared_header(frame_header(&settings.header)?)
            .max_frame_len(settings.max_frame_len)
            .buffer_strategy(BufferStrategy::new(settings.receive_buffer, settings.max_frame_len))
            .context(settings.tuple_space_context.clone())
            .delivery_ttl(settings.delivery_ttl().unwrap_or(NO_EXPIRY));

        if let Some(name) = &settings.name {
            builder = builder.name(name.clone());
        }
        if let Some(max) = settings.max_connections {
            builder = builder.max_connections(max);
        }
        Ok(builder)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Listen on `host:port` or `unix:/path` when started
    pub fn bind(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn acceptor(self, acceptor: impl Acceptor + 'static) -> Self {
        self.shared_acceptor(Arc::new(acceptor))
    }

    pub fn shared_acceptor(mut self, acceptor: Arc<dyn Acceptor>) -> Self {
        self.acceptor = Some(acceptor);
        self
    }

    /// Template cloned for every accepted connection
    pub fn pipeline(mut self, template: Pipeline<M>) -> Self {
        self.pipeline_factory = Some(Arc::new(move || template.clone()));
        self
    }

    pub fn pipeline_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Pipeline<M> + Send + Sync + 'static,
    {
        self.pipeline_factory = Some(Arc::new(factory));
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

    /// Correlator shared by every child
    pub fn correlator(self, correlator: impl Correlator<M> + 'static) -> Self {
        self.shared_correlator(Arc::new(correlator))
    }

    pub fn shared_correlator(mut self, correlator: Arc<dyn Correlator<M>>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    pub fn tuple_space(mut self, space: Arc<TupleSpace<Delivery<M>>>) -> Self {
        self.tuple_space = Some(space);
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn delivery_ttl(mut self, ttl: Duration) -> Self {
        self.delivery_ttl = ttl;
        self
    }

    /// Close connections accepted while `max` children are registered
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ServerListener<M>>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Listener attached to every child channel
    pub fn child_listener(mut self, listener: Arc<dyn ChannelListener<M>>) -> Self {
        self.child_listeners.push(listener);
        self
    }

    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Bind (unless an acceptor was supplied) and start accepting
    pub async fn start(self) -> Result<ServerChannel<M>> {
        if self.max_connections == Some(0) {
            return Err(ChannelError::out_of_range(
                "max_connections",
                "must be at least 1",
            ));
        }

        let acceptor = match (self.acceptor, self.endpoint.as_deref()) {
            (Some(acceptor), _) => acceptor,
            (None, Some(endpoint)) => bind(endpoint).await?,
            (None, None) => {
                return Err(ChannelError::not_configured(
                    "server has neither an endpoint nor an acceptor",
                ))
            }
        };

        let id = ChannelId::new();
        let span = self.span.unwrap_or_else(|| {
            info_span!("server", %id, name = self.name.as_deref().unwrap_or(""))
        });
        let tuple_space = self
            .tuple_space
            .unwrap_or_else(|| Arc::new(TupleSpace::with_name(format!("server-{id}"))));
        let pipeline_factory: PipelineFactory<M> = match self.pipeline_factory {
            Some(factory) => factory,
            None => Arc::new(Pipeline::new),
        };

        Ok(ServerChannel::start(
            ServerParts {
                id,
                name: self.name,
                span,
                pipeline_factory,
                buffer_strategy: self.buffer_strategy,
                header: self.header,
                max_frame_len: self.max_frame_len,
                correlator: self.correlator,
                tuple_space,
                context: self.context,
                delivery_ttl: self.delivery_ttl,
                max_connections: self.max_connections,
                listeners: self.listeners,
                child_listeners: self.child_listeners,
            },
            acceptor,
        ))
    }
}
