use crate::error::Result;
use crate::pipeline::{ChannelEvent, PipelineContext, Sink};
use tracing::{info, warn};

/// Logs every channel event and lets it pass
#[derive(Debug, Clone)]
pub struct EventLogSink {
    name: String,
}

impl Default for EventLogSink {
    fn default() -> Self {
        Self::new("event-log")
    }
}

impl EventLogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl<M: 'static> Sink<M> for EventLogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&mut self, _ctx: &mut PipelineContext<M>, event: &ChannelEvent) -> Result<bool> {
        match event {
            ChannelEvent::ConnectionFailed(reason) => {
                warn!(sink = %self.name, %reason, "Channel event: connection failed")
            }
            other => info!(sink = %self.name, event = %other, "Channel event"),
        }
        Ok(true)
    }

    fn clone_sink(&self) -> Box<dyn Sink<M>> {
        Box::new(self.clone())
    }
}
