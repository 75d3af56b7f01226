use crate::error::Result;
use crate::pipeline::{PipelineContext, Sink};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type Predicate<M> = Arc<dyn Fn(&M) -> bool + Send + Sync>;

/// Consumes inbound messages matching a predicate
///
/// Consumed messages never reach the tuple space or the correlation table.
/// Typical use is swallowing protocol-level echo or network management
/// messages that the application should not see.
pub struct MessageFilterSink<M> {
    name: String,
    predicate: Predicate<M>,
    dropped: u64,
}

impl<M> MessageFilterSink<M> {
    pub fn new(name: impl Into<String>, predicate: impl Fn(&M) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            dropped: 0,
        }
    }

    /// Messages consumed by this instance
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl<M> Clone for MessageFilterSink<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            predicate: Arc::clone(&self.predicate),
            dropped: 0,
        }
    }
}

impl<M> fmt::Debug for MessageFilterSink<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageFilterSink")
            .field("name", &self.name)
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

impl<M: fmt::Debug + 'static> Sink<M> for MessageFilterSink<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&mut self, ctx: &mut PipelineContext<M>) -> Result<bool> {
        let matched = ctx.received_message().is_some_and(|m| (self.predicate)(m));
        if matched {
            let message = ctx.take_received_message();
            self.dropped += 1;
            debug!(sink = %self.name, ?message, "Inbound message consumed by filter");
        }
        Ok(true)
    }

    fn clone_sink(&self) -> Box<dyn Sink<M>> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PassOutcome, Pipeline};
    use crate::sinks::{FormatterSink, Utf8Formatter};

    #[test]
    fn test_matching_messages_are_consumed() {
        let mut pipeline = Pipeline::new()
            .with(FormatterSink::new(Utf8Formatter))
            .with(MessageFilterSink::new("echo-filter", |m: &String| m.starts_with("0800")));
        let mut ctx = pipeline.new_context();

        ctx.receive_buffer_mut().extend_from_slice(b"0800|ping");
        assert_eq!(pipeline.receive(&mut ctx).unwrap(), PassOutcome::Consumed);

        ctx.receive_buffer_mut().extend_from_slice(b"0200|buy");
        assert_eq!(pipeline.receive(&mut ctx).unwrap(), PassOutcome::Complete);
        assert_eq!(ctx.take_received_message().as_deref(), Some("0200|buy"));
    }
}
