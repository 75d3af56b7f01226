//! Pipeline / Sink Chain
//!
//! An ordered list of stages that every outbound message, inbound frame and
//! channel event passes through. [`Pipeline::push`] prepends, so the most
//! recently pushed sink runs first on send and last on receive. The stage
//! closest to the transport (pushed first) is normally a
//! [`FormatterSink`](crate::sinks::FormatterSink).
//!
//! ## Receive passes
//!
//! Receive walks the chain back to front. A sink returning `Ok(false)` asks
//! for more bytes: the pass stops and the context remembers which sink to
//! resume from on the next read. A sink that clears the received message
//! consumes it, and the channel makes no user-visible delivery.

mod context;
mod event;

pub use context::{BufferStrategy, PipelineContext};
pub use event::ChannelEvent;

use crate::error::{ChannelError, Result};
use std::fmt;
use tracing::warn;

/// A pipeline stage
///
/// Every hook has a pass-through default, so a sink only implements the
/// directions it cares about.
pub trait Sink<M>: Send + Sync + fmt::Debug {
    /// Stage name used in errors and logs
    fn name(&self) -> &str;

    /// Outbound hook; may replace the message or set its correlation id
    fn send(&mut self, _ctx: &mut PipelineContext<M>) -> Result<()> {
        Ok(())
    }

    /// Inbound hook; `Ok(false)` means more bytes are needed
    fn receive(&mut self, _ctx: &mut PipelineContext<M>) -> Result<bool> {
        Ok(true)
    }

    /// Event hook; `Ok(false)` stops the broadcast from reaching earlier stages
    fn on_event(&mut self, _ctx: &mut PipelineContext<M>, _event: &ChannelEvent) -> Result<bool> {
        Ok(true)
    }

    /// Independent copy for a new connection
    fn clone_sink(&self) -> Box<dyn Sink<M>>;
}

/// Result of a receive pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// A sink needs more bytes; resume from the same stage on the next read
    Incomplete,
    /// A sink consumed the message
    Consumed,
    /// The message made it through every stage
    Complete,
}

/// Ordered chain of sinks plus the buffer strategy of its context
pub struct Pipeline<M> {
    sinks: Vec<Box<dyn Sink<M>>>,
    buffer_strategy: BufferStrategy,
}

impl<M> fmt::Debug for Pipeline<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("sinks", &self.sink_names())
            .field("buffer_strategy", &self.buffer_strategy)
            .finish()
    }
}

impl<M> Default for Pipeline<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for Pipeline<M> {
    /// Deep copy: every sink is cloned
    fn clone(&self) -> Self {
        Self {
            sinks: self.sinks.iter().map(|sink| sink.clone_sink()).collect(),
            buffer_strategy: self.buffer_strategy,
        }
    }
}

impl<M> Pipeline<M> {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            buffer_strategy: BufferStrategy::default(),
        }
    }

    /// Prepend a sink
    pub fn push(&mut self, sink: impl Sink<M> + 'static) {
        self.sinks.insert(0, Box::new(sink));
    }

    /// Builder-style [`Pipeline::push`]
    pub fn with(mut self, sink: impl Sink<M> + 'static) -> Self {
        self.push(sink);
        self
    }

    pub fn with_buffer_strategy(mut self, strategy: BufferStrategy) -> Self {
        self.buffer_strategy = strategy;
        self
    }

    pub fn set_buffer_strategy(&mut self, strategy: BufferStrategy) {
        self.buffer_strategy = strategy;
    }

    pub fn buffer_strategy(&self) -> &BufferStrategy {
        &self.buffer_strategy
    }

    /// Fresh context sized by this pipeline's buffer strategy
    pub fn new_context(&self) -> PipelineContext<M> {
        PipelineContext::new(&self.buffer_strategy)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Sink names in send order
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|sink| sink.name().to_string()).collect()
    }

    /// Run the outbound pass front to back; the first error aborts it
    pub fn send(&mut self, ctx: &mut PipelineContext<M>) -> Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.send(ctx)
                .map_err(|e| ChannelError::pipeline(sink.name(), e))?;
        }
        Ok(())
    }

    /// Run the inbound pass back to front, resuming where the last pass stopped
    ///
    /// On error the inbound half of `ctx` is reset so no partial state leaks
    /// into the next pass.
    pub fn receive(&mut self, ctx: &mut PipelineContext<M>) -> Result<PassOutcome> {
        let count = self.sinks.len();
        let start = ctx.receive_cursor.min(count);

        for position in start..count {
            let sink = &mut self.sinks[count - 1 - position];
            let had_message = ctx.received_message().is_some();
            match sink.receive(ctx) {
                Ok(true) => {
                    if had_message && ctx.received_message().is_none() {
                        ctx.receive_cursor = 0;
                        return Ok(PassOutcome::Consumed);
                    }
                }
                Ok(false) => {
                    ctx.receive_cursor = position;
                    return Ok(PassOutcome::Incomplete);
                }
                Err(e) => {
                    ctx.reset_receive();
                    return Err(ChannelError::pipeline(sink.name(), e));
                }
            }
        }

        ctx.receive_cursor = 0;
        if ctx.received_message().is_some() {
            Ok(PassOutcome::Complete)
        } else {
            Ok(PassOutcome::Consumed)
        }
    }

    /// Broadcast an event back to front
    ///
    /// Returns `Ok(false)` if a sink vetoed further propagation. With
    /// `ignore_errors` a failing sink is logged and the broadcast continues.
    pub fn process_event(
        &mut self,
        ctx: &mut PipelineContext<M>,
        event: &ChannelEvent,
        ignore_errors: bool,
    ) -> Result<bool> {
        for sink in self.sinks.iter_mut().rev() {
            match sink.on_event(ctx, event) {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(e) if ignore_errors => {
                    warn!(sink = sink.name(), %event, error = %e, "Sink failed handling event");
                }
                Err(e) => return Err(ChannelError::pipeline(sink.name(), e)),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Records every hook invocation; behaviour is scripted per test
    #[derive(Debug, Clone)]
    struct Recorder {
        name: String,
        journal: Journal,
        need_more_once: bool,
        consume: bool,
        veto: bool,
        fail_events: bool,
    }

    impl Recorder {
        fn new(name: &str, journal: &Journal) -> Self {
            Self {
                name: name.to_string(),
                journal: journal.clone(),
                need_more_once: false,
                consume: false,
                veto: false,
                fail_events: false,
            }
        }
    }

    impl Sink<String> for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn send(&mut self, ctx: &mut PipelineContext<String>) -> Result<()> {
            self.journal.lock().push(format!("send:{}", self.name));
            let next = format!("{}>{}", ctx.message_to_send().cloned().unwrap_or_default(), self.name);
            ctx.set_message_to_send(Some(next));
            Ok(())
        }

        fn receive(&mut self, ctx: &mut PipelineContext<String>) -> Result<bool> {
            self.journal.lock().push(format!("receive:{}", self.name));
            if self.need_more_once {
                self.need_more_once = false;
                return Ok(false);
            }
            if ctx.received_message().is_none() {
                ctx.set_received_message(Some(String::new()));
            }
            if self.consume {
                ctx.set_received_message(None);
            }
            Ok(true)
        }

        fn on_event(&mut self, _ctx: &mut PipelineContext<String>, event: &ChannelEvent) -> Result<bool> {
            self.journal.lock().push(format!("event:{}:{}", self.name, event));
            if self.fail_events {
                return Err(ChannelError::format("listener broke"));
            }
            Ok(!self.veto)
        }

        fn clone_sink(&self) -> Box<dyn Sink<String>> {
            Box::new(self.clone())
        }
    }

    fn entries(journal: &Journal) -> Vec<String> {
        std::mem::take(&mut *journal.lock())
    }

    #[test]
    fn test_push_prepends() {
        let journal = Journal::default();
        let mut pipeline = Pipeline::new()
            .with(Recorder::new("a", &journal))
            .with(Recorder::new("b", &journal));
        let mut ctx = pipeline.new_context();

        assert_eq!(pipeline.sink_names(), vec!["b", "a"]);

        ctx.begin_send("m".to_string(), None);
        pipeline.send(&mut ctx).unwrap();
        assert_eq!(ctx.message_to_send().unwrap(), "m>b>a");
        assert_eq!(entries(&journal), vec!["send:b", "send:a"]);

        assert_eq!(pipeline.receive(&mut ctx).unwrap(), PassOutcome::Complete);
        assert_eq!(entries(&journal), vec!["receive:a", "receive:b"]);
    }

    #[test]
    fn test_receive_resumes_from_cursor() {
        let journal = Journal::default();
        let mut waiting = Recorder::new("b", &journal);
        waiting.need_more_once = true;
        let mut pipeline = Pipeline::new()
            .with(Recorder::new("a", &journal))
            .with(waiting)
            .with(Recorder::new("c", &journal));
        let mut ctx = pipeline.new_context();

        assert_eq!(pipeline.receive(&mut ctx).unwrap(), PassOutcome::Incomplete);
        assert_eq!(entries(&journal), vec!["receive:a", "receive:b"]);

        assert_eq!(pipeline.receive(&mut ctx).unwrap(), PassOutcome::Complete);
        assert_eq!(entries(&journal), vec!["receive:b", "receive:c"]);
        assert_eq!(ctx.receive_cursor, 0);
    }

    #[test]
    fn test_consuming_sink_stops_propagation() {
        let journal = Journal::default();
        let mut filter = Recorder::new("filter", &journal);
        filter.consume = true;
        let mut pipeline = Pipeline::new()
            .with(Recorder::new("formatter", &journal))
            .with(filter)
            .with(Recorder::new("app", &journal));
        let mut ctx = pipeline.new_context();

        assert_eq!(pipeline.receive(&mut ctx).unwrap(), PassOutcome::Consumed);
        assert_eq!(entries(&journal), vec!["receive:formatter", "receive:filter"]);
    }

    #[test]
    fn test_event_veto_and_ignored_errors() {
        let journal = Journal::default();
        let mut veto = Recorder::new("veto", &journal);
        veto.veto = true;
        let mut failing = Recorder::new("failing", &journal);
        failing.fail_events = true;
        let mut pipeline = Pipeline::new()
            .with(Recorder::new("front", &journal))
            .with(veto)
            .with(failing);
        let mut ctx = pipeline.new_context();

        // Back to front: front, veto (stops), failing never reached
        let propagated = pipeline
            .process_event(&mut ctx, &ChannelEvent::Connected, false)
            .unwrap();
        assert!(!propagated);
        assert_eq!(entries(&journal), vec!["event:front:connected", "event:veto:connected"]);

        let mut pipeline = Pipeline::new()
            .with(Recorder::new("tail", &journal))
            .with(Recorder {
                fail_events: true,
                ..Recorder::new("failing", &journal)
            });
        assert!(pipeline
            .process_event(&mut ctx, &ChannelEvent::Disconnected, true)
            .unwrap());
        entries(&journal);

        let err = pipeline
            .process_event(&mut ctx, &ChannelEvent::Disconnected, false)
            .unwrap_err();
        assert!(matches!(err, ChannelError::Pipeline { ref stage, .. } if stage == "failing"));
    }

    #[test]
    fn test_clone_is_deep() {
        let journal = Journal::default();
        let mut waiting = Recorder::new("a", &journal);
        waiting.need_more_once = true;
        let template = Pipeline::new().with(waiting);

        let mut first = template.clone();
        let mut second = template.clone();
        let mut ctx = first.new_context();

        assert_eq!(first.receive(&mut ctx).unwrap(), PassOutcome::Incomplete);
        assert_eq!(first.receive(&mut ctx).unwrap(), PassOutcome::Complete);

        // The second clone still has its own one-shot "need more" flag
        let mut ctx = second.new_context();
        assert_eq!(second.receive(&mut ctx).unwrap(), PassOutcome::Incomplete);
    }

    #[test]
    fn test_receive_error_resets_context() {
        #[derive(Debug, Clone)]
        struct Broken;
        impl Sink<String> for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn receive(&mut self, _ctx: &mut PipelineContext<String>) -> Result<bool> {
                Err(ChannelError::format("garbage"))
            }
            fn clone_sink(&self) -> Box<dyn Sink<String>> {
                Box::new(self.clone())
            }
        }

        let mut pipeline = Pipeline::new().with(Broken);
        let mut ctx = pipeline.new_context();
        ctx.receive_buffer_mut().extend_from_slice(b"junk");

        let err = pipeline.receive(&mut ctx).unwrap_err();
        assert!(matches!(err, ChannelError::Pipeline { .. }));
        assert!(ctx.receive_buffer().is_empty());
    }
}
