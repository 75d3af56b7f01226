//! Connection I/O Tasks
//!
//! A connected channel runs one reader task and one writer task over the two
//! halves of its stream. The reader reassembles frames and reports them;
//! the writer drains an unbounded queue in order, so frames are written in
//! the order they were queued. Both tasks stop on the shutdown signal, and
//! whichever side fails first reports the cause once.

use super::framing::{Frame, FrameDecoder};
use super::BoxedStream;
use crate::error::ChannelError;
use crate::operation::SendOperation;
use bytes::Bytes;
use std::sync::Weak;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, Instrument, Span};

/// Callbacks from the I/O tasks to the owning channel
pub(crate) trait LinkEvents: Send + Sync {
    fn on_frame(&self, generation: u64, frame: Frame);

    fn on_frame_written(&self, generation: u64, bytes: usize);

    /// The connection failed or the peer closed it
    fn on_link_closed(&self, generation: u64, cause: ChannelError);
}

/// Encoded frame waiting for the writer task
pub(crate) struct Outbound {
    pub frame: Bytes,
    /// Completed once the frame is written; skipped if already cancelled
    pub operation: Option<SendOperation>,
    pub on_written: Option<Box<dyn FnOnce() + Send>>,
}

/// Handle to a live connection's I/O tasks
#[derive(Debug)]
pub(crate) struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: watch::Sender<bool>,
}

impl Link {
    pub(crate) fn spawn(
        stream: BoxedStream,
        generation: u64,
        decoder: FrameDecoder,
        events: Weak<dyn LinkEvents>,
        span: Span,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, queue) = mpsc::unbounded_channel();
        let (shutdown, stop) = watch::channel(false);

        tokio::spawn(
            read_loop(reader, decoder, generation, events.clone(), stop.clone()).instrument(span.clone()),
        );
        tokio::spawn(write_loop(writer, queue, generation, events, stop).instrument(span));

        Self {
            generation,
            outbound,
            shutdown,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a frame; hands it back if the writer has already stopped
    pub(crate) fn enqueue(&self, item: Outbound) -> Result<(), Outbound> {
        self.outbound.send(item).map_err(|rejected| rejected.0)
    }

    /// Signal both tasks to stop; idempotent
    pub(crate) fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn read_loop(
    mut reader: ReadHalf<BoxedStream>,
    mut decoder: FrameDecoder,
    generation: u64,
    events: Weak<dyn LinkEvents>,
    mut stop: watch::Receiver<bool>,
) {
    let cause = 'read: loop {
        loop {
            match decoder.decode() {
                Ok(Some(frame)) => {
                    let Some(events) = events.upgrade() else {
                        return;
                    };
                    events.on_frame(generation, frame);
                }
                Ok(None) => break,
                Err(e) => break 'read e,
            }
        }

        tokio::select! {
            biased;
            _ = stop.changed() => {
                trace!(generation, "Reader stopped");
                return;
            }
            read = reader.read_buf(decoder.buffer_mut()) => match read {
                Ok(0) => break 'read ChannelError::peer_closed(),
                Ok(n) => trace!(generation, bytes = n, "Read from stream"),
                Err(e) => break 'read ChannelError::connection("Read failed", e),
            }
        }
    };

    if let Some(events) = events.upgrade() {
        events.on_link_closed(generation, cause);
    }
}

async fn write_loop(
    mut writer: WriteHalf<BoxedStream>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    generation: u64,
    events: Weak<dyn LinkEvents>,
    mut stop: watch::Receiver<bool>,
) {
    let failure = 'write: loop {
        let item = tokio::select! {
            biased;
            _ = stop.changed() => break 'write None,
            item = queue.recv() => match item {
                Some(item) => item,
                None => break 'write None,
            },
        };

        if item.operation.as_ref().is_some_and(SendOperation::is_completed) {
            trace!(generation, "Skipping frame cancelled before transmission");
            continue;
        }

        let written = tokio::select! {
            biased;
            _ = stop.changed() => {
                fail_unsent(item, "channel disconnected before transmission");
                break 'write None;
            }
            result = write_frame(&mut writer, &item.frame) => result,
        };

        match written {
            Ok(()) => {
                let bytes = item.frame.len();
                if let Some(operation) = item.operation {
                    operation.complete_success();
                }
                if let Some(on_written) = item.on_written {
                    on_written();
                }
                if let Some(events) = events.upgrade() {
                    events.on_frame_written(generation, bytes);
                }
            }
            Err(e) => {
                if let Some(operation) = item.operation {
                    operation.complete_failure(
                        format!("write failed: {e}"),
                        Some(ChannelError::Connection {
                            message: e.to_string(),
                            kind: e.kind(),
                            source: None,
                        }),
                    );
                }
                break 'write Some(ChannelError::connection("Write failed", e));
            }
        }
    };

    queue.close();
    let mut abandoned = 0usize;
    while let Ok(item) = queue.try_recv() {
        fail_unsent(item, "channel disconnected before transmission");
        abandoned += 1;
    }
    if abandoned > 0 {
        debug!(generation, abandoned, "Queued frames dropped on disconnect");
    }

    if let Err(e) = writer.shutdown().await {
        trace!(generation, error = %e, "Stream shutdown failed");
    }

    if let Some(cause) = failure {
        if let Some(events) = events.upgrade() {
            events.on_link_closed(generation, cause);
        }
    }
}

async fn write_frame(writer: &mut WriteHalf<BoxedStream>, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

fn fail_unsent(item: Outbound, message: &str) {
    if let Some(operation) = item.operation {
        operation.complete_failure(message, Some(ChannelError::NotConnected));
    }
}
