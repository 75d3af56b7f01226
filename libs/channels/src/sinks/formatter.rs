//! Formatter Boundary
//!
//! The field-level codec lives outside this crate. A [`Formatter`] turns a
//! message into bytes and back; [`FormatterSink`] adapts one into the stage
//! of the pipeline closest to the transport. Formatters never see frame
//! headers, only frame bodies.

use crate::error::{ChannelError, Result};
use crate::pipeline::{PipelineContext, Sink};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Output side of a formatter
pub struct FormatterContext<'a> {
    buffer: &'a mut BytesMut,
}

impl<'a> FormatterContext<'a> {
    pub fn new(buffer: &'a mut BytesMut) -> Self {
        Self { buffer }
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }

    pub fn put_u8(&mut self, byte: u8) {
        self.buffer.put_u8(byte);
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        self.buffer
    }
}

/// Input side of a formatter: the unparsed inbound bytes
pub struct ParserContext<'a> {
    buffer: &'a mut BytesMut,
    expected: &'a mut usize,
}

impl<'a> ParserContext<'a> {
    pub fn new(buffer: &'a mut BytesMut, expected: &'a mut usize) -> Self {
        Self { buffer, expected }
    }

    pub fn remaining(&self) -> &[u8] {
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Remove and return the first `count` bytes
    pub fn consume(&mut self, count: usize) -> Result<Bytes> {
        if count > self.buffer.len() {
            return Err(ChannelError::format(format!(
                "cannot consume {count} bytes, only {} buffered",
                self.buffer.len()
            )));
        }
        Ok(self.buffer.split_to(count).freeze())
    }

    pub fn consume_all(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Tell the channel how many more bytes the next parse needs
    pub fn expect_more(&mut self, count: usize) {
        *self.expected = count;
    }
}

/// Message codec consumed by [`FormatterSink`]
pub trait Formatter<M>: Clone + Send + Sync + fmt::Debug + 'static {
    fn format(&mut self, message: &M, ctx: &mut FormatterContext<'_>) -> Result<()>;

    /// Parse one message; `Ok(None)` means the buffered bytes are not enough yet
    fn parse(&mut self, ctx: &mut ParserContext<'_>) -> Result<Option<M>>;
}

/// Pipeline stage wrapping a [`Formatter`]
#[derive(Debug, Clone)]
pub struct FormatterSink<F> {
    name: String,
    formatter: F,
}

impl<F> FormatterSink<F> {
    pub fn new(formatter: F) -> Self {
        Self {
            name: "formatter".to_string(),
            formatter,
        }
    }

    pub fn named(name: impl Into<String>, formatter: F) -> Self {
        Self {
            name: name.into(),
            formatter,
        }
    }
}

impl<M, F> Sink<M> for FormatterSink<F>
where
    M: 'static,
    F: Formatter<M>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, ctx: &mut PipelineContext<M>) -> Result<()> {
        let (message, buffer) = ctx.send_parts();
        let message = message.ok_or_else(|| ChannelError::format("no message to format"))?;
        buffer.clear();
        self.formatter.format(message, &mut FormatterContext::new(buffer))
    }

    fn receive(&mut self, ctx: &mut PipelineContext<M>) -> Result<bool> {
        let (buffer, expected) = ctx.receive_parts();
        if buffer.is_empty() {
            return Ok(false);
        }
        let parsed = self.formatter.parse(&mut ParserContext::new(buffer, expected))?;
        match parsed {
            Some(message) => {
                ctx.set_expected_bytes(0);
                ctx.set_received_message(Some(message));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clone_sink(&self) -> Box<dyn Sink<M>> {
        Box::new(self.clone())
    }
}

/// Each frame body is one opaque `Bytes` message
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesFormatter;

impl Formatter<Bytes> for BytesFormatter {
    fn format(&mut self, message: &Bytes, ctx: &mut FormatterContext<'_>) -> Result<()> {
        ctx.put_slice(message);
        Ok(())
    }

    fn parse(&mut self, ctx: &mut ParserContext<'_>) -> Result<Option<Bytes>> {
        if ctx.is_empty() {
            return Ok(None);
        }
        Ok(Some(ctx.consume_all()))
    }
}

/// Each frame body is one UTF-8 string
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Formatter;

impl Formatter<String> for Utf8Formatter {
    fn format(&mut self, message: &String, ctx: &mut FormatterContext<'_>) -> Result<()> {
        ctx.put_slice(message.as_bytes());
        Ok(())
    }

    fn parse(&mut self, ctx: &mut ParserContext<'_>) -> Result<Option<String>> {
        if ctx.is_empty() {
            return Ok(None);
        }
        let body = ctx.consume_all();
        String::from_utf8(body.to_vec())
            .map(Some)
            .map_err(|e| ChannelError::format(format!("frame is not valid UTF-8: {e}")))
    }
}

/// UTF-8 text terminated by a delimiter byte, for header-less streams
#[derive(Debug, Clone, Copy)]
pub struct DelimitedFormatter {
    delimiter: u8,
}

impl Default for DelimitedFormatter {
    fn default() -> Self {
        Self::new(b'\n')
    }
}

impl DelimitedFormatter {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl Formatter<String> for DelimitedFormatter {
    fn format(&mut self, message: &String, ctx: &mut FormatterContext<'_>) -> Result<()> {
        if message.as_bytes().contains(&self.delimiter) {
            return Err(ChannelError::format(format!(
                "message contains the delimiter byte 0x{:02x}",
                self.delimiter
            )));
        }
        ctx.put_slice(message.as_bytes());
        ctx.put_u8(self.delimiter);
        Ok(())
    }

    fn parse(&mut self, ctx: &mut ParserContext<'_>) -> Result<Option<String>> {
        let Some(end) = ctx.remaining().iter().position(|b| *b == self.delimiter) else {
            ctx.expect_more(1);
            return Ok(None);
        };
        let line = ctx.consume(end + 1)?;
        String::from_utf8(line[..end].to_vec())
            .map(Some)
            .map_err(|e| ChannelError::format(format!("line is not valid UTF-8: {e}")))
    }
}
