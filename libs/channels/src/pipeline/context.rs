//! Per-channel scratch state threaded through every pipeline pass
//!
//! The send half and the receive half are independent: a send pass only
//! touches the outbound fields, a receive pass only the inbound ones.

use crate::error::{ChannelError, Result};
use bytes::BytesMut;

/// Receive-buffer allocation and growth policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStrategy {
    pub initial_capacity: usize,
    /// Largest amount of unparsed data the buffer may hold
    pub max_capacity: usize,
}

impl Default for BufferStrategy {
    fn default() -> Self {
        Self {
            initial_capacity: 64 * 1024,      // 64KB
            max_capacity: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl BufferStrategy {
    pub fn new(initial_capacity: usize, max_capacity: usize) -> Self {
        Self {
            initial_capacity: initial_capacity.min(max_capacity),
            max_capacity,
        }
    }

    pub fn allocate(&self) -> BytesMut {
        BytesMut::with_capacity(self.initial_capacity)
    }

    /// Make room for more data after a pass reported "need more bytes"
    ///
    /// Capacity doubles, or grows to fit `expected` extra bytes if that is
    /// larger. Fails once the buffered data already reaches the maximum.
    pub fn grow(&self, buffer: &mut BytesMut, expected: usize) -> Result<()> {
        if buffer.len() >= self.max_capacity {
            return Err(ChannelError::FrameTooLarge {
                length: buffer.len(),
                max: self.max_capacity,
            });
        }
        let doubled = buffer.capacity().saturating_mul(2).max(self.initial_capacity);
        let target = doubled
            .max(buffer.len().saturating_add(expected))
            .min(self.max_capacity);
        if target > buffer.capacity() {
            buffer.reserve(target - buffer.len());
        }
        Ok(())
    }
}

/// Mutable state shared by all sinks of one channel's pipeline
#[derive(Debug)]
pub struct PipelineContext<M> {
    message_to_send: Option<M>,
    send_correlation_id: Option<String>,
    send_buffer: BytesMut,

    received_message: Option<M>,
    receive_correlation_id: Option<String>,
    receive_buffer: BytesMut,
    expected_bytes: usize,
    /// Number of sinks (counted from the back) that completed in the current receive pass
    pub(crate) receive_cursor: usize,
}

impl<M> PipelineContext<M> {
    pub fn new(strategy: &BufferStrategy) -> Self {
        Self {
            message_to_send: None,
            send_correlation_id: None,
            send_buffer: BytesMut::new(),
            received_message: None,
            receive_correlation_id: None,
            receive_buffer: strategy.allocate(),
            expected_bytes: 0,
            receive_cursor: 0,
        }
    }

    // Outbound

    pub fn message_to_send(&self) -> Option<&M> {
        self.message_to_send.as_ref()
    }

    pub fn set_message_to_send(&mut self, message: Option<M>) {
        self.message_to_send = message;
    }

    pub fn send_correlation_id(&self) -> Option<&str> {
        self.send_correlation_id.as_deref()
    }

    pub fn set_send_correlation_id(&mut self, key: Option<String>) {
        self.send_correlation_id = key;
    }

    /// Encoded bytes of the outbound frame body
    pub fn send_buffer(&self) -> &BytesMut {
        &self.send_buffer
    }

    pub fn send_buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.send_buffer
    }

    /// Message and output buffer borrowed together, for formatters
    pub fn send_parts(&mut self) -> (Option<&M>, &mut BytesMut) {
        (self.message_to_send.as_ref(), &mut self.send_buffer)
    }

    pub(crate) fn begin_send(&mut self, message: M, key: Option<String>) {
        self.message_to_send = Some(message);
        self.send_correlation_id = key;
        self.send_buffer.clear();
    }

    pub(crate) fn finish_send(&mut self) -> BytesMut {
        self.message_to_send = None;
        self.send_correlation_id = None;
        self.send_buffer.split()
    }

    // Inbound

    pub fn received_message(&self) -> Option<&M> {
        self.received_message.as_ref()
    }

    /// Setting `None` mid-chain marks the message as fully consumed
    pub fn set_received_message(&mut self, message: Option<M>) {
        self.received_message = message;
    }

    pub fn take_received_message(&mut self) -> Option<M> {
        self.received_message.take()
    }

    pub fn receive_correlation_id(&self) -> Option<&str> {
        self.receive_correlation_id.as_deref()
    }

    pub fn set_receive_correlation_id(&mut self, key: Option<String>) {
        self.receive_correlation_id = key;
    }

    pub(crate) fn take_receive_correlation_id(&mut self) -> Option<String> {
        self.receive_correlation_id.take()
    }

    /// Unparsed inbound bytes
    pub fn receive_buffer(&self) -> &BytesMut {
        &self.receive_buffer
    }

    pub fn receive_buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.receive_buffer
    }

    /// Hint of how many more bytes the next read should bring
    pub fn expected_bytes(&self) -> usize {
        self.expected_bytes
    }

    pub fn set_expected_bytes(&mut self, expected: usize) {
        self.expected_bytes = expected;
    }

    /// Borrow the inbound buffer and the expected-bytes hint together, for parsers
    pub fn receive_parts(&mut self) -> (&mut BytesMut, &mut usize) {
        (&mut self.receive_buffer, &mut self.expected_bytes)
    }

    /// Forget everything about the current inbound message, buffered bytes included
    pub fn reset_receive(&mut self) {
        self.received_message = None;
        self.receive_correlation_id = None;
        self.receive_buffer.clear();
        self.expected_bytes = 0;
        self.receive_cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grow_doubles_up_to_max() {
        let strategy = BufferStrategy::new(16, 64);
        let mut buffer = strategy.allocate();
        buffer.extend_from_slice(&[0u8; 16]);

        strategy.grow(&mut buffer, 0).unwrap();
        assert!(buffer.capacity() >= 32);

        buffer.extend_from_slice(&[0u8; 48]);
        let err = strategy.grow(&mut buffer, 0).unwrap_err();
        assert!(matches!(err, ChannelError::FrameTooLarge { length: 64, max: 64 }));
    }

    #[test]
    fn test_grow_honours_expected_hint() {
        let strategy = BufferStrategy::new(8, 1024);
        let mut buffer = strategy.allocate();
        buffer.extend_from_slice(&[1u8; 8]);

        strategy.grow(&mut buffer, 500).unwrap();
        assert!(buffer.capacity() >= 508);
    }

    #[test]
    fn test_reset_receive_clears_inbound_only() {
        let mut ctx: PipelineContext<String> = PipelineContext::new(&BufferStrategy::default());
        ctx.begin_send("out".to_string(), Some("1".to_string()));
        ctx.receive_buffer_mut().extend_from_slice(b"partial");
        ctx.set_received_message(Some("in".to_string()));
        ctx.receive_cursor = 2;

        ctx.reset_receive();
        assert!(ctx.receive_buffer().is_empty());
        assert!(ctx.received_message().is_none());
        assert_eq!(ctx.receive_cursor, 0);
        assert_eq!(ctx.message_to_send().map(String::as_str), Some("out"));
        assert_eq!(ctx.send_correlation_id(), Some("1"));
    }
}
