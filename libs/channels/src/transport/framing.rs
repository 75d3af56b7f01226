//! Stream Framing
//!
//! Turns a byte stream into discrete frames. The length header is pluggable:
//! binary (1, 2 or 4 bytes, either byte order), ASCII decimal digits, or no
//! header at all, in which case every chunk read from the socket is handed to
//! the pipeline and the formatter finds message boundaries itself.
//!
//! The header counts body bytes only. A decoded length of zero is a
//! heartbeat; a length above the configured maximum is fatal to the
//! connection.

use crate::error::{ChannelError, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

/// Length header codec
pub trait FrameHeader: Send + Sync + fmt::Debug {
    /// Header size in bytes; zero means frames have no header
    fn header_len(&self) -> usize;

    /// Decode a body length from exactly `header_len()` bytes
    fn decode(&self, header: &[u8]) -> Result<usize>;

    /// Append the header for a body of `body_len` bytes
    fn encode(&self, body_len: usize, dst: &mut BytesMut) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// Unsigned binary length of 1, 2 or 4 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryLengthHeader {
    width: usize,
    endianness: Endianness,
}

impl Default for BinaryLengthHeader {
    /// Four bytes, network byte order
    fn default() -> Self {
        Self {
            width: 4,
            endianness: Endianness::Big,
        }
    }
}

impl BinaryLengthHeader {
    pub fn new(width: usize, endianness: Endianness) -> Result<Self> {
        if !matches!(width, 1 | 2 | 4) {
            return Err(ChannelError::out_of_range(
                "width",
                format!("binary headers are 1, 2 or 4 bytes wide, got {width}"),
            ));
        }
        Ok(Self { width, endianness })
    }

    /// Largest body length this header can express
    pub fn max_length(&self) -> usize {
        match self.width {
            1 => u8::MAX as usize,
            2 => u16::MAX as usize,
            _ => u32::MAX as usize,
        }
    }
}

impl FrameHeader for BinaryLengthHeader {
    fn header_len(&self) -> usize {
        self.width
    }

    fn decode(&self, header: &[u8]) -> Result<usize> {
        if header.len() != self.width {
            return Err(ChannelError::framing(format!(
                "expected {} header bytes, got {}",
                self.width,
                header.len()
            )));
        }
        let length = match (self.width, self.endianness) {
            (1, _) => header[0] as usize,
            (2, Endianness::Big) => BigEndian::read_u16(header) as usize,
            (2, Endianness::Little) => LittleEndian::read_u16(header) as usize,
            (_, Endianness::Big) => BigEndian::read_u32(header) as usize,
            (_, Endianness::Little) => LittleEndian::read_u32(header) as usize,
        };
        Ok(length)
    }

    fn encode(&self, body_len: usize, dst: &mut BytesMut) -> Result<()> {
        if body_len > self.max_length() {
            return Err(ChannelError::FrameTooLarge {
                length: body_len,
                max: self.max_length(),
            });
        }
        let mut raw = [0u8; 4];
        match (self.width, self.endianness) {
            (1, _) => raw[0] = body_len as u8,
            (2, Endianness::Big) => BigEndian::write_u16(&mut raw[..2], body_len as u16),
            (2, Endianness::Little) => LittleEndian::write_u16(&mut raw[..2], body_len as u16),
            (_, Endianness::Big) => BigEndian::write_u32(&mut raw, body_len as u32),
            (_, Endianness::Little) => LittleEndian::write_u32(&mut raw, body_len as u32),
        }
        dst.put_slice(&raw[..self.width]);
        Ok(())
    }
}

/// Body length as a fixed number of ASCII decimal digits, zero padded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsciiLengthHeader {
    digits: usize,
}

impl AsciiLengthHeader {
    pub fn new(digits: usize) -> Result<Self> {
        if !(1..=9).contains(&digits) {
            return Err(ChannelError::out_of_range(
                "digits",
                format!("ascii headers have 1 to 9 digits, got {digits}"),
            ));
        }
        Ok(Self { digits })
    }

    pub fn max_length(&self) -> usize {
        10usize.pow(self.digits as u32) - 1
    }
}

impl FrameHeader for AsciiLengthHeader {
    fn header_len(&self) -> usize {
        self.digits
    }

    fn decode(&self, header: &[u8]) -> Result<usize> {
        if header.len() != self.digits || !header.iter().all(u8::is_ascii_digit) {
            return Err(ChannelError::framing(format!(
                "invalid ascii length header {:?}",
                String::from_utf8_lossy(header)
            )));
        }
        Ok(header
            .iter()
            .fold(0usize, |acc, digit| acc * 10 + (digit - b'0') as usize))
    }

    fn encode(&self, body_len: usize, dst: &mut BytesMut) -> Result<()> {
        if body_len > self.max_length() {
            return Err(ChannelError::FrameTooLarge {
                length: body_len,
                max: self.max_length(),
            });
        }
        dst.put_slice(format!("{:0width$}", body_len, width = self.digits).as_bytes());
        Ok(())
    }
}

/// No header: the formatter delimits messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoHeader;

impl FrameHeader for NoHeader {
    fn header_len(&self) -> usize {
        0
    }

    fn decode(&self, _header: &[u8]) -> Result<usize> {
        Err(ChannelError::framing("header-less frames carry no length"))
    }

    fn encode(&self, _body_len: usize, _dst: &mut BytesMut) -> Result<()> {
        Ok(())
    }
}

/// One unit produced by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Body(Bytes),
    /// Zero-length frame
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    ExpectingLength,
    ExpectingBody(usize),
}

/// Incremental frame reassembly over a growable buffer
#[derive(Debug)]
pub struct FrameDecoder {
    header: Arc<dyn FrameHeader>,
    max_frame_len: usize,
    buffer: BytesMut,
    state: DecodeState,
}

impl FrameDecoder {
    pub fn new(header: Arc<dyn FrameHeader>, max_frame_len: usize, initial_capacity: usize) -> Self {
        Self {
            header,
            max_frame_len,
            buffer: BytesMut::with_capacity(initial_capacity),
            state: DecodeState::ExpectingLength,
        }
    }

    /// Buffer the transport reads into
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Feed bytes directly (used by tests and in-memory transports)
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet returned as a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete frame, if any
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        let header_len = self.header.header_len();
        if header_len == 0 {
            if self.buffer.is_empty() {
                return Ok(None);
            }
            return Ok(Some(Frame::Body(self.buffer.split().freeze())));
        }

        if self.state == DecodeState::ExpectingLength {
            if self.buffer.len() < header_len {
                return Ok(None);
            }
            let length = self.header.decode(&self.buffer[..header_len])?;
            if length > self.max_frame_len {
                return Err(ChannelError::FrameTooLarge {
                    length,
                    max: self.max_frame_len,
                });
            }
            self.buffer.advance(header_len);
            if length == 0 {
                return Ok(Some(Frame::Heartbeat));
            }
            if self.buffer.capacity() < length {
                self.buffer.reserve(length - self.buffer.len());
            }
            self.state = DecodeState::ExpectingBody(length);
        }

        match self.state {
            DecodeState::ExpectingBody(length) if self.buffer.len() >= length => {
                self.state = DecodeState::ExpectingLength;
                Ok(Some(Frame::Body(self.buffer.split_to(length).freeze())))
            }
            _ => Ok(None),
        }
    }
}

/// Header plus body, ready for the wire
pub fn encode_frame(header: &dyn FrameHeader, body: &[u8]) -> Result<Bytes> {
    let mut frame = BytesMut::with_capacity(header.header_len() + body.len());
    header.encode(body.len(), &mut frame)?;
    frame.put_slice(body);
    Ok(frame.freeze())
}
