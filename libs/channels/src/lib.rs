//! # Channels
//!
//! Framed, bidirectional message channels over stream transports.
//!
//! ## Architecture Role
//!
//! ```text
//! application ─► Channel ─► Pipeline (sinks) ─► frame header ─► TCP / Unix / duplex
//!      ▲            │
//!      │            ├─► pending requests (correlated responses, timeouts)
//!      │            ▼
//!      └──────── TupleSpace<Delivery>  (unmatched messages, completed requests)
//! ```
//!
//! - [`Channel`]: one connection at a time, optional reconnection with backoff,
//!   request/response correlation through a [`Correlator`]
//! - [`ServerChannel`]: accepts connections as child channels sharing a
//!   pipeline template, a correlator and a tuple space
//! - [`Pipeline`]: ordered [`Sink`]s run front to back on send and back to
//!   front on receive; formatter sinks turn messages into bytes and back
//! - [`FrameHeader`]: binary (1/2/4 bytes, either byte order), ASCII decimal
//!   or no length prefix
//!
//! ## Example
//!
//! ```no_run
//! use channels::sinks::{DelimitedFormatter, FormatterSink};
//! use channels::{Channel, Pipeline};
//! use std::time::Duration;
//!
//! # async fn example() -> channels::Result<()> {
//! let channel = Channel::<String>::builder()
//!     .pipeline(Pipeline::new().with(FormatterSink::new(DelimitedFormatter::default())))
//!     .correlator(|message: &String| message.split(':').next().map(str::to_string))
//!     .endpoint("127.0.0.1:7001")?
//!     .build();
//! channel.connect().await?;
//!
//! let request = channel.send_expecting_response("42:ping".into(), Duration::from_secs(1), false, None)?;
//! if request.wait_completion(None, false).await {
//!     println!("response: {:?}", request.response());
//! }
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod channel;
pub mod delivery;
pub mod error;
pub mod message;
pub mod operation;
pub mod pipeline;
pub mod request;
pub mod server;
pub mod settings;
pub mod sinks;
pub mod transport;

pub use address::{ChannelAddress, ChannelId, ParseAddressError};
pub use channel::{
    Channel, ChannelBuilder, ChannelListener, ChannelStatus, ServerListener, StatsSnapshot,
};
pub use delivery::{Delivery, ReceiveDescriptor};
pub use error::{ChannelError, Result, Severity};
pub use message::{Correlator, Message};
pub use operation::{RequestOperation, SendOperation};
pub use pipeline::{BufferStrategy, ChannelEvent, Pipeline, PipelineContext, Sink};
pub use request::{Request, RequestStatus};
pub use server::{PipelineFactory, ServerChannel, ServerChannelBuilder};
pub use transport::{
    AsciiLengthHeader, BinaryLengthHeader, Endianness, FrameHeader, NoHeader, ReconnectPolicy,
};
