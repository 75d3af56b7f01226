//! Transport Layer
//!
//! Pluggable stream transports. A [`Connector`] opens client connections and
//! an [`Acceptor`] yields server-side connections; both hand back a boxed
//! [`AsyncStream`], so anything readable and writable (TCP, Unix sockets,
//! in-memory duplex pipes) can carry a channel.

use crate::error::{ChannelError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod framing;
pub(crate) mod link;
pub mod reconnect;
pub mod tcp;
#[cfg(unix)]
pub mod unix;

pub use framing::{
    encode_frame, AsciiLengthHeader, BinaryLengthHeader, Endianness, Frame, FrameDecoder,
    FrameHeader, NoHeader,
};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use tcp::{TcpAcceptor, TcpConnector};
#[cfg(unix)]
pub use unix::{UnixAcceptor, UnixConnector};

/// Byte stream a channel can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens client connections
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    async fn connect(&self) -> Result<BoxedStream>;

    /// Human-readable remote endpoint
    fn endpoint(&self) -> String;
}

/// Yields accepted server-side connections
#[async_trait]
pub trait Acceptor: Send + Sync + std::fmt::Debug {
    /// Wait for the next connection; returns the stream and a peer description
    async fn accept(&self) -> Result<(BoxedStream, String)>;

    /// Human-readable local endpoint (with the real port if bound to port 0)
    fn local_endpoint(&self) -> String;
}

const UNIX_SCHEME: &str = "unix:";

/// Build a connector for `host:port` or `unix:/path/to.sock`
pub fn connector_for(endpoint: &str) -> Result<Arc<dyn Connector>> {
    if endpoint.is_empty() {
        return Err(ChannelError::invalid_argument("endpoint", "endpoint cannot be empty"));
    }
    match endpoint.strip_prefix(UNIX_SCHEME) {
        #[cfg(unix)]
        Some(path) => Ok(Arc::new(UnixConnector::new(path))),
        #[cfg(not(unix))]
        Some(_) => Err(ChannelError::not_configured(
            "unix domain sockets are not supported on this platform",
        )),
        None => Ok(Arc::new(TcpConnector::new(endpoint))),
    }
}

/// Bind an acceptor for `host:port` or `unix:/path/to.sock`
pub async fn bind(endpoint: &str) -> Result<Arc<dyn Acceptor>> {
    if endpoint.is_empty() {
        return Err(ChannelError::invalid_argument("endpoint", "endpoint cannot be empty"));
    }
    match endpoint.strip_prefix(UNIX_SCHEME) {
        #[cfg(unix)]
        Some(path) => Ok(Arc::new(UnixAcceptor::bind(path)?)),
        #[cfg(not(unix))]
        Some(_) => Err(ChannelError::not_configured(
            "unix domain sockets are not supported on this platform",
        )),
        None => Ok(Arc::new(TcpAcceptor::bind(endpoint).await?)),
    }
}
