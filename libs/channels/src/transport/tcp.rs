//! TCP transport

use super::{Acceptor, BoxedStream, Connector};
use crate::error::{ChannelError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Connects to `host:port`
#[derive(Debug, Clone)]
pub struct TcpConnector {
    remote: String,
}

impl TcpConnector {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<BoxedStream> {
        let stream = TcpStream::connect(self.remote.as_str())
            .await
            .map_err(|e| ChannelError::connection(format!("Failed to connect to {}", self.remote), e))?;
        // Disable Nagle for request/response traffic
        stream
            .set_nodelay(true)
            .map_err(|e| ChannelError::connection("Failed to set TCP_NODELAY", e))?;
        debug!(remote = %self.remote, "TCP connection established");
        Ok(Box::new(stream))
    }

    fn endpoint(&self) -> String {
        self.remote.clone()
    }
}

/// Listens on a TCP socket
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpAcceptor {
    pub async fn bind(endpoint: &str) -> Result<Self> {
        let listener = TcpListener::bind(endpoint)
            .await
            .map_err(|e| ChannelError::connection(format!("Failed to bind {endpoint}"), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ChannelError::connection("Failed to read local address", e))?;
        debug!(%local_addr, "TCP listener bound");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&self) -> Result<(BoxedStream, String)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| ChannelError::connection("Failed to accept TCP connection", e))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Could not set TCP_NODELAY on accepted stream");
        }
        Ok((Box::new(stream), peer.to_string()))
    }

    fn local_endpoint(&self) -> String {
        self.local_addr.to_string()
    }
}
