//! Unix domain socket transport

use super::{Acceptor, BoxedStream, Connector};
use crate::error::{ChannelError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Connects to a socket file
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Connector for UnixConnector {
    async fn connect(&self) -> Result<BoxedStream> {
        let stream = UnixStream::connect(&self.path).await.map_err(|e| {
            ChannelError::connection(format!("Failed to connect to {:?}", self.path), e)
        })?;
        debug!(path = ?self.path, "Unix socket connection established");
        Ok(Box::new(stream))
    }

    fn endpoint(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

/// Listens on a socket file; the file is removed on drop
#[derive(Debug)]
pub struct UnixAcceptor {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixAcceptor {
    /// Bind, replacing a stale socket file and creating missing directories
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| ChannelError::connection("Failed to remove existing socket", e))?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ChannelError::connection("Failed to create socket directory", e))?;
        }

        let listener = UnixListener::bind(&path)
            .map_err(|e| ChannelError::connection("Failed to bind Unix socket", e))?;
        info!("Unix socket listening on: {:?}", path);
        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Acceptor for UnixAcceptor {
    async fn accept(&self) -> Result<(BoxedStream, String)> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| ChannelError::connection("Failed to accept Unix connection", e))?;
        debug!("Accepted Unix socket connection");
        Ok((Box::new(stream), format!("unix:{}", self.path.display())))
    }

    fn local_endpoint(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

impl Drop for UnixAcceptor {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove socket file {:?}: {}", self.path, e);
            }
        }
    }
}
