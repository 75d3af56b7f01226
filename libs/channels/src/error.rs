//! Channel Error Types
//!
//! Errors are grouped the way callers react to them: configuration errors
//! never touch the network, transport errors tear the connection down, and
//! pipeline errors abort a single send or receive pass.

use std::io;
use thiserror::Error;
use tracing::{error, info, warn};

/// Main channel error type
#[derive(Error, Debug)]
pub enum ChannelError {
    /// A required argument was missing or empty
    #[error("Invalid argument '{name}': {message}")]
    InvalidArgument { name: &'static str, message: String },

    /// A numeric argument was outside its accepted range
    #[error("Argument '{name}' out of range: {message}")]
    OutOfRange { name: &'static str, message: String },

    /// The channel lacks a collaborator the operation depends on
    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Channel is closed")]
    Closed,

    #[error("Channel is not connected")]
    NotConnected,

    /// Socket-level failure; `kind` drives log severity and reconnection
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        kind: io::ErrorKind,
        #[source]
        source: Option<io::Error>,
    },

    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed header or frame
    #[error("Framing error: {0}")]
    Framing(String),

    /// Declared frame length above the configured maximum; fatal to the connection
    #[error("Frame of {length} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { length: usize, max: usize },

    /// A formatter could not encode or decode a message
    #[error("Format error: {0}")]
    Format(String),

    /// A pipeline stage failed; the pass was aborted
    #[error("Pipeline stage '{stage}' failed: {source}")]
    Pipeline {
        stage: String,
        #[source]
        source: Box<ChannelError>,
    },

    #[error("Tuple space error: {0}")]
    TupleSpace(#[from] tuplespace::TupleSpaceError),

    #[error("Configuration error: {0}")]
    Config(#[from] link_config::ConfigError),
}

/// Result type alias for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// How loudly an error deserves to be logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Expected during normal operation (peer closed or reset)
    Info,
    /// Environmental trouble (timeouts, refused connections)
    Warning,
    Error,
}

impl ChannelError {
    pub fn invalid_argument(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            message: message.into(),
        }
    }

    pub fn out_of_range(name: &'static str, message: impl Into<String>) -> Self {
        Self::OutOfRange {
            name,
            message: message.into(),
        }
    }

    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::NotConfigured(message.into())
    }

    /// Create a connection error from an I/O error
    pub fn connection(message: impl Into<String>, source: io::Error) -> Self {
        Self::Connection {
            message: message.into(),
            kind: source.kind(),
            source: Some(source),
        }
    }

    /// The peer closed the stream
    pub fn peer_closed() -> Self {
        Self::Connection {
            message: "connection closed by peer".to_string(),
            kind: io::ErrorKind::UnexpectedEof,
            source: None,
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing(message.into())
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// Wrap an error raised by a pipeline stage
    pub fn pipeline(stage: impl Into<String>, source: ChannelError) -> Self {
        Self::Pipeline {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Errors that end the current connection
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::Framing(_)
                | Self::FrameTooLarge { .. }
        )
    }

    /// Classify by cause: peer reset = info, timeout/refused = warning, other = error
    pub fn severity(&self) -> Severity {
        match self {
            Self::Connection { kind, .. } => match kind {
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof => Severity::Info,
                io::ErrorKind::TimedOut
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::NotConnected
                | io::ErrorKind::AddrNotAvailable => Severity::Warning,
                _ => Severity::Error,
            },
            Self::Timeout { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Log at the level matching [`ChannelError::severity`]
    pub fn log(&self, context: &str) {
        match self.severity() {
            Severity::Info => info!(error = %self, "{context}"),
            Severity::Warning => warn!(error = %self, "{context}"),
            Severity::Error => error!(error = %self, "{context}"),
        }
    }
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        Self::connection("I/O failure", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_by_cause() {
        let reset = ChannelError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(reset.severity(), Severity::Info);
        assert_eq!(ChannelError::peer_closed().severity(), Severity::Info);

        let refused = ChannelError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(refused.severity(), Severity::Warning);
        assert_eq!(ChannelError::timeout("connect", 10).severity(), Severity::Warning);

        let other = ChannelError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(other.severity(), Severity::Error);
        assert_eq!(
            ChannelError::FrameTooLarge { length: 10, max: 5 }.severity(),
            Severity::Error
        );
    }

    #[test]
    fn test_transport_classification() {
        assert!(ChannelError::peer_closed().is_transport_error());
        assert!(ChannelError::FrameTooLarge { length: 2, max: 1 }.is_transport_error());
        assert!(!ChannelError::NotConnected.is_transport_error());
        assert!(!ChannelError::pipeline("formatter", ChannelError::format("bad")).is_transport_error());
    }

    #[test]
    fn test_pipeline_error_names_stage() {
        let err = ChannelError::pipeline("formatter", ChannelError::format("bad digit"));
        assert_eq!(
            err.to_string(),
            "Pipeline stage 'formatter' failed: Format error: bad digit"
        );
    }
}
