//! Tuple Space Error Types

use thiserror::Error;

/// Errors raised by tuple-space operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TupleSpaceError {
    /// The space was disposed; no further writes or matches are possible
    #[error("Tuple space '{name}' has been disposed")]
    Disposed { name: String },
}

/// Result type alias for tuple-space operations
pub type Result<T> = std::result::Result<T, TupleSpaceError>;
