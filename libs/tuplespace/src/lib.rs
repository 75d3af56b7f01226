//! # Tuple Space
//!
//! Partitioned, TTL-aware associative store. Channels publish inbound
//! messages and completed requests here; consumers `take` them at their
//! own pace.
//!
//! ```no_run
//! use std::time::Duration;
//! use tuplespace::{TupleSpace, DEFAULT_CONTEXT, NO_EXPIRY};
//!
//! # async fn example() -> tuplespace::Result<()> {
//! let space = TupleSpace::new();
//! space.write("hello".to_string(), NO_EXPIRY, DEFAULT_CONTEXT)?;
//! let value = space
//!     .take(None, Some(Duration::from_millis(100)), DEFAULT_CONTEXT)
//!     .await?;
//! assert_eq!(value.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

mod entry;
pub mod error;
pub mod space;

pub use error::{Result, TupleSpaceError};
pub use space::{Template, TupleSpace, DEFAULT_CONTEXT, NO_EXPIRY};
