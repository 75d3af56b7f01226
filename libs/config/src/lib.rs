//! # Link Configuration
//!
//! Declarative settings for the communication core: client channels,
//! server channels, framing headers and reconnection policy.
//!
//! ## Usage
//!
//! ```no_run
//! use link_config::LinkConfig;
//!
//! let config = LinkConfig::from_file("config/link.toml").unwrap();
//! for (name, channel) in &config.channels {
//!     println!("{name} -> {:?}", channel.remote);
//! }
//! ```
//!
//! ## File Layout
//!
//! ```toml
//! [global]
//! log_level = "info"
//!
//! [channels.acquirer]
//! remote = "10.0.0.5:7001"
//! reconnect = { enabled = true, floor_ms = 250, ceiling_ms = 30000 }
//! header = { kind = "binary", width = 2, byte_order = "big_endian" }
//!
//! [servers.issuer]
//! bind = "0.0.0.0:7002"
//! max_connections = 64
//! ```

pub mod error;
pub mod link_config;
pub mod settings;

pub use error::{ConfigError, Result};
pub use link_config::{load_config, LinkConfig, ENV_PREFIX};
pub use settings::{
    ByteOrderSetting, ChannelSettings, GlobalSettings, HeaderKind, HeaderSettings,
    ReconnectSettings, ServerSettings,
};
