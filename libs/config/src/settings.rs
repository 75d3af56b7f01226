//! Channel and Server Settings
//!
//! Plain serde structures with defaults for every field, so a settings
//! file only needs to mention what differs from the defaults.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default upper bound for a single frame body (16MB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Default initial receive buffer (64KB)
pub const DEFAULT_RECEIVE_BUFFER: usize = 64 * 1024;

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Default tracing filter directive (overridden by `RUST_LOG`)
    pub log_level: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// How the length header of a frame is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderKind {
    /// Unsigned binary integer of `width` bytes
    Binary,
    /// `width` ASCII decimal digits
    Ascii,
    /// No header; the formatter finds message boundaries itself
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrderSetting {
    BigEndian,
    LittleEndian,
}

/// Frame header layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderSettings {
    pub kind: HeaderKind,
    /// Header size in bytes (binary) or digits (ascii); ignored for `none`
    pub width: usize,
    /// Only meaningful for binary headers
    pub byte_order: ByteOrderSetting,
}

impl Default for HeaderSettings {
    fn default() -> Self {
        Self {
            kind: HeaderKind::Binary,
            width: 4,
            byte_order: ByteOrderSetting::BigEndian,
        }
    }
}

impl HeaderSettings {
    pub fn validate(&self, field: &str) -> Result<()> {
        match self.kind {
            HeaderKind::Binary if !matches!(self.width, 1 | 2 | 4) => Err(ConfigError::invalid(
                format!("{field}.width"),
                format!("binary headers must be 1, 2 or 4 bytes wide, got {}", self.width),
            )),
            HeaderKind::Ascii if !(1..=9).contains(&self.width) => Err(ConfigError::invalid(
                format!("{field}.width"),
                format!("ascii headers must have 1 to 9 digits, got {}", self.width),
            )),
            _ => Ok(()),
        }
    }
}

/// Reconnection with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub enabled: bool,
    /// First backoff delay after a short-lived connection
    pub floor_ms: u64,
    /// Backoff cap
    pub ceiling_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            floor_ms: 100,
            ceiling_ms: 30_000,
        }
    }
}

impl ReconnectSettings {
    pub fn floor(&self) -> Duration {
        Duration::from_millis(self.floor_ms)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms)
    }

    pub fn validate(&self, field: &str) -> Result<()> {
        if self.floor_ms == 0 {
            return Err(ConfigError::invalid(
                format!("{field}.floor_ms"),
                "backoff floor must be positive",
            ));
        }
        if self.ceiling_ms < self.floor_ms {
            return Err(ConfigError::invalid(
                format!("{field}.ceiling_ms"),
                format!(
                    "backoff ceiling {}ms is below floor {}ms",
                    self.ceiling_ms, self.floor_ms
                ),
            ));
        }
        Ok(())
    }
}

/// Client channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Name used in logs
    pub name: Option<String>,
    /// Peer endpoint: `host:port` or `unix:/path/to.sock`
    pub remote: Option<String>,
    /// Stable named address; a reference address is generated when absent
    pub address: Option<String>,
    pub connect_timeout_ms: u64,
    pub max_frame_len: usize,
    pub receive_buffer: usize,
    pub header: HeaderSettings,
    pub reconnect: ReconnectSettings,
    /// Tuple-space partition that deliveries are written to
    pub tuple_space_context: String,
    /// TTL of published deliveries; never expire when absent
    pub delivery_ttl_ms: Option<u64>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            name: None,
            remote: None,
            address: None,
            connect_timeout_ms: 5_000,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            receive_buffer: DEFAULT_RECEIVE_BUFFER,
            header: HeaderSettings::default(),
            reconnect: ReconnectSettings::default(),
            tuple_space_context: String::new(),
            delivery_ttl_ms: None,
        }
    }
}

impl ChannelSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn delivery_ttl(&self) -> Option<Duration> {
        self.delivery_ttl_ms.map(Duration::from_millis)
    }

    pub fn validate(&self, field: &str) -> Result<()> {
        if self.max_frame_len == 0 {
            return Err(ConfigError::invalid(
                format!("{field}.max_frame_len"),
                "maximum frame length must be positive",
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                format!("{field}.connect_timeout_ms"),
                "connect timeout must be positive",
            ));
        }
        if self.address.as_deref() == Some("") {
            return Err(ConfigError::invalid(
                format!("{field}.address"),
                "named address cannot be empty",
            ));
        }
        self.header.validate(&format!("{field}.header"))?;
        self.reconnect.validate(&format!("{field}.reconnect"))
    }
}

/// Server channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub name: Option<String>,
    /// Listening endpoint: `host:port` or `unix:/path/to.sock`
    pub bind: String,
    /// Connections beyond this limit are closed on accept
    pub max_connections: Option<usize>,
    pub max_frame_len: usize,
    pub receive_buffer: usize,
    pub header: HeaderSettings,
    pub tuple_space_context: String,
    pub delivery_ttl_ms: Option<u64>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: None,
            bind: "127.0.0.1:0".to_string(),
            max_connections: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            receive_buffer: DEFAULT_RECEIVE_BUFFER,
            header: HeaderSettings::default(),
            tuple_space_context: String::new(),
            delivery_ttl_ms: None,
        }
    }
}

impl ServerSettings {
    pub fn delivery_ttl(&self) -> Option<Duration> {
        self.delivery_ttl_ms.map(Duration::from_millis)
    }

    pub fn validate(&self, field: &str) -> Result<()> {
        if self.bind.is_empty() {
            return Err(ConfigError::invalid(
                format!("{field}.bind"),
                "bind endpoint is required",
            ));
        }
        if self.max_frame_len == 0 {
            return Err(ConfigError::invalid(
                format!("{field}.max_frame_len"),
                "maximum frame length must be positive",
            ));
        }
        if self.max_connections == Some(0) {
            return Err(ConfigError::invalid(
                format!("{field}.max_connections"),
                "a server must accept at least one connection",
            ));
        }
        self.header.validate(&format!("{field}.header"))
    }
}
