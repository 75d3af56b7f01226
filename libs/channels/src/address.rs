//! Channel Addressing
//!
//! A channel is identified either by a reference to itself (its generated
//! [`ChannelId`]) or by a configured name. The stringified address is the
//! key a server uses for its child table, so responses can be routed back to
//! the connection a request arrived on.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Failure to parse a [`ChannelAddress`] from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseAddressError {
    #[error("address cannot be empty")]
    Empty,
    #[error("invalid reference address '{0}'")]
    InvalidReference(String),
}

/// Unique identity generated for every channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelAddress {
    /// Opaque reference to a specific channel instance
    Reference(ChannelId),
    /// Stable symbolic name, survives reconnection
    Named(String),
}

impl ChannelAddress {
    const REFERENCE_PREFIX: &'static str = "ref:";

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }

    /// Key used by tables that index channels by address
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference(id) => write!(f, "{}{}", Self::REFERENCE_PREFIX, id),
            Self::Named(name) => f.write_str(name),
        }
    }
}

impl From<ChannelId> for ChannelAddress {
    fn from(id: ChannelId) -> Self {
        Self::Reference(id)
    }
}

impl FromStr for ChannelAddress {
    type Err = ParseAddressError;

    /// `ref:<uuid>` parses to a reference address, anything else non-empty to a name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseAddressError::Empty);
        }
        match s.strip_prefix(Self::REFERENCE_PREFIX) {
            Some(raw) => Uuid::parse_str(raw)
                .map(|uuid| Self::Reference(ChannelId(uuid)))
                .map_err(|_| ParseAddressError::InvalidReference(s.to_string())),
            None => Ok(Self::Named(s.to_string())),
        }
    }
}
