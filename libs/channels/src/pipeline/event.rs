use crate::address::ChannelAddress;
use std::fmt;

/// Out-of-band notification broadcast through a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A connection attempt is about to start
    ConnectionRequested,
    Connected,
    Disconnected,
    /// A connection attempt failed
    ConnectionFailed(String),
    /// The channel was closed and will not be reused
    Closed,
    /// A zero-length frame arrived
    Heartbeat,
    AddressChanged {
        old: ChannelAddress,
        new: ChannelAddress,
    },
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionRequested => f.write_str("connection-requested"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::ConnectionFailed(reason) => write!(f, "connection-failed ({reason})"),
            Self::Closed => f.write_str("closed"),
            Self::Heartbeat => f.write_str("heartbeat"),
            Self::AddressChanged { old, new } => write!(f, "address-changed ({old} -> {new})"),
        }
    }
}
