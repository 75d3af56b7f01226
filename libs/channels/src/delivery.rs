use crate::address::ChannelAddress;
use crate::message::Message;
use crate::request::Request;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A received message that matched no pending request
#[derive(Debug, Clone)]
pub struct ReceiveDescriptor<M> {
    source: ChannelAddress,
    message: M,
    received_at: DateTime<Utc>,
}

impl<M> ReceiveDescriptor<M> {
    pub fn new(source: ChannelAddress, message: M) -> Self {
        Self {
            source,
            message,
            received_at: Utc::now(),
        }
    }

    /// Address of the channel the message arrived on
    pub fn source(&self) -> &ChannelAddress {
        &self.source
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn into_message(self) -> M {
        self.message
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// Entry a channel writes to its tuple space
#[derive(Debug)]
pub enum Delivery<M: Message> {
    /// Unsolicited or unmatched inbound message
    Received(ReceiveDescriptor<M>),
    /// A request bound for the tuple space reached a terminal state
    Completed(Arc<Request<M>>),
}

impl<M: Message> Clone for Delivery<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Received(descriptor) => Self::Received(descriptor.clone()),
            Self::Completed(request) => Self::Completed(Arc::clone(request)),
        }
    }
}

impl<M: Message> Delivery<M> {
    pub fn as_received(&self) -> Option<&ReceiveDescriptor<M>> {
        match self {
            Self::Received(descriptor) => Some(descriptor),
            Self::Completed(_) => None,
        }
    }

    pub fn as_completed(&self) -> Option<&Arc<Request<M>>> {
        match self {
            Self::Completed(request) => Some(request),
            Self::Received(_) => None,
        }
    }

    pub fn is_received(&self) -> bool {
        matches!(self, Self::Received(_))
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}
