//! Channel Notifications
//!
//! Listener callbacks never run on the I/O path: each notification is
//! dispatched on its own spawned task.

use super::Channel;
use crate::address::ChannelAddress;
use crate::delivery::Delivery;
use crate::message::Message;
use std::future::Future;
use tokio::runtime::Handle;
use tracing::{debug, Instrument, Span};

/// Observer of a single channel
pub trait ChannelListener<M: Message>: Send + Sync {
    fn on_connected(&self, _channel: &Channel<M>) {}

    fn on_disconnected(&self, _channel: &Channel<M>) {}

    /// A delivery was published to the channel's tuple space
    fn on_delivery(&self, _channel: &Channel<M>, _delivery: &Delivery<M>) {}
}

/// Observer of a server channel's children
pub trait ServerListener<M: Message>: Send + Sync {
    fn on_child_connected(&self, _child: &Channel<M>) {}

    fn on_child_disconnected(&self, _child: &Channel<M>) {}

    fn on_child_address_changed(&self, _child: &Channel<M>, _old: &ChannelAddress) {}
}

/// Run `task` on the current runtime, detached from the caller
pub(crate) fn dispatch<F>(span: &Span, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(task.instrument(span.clone()));
        }
        Err(_) => span.in_scope(|| debug!("No runtime available, notification dropped")),
    }
}
