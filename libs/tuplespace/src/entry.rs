use std::time::Duration;
use tokio::time::Instant;

/// A stored value together with its expiry deadline
#[derive(Debug)]
pub(crate) struct Entry<T> {
    pub(crate) value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    /// A TTL that overflows the clock never expires
    pub(crate) fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}
