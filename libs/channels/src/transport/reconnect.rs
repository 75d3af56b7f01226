//! Reconnection Backoff
//!
//! A connection that lived at least [`ReconnectPolicy::stable_after`] is
//! considered healthy, and the next attempt starts immediately. Connections
//! that die young (or never come up) back off exponentially from the floor
//! up to the ceiling, so an unreachable or refusing peer is not hammered.

use std::time::Duration;

/// Reconnection settings for a client channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// First delay after a short-lived connection
    pub floor: Duration,
    /// Largest delay
    pub ceiling: Duration,
    /// Connections living at least this long reset the backoff
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            floor: Duration::from_millis(100),
            ceiling: Duration::from_secs(30),
            stable_after: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// Reconnection enabled with the given bounds
    pub fn enabled(floor: Duration, ceiling: Duration) -> Self {
        Self {
            enabled: true,
            floor,
            ceiling: ceiling.max(floor),
            ..Default::default()
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Exponential backoff state
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    /// Delay before the next attempt
    ///
    /// `lifetime` is how long the previous connection lived; `None` means
    /// the attempt never connected.
    pub fn next_delay(&mut self, lifetime: Option<Duration>) -> Duration {
        if lifetime.is_some_and(|lived| lived >= self.policy.stable_after) {
            self.current = None;
            return Duration::ZERO;
        }
        let next = match self.current {
            None => self.policy.floor,
            Some(delay) => delay.saturating_mul(2).min(self.policy.ceiling),
        };
        self.current = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::enabled(Duration::from_millis(100), Duration::from_millis(500))
    }

    #[test]
    fn test_short_lived_connections_back_off() {
        let mut backoff = Backoff::new(policy());
        let delays: Vec<_> = (0..5)
            .map(|_| backoff.next_delay(Some(Duration::from_millis(10))))
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn test_failed_attempts_count_as_short_lived() {
        let mut backoff = Backoff::new(policy());
        assert_eq!(backoff.next_delay(None), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(None), Duration::from_millis(200));
    }

    #[test]
    fn test_stable_connection_retries_immediately_and_resets() {
        let mut backoff = Backoff::new(policy());
        backoff.next_delay(None);
        backoff.next_delay(None);

        assert_eq!(backoff.next_delay(Some(Duration::from_secs(5))), Duration::ZERO);
        assert_eq!(backoff.next_delay(None), Duration::from_millis(100));
    }

    #[test]
    fn test_ceiling_never_below_floor() {
        let policy = ReconnectPolicy::enabled(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(policy.ceiling, Duration::from_secs(2));
    }
}
