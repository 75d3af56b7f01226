//! Tuple Space Implementation
//!
//! A concurrent associative store partitioned into named contexts. Producers
//! `write` values with a TTL; consumers `take` (remove) or `read` (copy) the
//! first live entry matching an optional template, waiting up to a timeout.
//!
//! ## Timeout Semantics
//!
//! - `Some(Duration::ZERO)`: non-blocking, a single match attempt
//! - `Some(d)`: wait up to `d` for a matching entry
//! - `None`: wait until a match appears or the space is disposed
//!
//! Matching and removal happen under one lock, so two concurrent `take`
//! calls can never claim the same entry.

use crate::entry::Entry;
use crate::error::{Result, TupleSpaceError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Partition used when callers do not name one
pub const DEFAULT_CONTEXT: &str = "";

/// TTL for entries that should never expire
pub const NO_EXPIRY: Duration = Duration::MAX;

/// How often a write also sweeps every partition for expired entries
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

type Partitions<T> = HashMap<String, VecDeque<Entry<T>>>;

/// Predicate used to select entries on `take`/`read`
pub type Template<T> = dyn Fn(&T) -> bool + Send + Sync;

/// Concurrent, partitioned, TTL-aware tuple space
pub struct TupleSpace<T> {
    name: String,
    partitions: Mutex<Partitions<T>>,
    next_sweep: Mutex<Instant>,
    available: Notify,
    disposed: AtomicBool,
}

impl<T> fmt::Debug for TupleSpace<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TupleSpace")
            .field("name", &self.name)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send> Default for TupleSpace<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> TupleSpace<T> {
    /// Create an anonymous tuple space
    pub fn new() -> Self {
        Self::with_name("tuple-space")
    }

    /// Create a tuple space with a name used in logs and errors
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: Mutex::new(HashMap::new()),
            next_sweep: Mutex::new(Instant::now() + SWEEP_INTERVAL),
            available: Notify::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Name of this space
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a value into `context`, visible until `ttl` elapses
    ///
    /// Expired entries at the front of `context` are dropped first, and every
    /// partition is swept at most once per second, so partitions nobody
    /// takes from do not hold expired entries indefinitely.
    pub fn write(&self, value: T, ttl: Duration, context: &str) -> Result<()> {
        self.ensure_live()?;
        let now = Instant::now();
        let purged = {
            let mut partitions = self.partitions.lock();
            let queue = partitions.entry(context.to_string()).or_default();
            while queue.front().is_some_and(|e| e.is_expired(now)) {
                queue.pop_front();
            }
            queue.push_back(Entry::new(value, ttl));

            let sweep_due = {
                let mut next_sweep = self.next_sweep.lock();
                if now >= *next_sweep {
                    *next_sweep = now + SWEEP_INTERVAL;
                    true
                } else {
                    false
                }
            };
            if sweep_due {
                sweep(&mut partitions, now)
            } else {
                0
            }
        };
        if purged > 0 {
            debug!(space = %self.name, purged, "expired entries reclaimed");
        }
        trace!(space = %self.name, context, "entry written");
        self.available.notify_waiters();
        Ok(())
    }

    /// Put back a value previously taken; identical to [`TupleSpace::write`]
    pub fn return_value(&self, value: T, ttl: Duration, context: &str) -> Result<()> {
        self.write(value, ttl, context)
    }

    /// Remove and return the first live entry matching `template`
    pub async fn take(
        &self,
        template: Option<&Template<T>>,
        timeout: Option<Duration>,
        context: &str,
    ) -> Result<Option<T>> {
        self.retrieve(template, timeout, context, true).await
    }

    /// Return a copy of the first live entry matching `template` without removing it
    pub async fn read(
        &self,
        template: Option<&Template<T>>,
        timeout: Option<Duration>,
        context: &str,
    ) -> Result<Option<T>> {
        self.retrieve(template, timeout, context, false).await
    }

    /// Number of live entries in `context`
    pub fn count(&self, context: &str) -> usize {
        let now = Instant::now();
        let partitions = self.partitions.lock();
        partitions
            .get(context)
            .map(|queue| queue.iter().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    /// Whether `context` holds no live entries
    pub fn is_empty(&self, context: &str) -> bool {
        self.count(context) == 0
    }

    /// Reclaim expired entries from every partition, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let purged = sweep(&mut self.partitions.lock(), Instant::now());
        if purged > 0 {
            debug!(space = %self.name, purged, "expired entries reclaimed");
        }
        purged
    }

    /// Dispose the space: drop all entries and wake every waiter with an error
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.partitions.lock().clear();
        self.available.notify_waiters();
        debug!(space = %self.name, "tuple space disposed");
    }

    /// Whether [`TupleSpace::dispose`] has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(TupleSpaceError::Disposed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    async fn retrieve(
        &self,
        template: Option<&Template<T>>,
        timeout: Option<Duration>,
        context: &str,
        remove: bool,
    ) -> Result<Option<T>> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let non_blocking = timeout == Some(Duration::ZERO);

        loop {
            // Register interest before matching so a concurrent write cannot be missed
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_live()?;
            if let Some(value) = self.try_match(template, context, remove) {
                return Ok(Some(value));
            }
            if non_blocking {
                return Ok(None);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    fn try_match(&self, template: Option<&Template<T>>, context: &str, remove: bool) -> Option<T> {
        let now = Instant::now();
        let mut partitions = self.partitions.lock();
        let queue = partitions.get_mut(context)?;
        queue.retain(|e| !e.is_expired(now));

        let position = queue
            .iter()
            .position(|e| template.map_or(true, |matches| matches(&e.value)));

        let value = match position {
            Some(index) if remove => queue.remove(index).map(|e| e.value),
            Some(index) => Some(queue[index].value.clone()),
            None => None,
        };

        if queue.is_empty() {
            partitions.remove(context);
        }
        value
    }

    /// Entries held in memory, expired or not
    #[cfg(test)]
    fn stored(&self) -> usize {
        self.partitions.lock().values().map(VecDeque::len).sum()
    }
}

fn sweep<T>(partitions: &mut Partitions<T>, now: Instant) -> usize {
    let mut purged = 0;
    for queue in partitions.values_mut() {
        let before = queue.len();
        queue.retain(|e| !e.is_expired(now));
        purged += before - queue.len();
    }
    partitions.retain(|_, queue| !queue.is_empty());
    purged
}
