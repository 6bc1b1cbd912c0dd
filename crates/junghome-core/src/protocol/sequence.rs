//! Thread-safe counter for command correlation ids.
//!
//! # What is a correlation id? (for beginners)
//!
//! The bridge may have several commands in flight at once: the user dims the
//! kitchen while an automation switches off the hallway.  Every outbound
//! command carries a *correlation id*, and the gateway copies that id into its
//! acknowledgement.  Matching the two tells the bridge *which* caller to wake
//! up when an ack arrives.
//!
//! Ids start at 1.  Zero never appears on the wire, so a frame with
//! `correlation_id: 0` is always a gateway bug rather than a real answer.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU64`.  Callers on any task can draw an id without a
//! lock and without ever seeing the same value twice.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing source of correlation ids.
///
/// # Examples
///
/// ```rust
/// use junghome_core::protocol::CorrelationCounter;
///
/// let counter = CorrelationCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
#[derive(Debug)]
pub struct CorrelationCounter {
    inner: AtomicU64,
}

impl CorrelationCounter {
    /// Creates a new counter whose first id is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next correlation id.
    ///
    /// `Ordering::Relaxed` is sufficient: the id is only used to match frames,
    /// not to publish other memory between threads.
    pub fn next(&self) -> u64 {
        let id = self.inner.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            // Wrapped past u64::MAX; skip the reserved value.
            self.inner.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }

    /// Returns the id the next call to [`next`](Self::next) will hand out.
    pub fn peek(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for CorrelationCounter {
    fn default() -> Self {
        Self::new()
    }
}
