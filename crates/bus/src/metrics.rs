//! Per-subscription counters
//!
//! Updated lock-free from the publish path and the delivery worker; read
//! through [`SubscriberMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct SubscriberMetrics {
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl SubscriberMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the queue depth seen after an enqueue or a dequeue
    pub fn observe_depth(&self, depth: usize) {
        self.depth.store(depth, Ordering::Relaxed);
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Handler returned an error or panicked
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Envelope refused by a full queue; returns the running total
    pub fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> SubscriberStats {
        SubscriberStats {
            depth: self.depth.load(Ordering::Relaxed),
            peak_depth: self.peak_depth.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SubscriberMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Envelopes waiting in the queue
    pub depth: usize,
    /// Largest depth observed
    pub peak_depth: usize,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl SubscriberStats {
    /// Envelopes offered to the subscriber, accepted or not
    pub fn offered(&self) -> u64 {
        self.delivered + self.failed + self.dropped + self.depth as u64
    }
}
