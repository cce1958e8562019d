//! Dispatch counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for dispatch and compilation events.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Requests that reached the dispatcher.
    pub requests: AtomicU64,
    pub rejected_class_not_cached: AtomicU64,
    pub skipped_already_compiled: AtomicU64,
    pub rejected_method_not_found: AtomicU64,
    /// Admitted requests for which no plan could be obtained.
    pub plans_unavailable: AtomicU64,
    /// Plans the engine refused; each was released by the dispatcher.
    pub submissions_rejected: AtomicU64,
    pub queued: AtomicU64,
    pub compile_successes: AtomicU64,
    /// Engine-side failures, panics included.
    pub compile_failures: AtomicU64,
    /// Streams cancelled before dispatch (malformed or unreadable request).
    pub cancelled: AtomicU64,
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub rejected_class_not_cached: u64,
    pub skipped_already_compiled: u64,
    pub rejected_method_not_found: u64,
    pub plans_unavailable: u64,
    pub submissions_rejected: u64,
    pub queued: u64,
    pub compile_successes: u64,
    pub compile_failures: u64,
    pub cancelled: u64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all counters to zero. Not available in production builds.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.rejected_class_not_cached,
            &self.skipped_already_compiled,
            &self.rejected_method_not_found,
            &self.plans_unavailable,
            &self.submissions_rejected,
            &self.queued,
            &self.compile_successes,
            &self.compile_failures,
            &self.cancelled,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            rejected_class_not_cached: self.rejected_class_not_cached.load(Ordering::Relaxed),
            skipped_already_compiled: self.skipped_already_compiled.load(Ordering::Relaxed),
            rejected_method_not_found: self.rejected_method_not_found.load(Ordering::Relaxed),
            plans_unavailable: self.plans_unavailable.load(Ordering::Relaxed),
            submissions_rejected: self.submissions_rejected.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            compile_successes: self.compile_successes.load(Ordering::Relaxed),
            compile_failures: self.compile_failures.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Requests answered synchronously by the dispatcher.
    pub fn reported_by_dispatcher(&self) -> u64 {
        self.rejected_class_not_cached
            .saturating_add(self.skipped_already_compiled)
            .saturating_add(self.rejected_method_not_found)
            .saturating_add(self.plans_unavailable)
            .saturating_add(self.submissions_rejected)
    }
}
