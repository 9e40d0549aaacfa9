//! Driver-wide counters, readable from any thread

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters updated by the conductor and its proxies
#[derive(Debug, Default)]
pub struct SystemCounters {
    /// Commands dropped because the command queue was full
    pub conductor_proxy_fails: AtomicI64,
    pub commands_applied: AtomicU64,
    pub commands_rejected: AtomicU64,
    pub images_created: AtomicU64,
    pub resources_lingered: AtomicU64,
    pub resources_reclaimed: AtomicU64,
    pub resolution_changes: AtomicU64,
    pub errors: AtomicU64,
}

/// Point-in-time copy of [`SystemCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub conductor_proxy_fails: i64,
    pub commands_applied: u64,
    pub commands_rejected: u64,
    pub images_created: u64,
    pub resources_lingered: u64,
    pub resources_reclaimed: u64,
    pub resolution_changes: u64,
    pub errors: u64,
}

impl SystemCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            conductor_proxy_fails: self.conductor_proxy_fails.load(Ordering::Acquire),
            commands_applied: self.commands_applied.load(Ordering::Acquire),
            commands_rejected: self.commands_rejected.load(Ordering::Acquire),
            images_created: self.images_created.load(Ordering::Acquire),
            resources_lingered: self.resources_lingered.load(Ordering::Acquire),
            resources_reclaimed: self.resources_reclaimed.load(Ordering::Acquire),
            resolution_changes: self.resolution_changes.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
        }
    }
}
