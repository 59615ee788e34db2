// Result cache
// Single-slot, TTL-bounded holder of the newest snapshot

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::model::{now_millis, Snapshot};

/// Cached snapshot plus the instant it was stored
struct CacheEntry {
    snapshot: Arc<Snapshot>,
    stored_at: Instant,
}

/// Advisory cache of the latest merged snapshot.
///
/// The slot is swapped as a whole value, so concurrent writers can only
/// ever race to last-writer-wins; a reader never observes a partial entry.
pub struct ResultCache {
    slot: ArcSwapOption<CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached snapshot stamped as cache-served, or `None` when
    /// empty or expired. An expired entry is evicted.
    pub fn get(&self) -> Option<Snapshot> {
        let current = self.slot.load_full();
        let entry = current.as_ref()?;

        if entry.stored_at.elapsed() >= self.ttl {
            debug!(ttl_ms = self.ttl.as_millis() as u64, "Cached snapshot expired");
            // Only evict the entry we inspected; a newer set() wins.
            let _ = self.slot.compare_and_swap(&current, None::<Arc<CacheEntry>>);
            return None;
        }

        let mut snapshot = Snapshot::clone(&entry.snapshot);
        snapshot.cached = true;
        snapshot.served_at = now_millis();
        Some(snapshot)
    }

    /// Replace the cached snapshot
    pub fn set(&self, snapshot: Snapshot) {
        self.slot.store(Some(Arc::new(CacheEntry {
            snapshot: Arc::new(snapshot),
            stored_at: Instant::now(),
        })));
    }

    pub fn invalidate(&self) {
        self.slot.store(None);
    }

    /// Age of the stored entry, if any, without touching it
    pub fn age(&self) -> Option<Duration> {
        self.slot.load().as_ref().map(|entry| entry.stored_at.elapsed())
    }

    pub fn is_warm(&self) -> bool {
        self.age().map(|age| age < self.ttl).unwrap_or(false)
    }
}
