//! Degraded-mode local cache.
//!
//! Write paths with a "best effort" policy append here when their dependency's
//! circuit is open. Entries are never updated in place; they are drained later
//! for reconciliation or served as a read fallback. The cache is unbounded for
//! the lifetime of the process and is never a source of truth.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One payload that could not be delivered to its dependency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedCacheEntry<T> {
    pub payload: T,
    pub recorded_at: DateTime<Utc>,
}

/// In-process fallback store. Clones share the same entries.
#[derive(Debug)]
pub struct DegradedCache<T> {
    name: Arc<str>,
    entries: Arc<Mutex<Vec<DegradedCacheEntry<T>>>>,
}

impl<T> Clone for DegradedCache<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> DegradedCache<T> {
    /// Creates an empty cache; `name` labels its metrics.
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DegradedCacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an entry. Always succeeds.
    pub fn record(&self, payload: T) {
        let mut entries = self.lock();
        entries.push(DegradedCacheEntry {
            payload,
            recorded_at: Utc::now(),
        });
        self.report_size(entries.len());
        tracing::warn!(cache = %self.name, size = entries.len(), "payload saved to degraded cache");
    }

    /// Puts back an entry taken by [`Self::drain`], keeping its original
    /// `recorded_at`.
    pub fn restore(&self, entry: DegradedCacheEntry<T>) {
        let mut entries = self.lock();
        entries.push(entry);
        self.report_size(entries.len());
    }

    /// Returns all entries in insertion order and clears the cache.
    pub fn drain(&self) -> Vec<DegradedCacheEntry<T>> {
        let mut entries = self.lock();
        let drained: Vec<_> = entries.drain(..).collect();
        self.report_size(0);
        tracing::info!(cache = %self.name, count = drained.len(), "drained degraded cache");
        drained
    }

    /// Returns a copy of all entries without clearing them.
    pub fn entries(&self) -> Vec<DegradedCacheEntry<T>>
    where
        T: Clone,
    {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn report_size(&self, size: usize) {
        metrics::gauge!("degraded_cache_entries", "cache" => self.name.to_string()).set(size as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_drain_preserve_order() {
        let cache = DegradedCache::new("observations");
        cache.record("first");
        cache.record("second");
        assert_eq!(cache.len(), 2);

        let drained = cache.drain();
        let payloads: Vec<_> = drained.iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec!["first", "second"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entries_do_not_clear() {
        let cache = DegradedCache::new("observations");
        cache.record(1);
        assert_eq!(cache.entries().len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_restore_keeps_recorded_at() {
        let cache = DegradedCache::new("observations");
        cache.record("first");
        let entry = cache.drain().remove(0);
        let recorded_at = entry.recorded_at;

        cache.restore(entry);

        let entries = cache.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].recorded_at, recorded_at);
        assert_eq!(entries[0].payload, "first");
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = DegradedCache::new("observations");
        let other = cache.clone();
        other.record(7);
        assert_eq!(cache.len(), 1);
        assert!(other.drain()[0].recorded_at <= Utc::now());
        assert!(cache.is_empty());
    }
}
