//! # In-Memory Cache Store
//!
//! The local tier: an in-process store bounded by entry count and by an
//! approximate byte budget, with LRU eviction and per-entry TTL. Entries
//! carry the dependency tags they were written with. Expiry is lazy - an
//! expired entry answers `get` as a miss and is purged on the spot; a
//! sweep also runs ahead of eviction so stale entries are reclaimed before
//! live ones.

use crate::core::config::MemorySettings;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// A single cached value with its expiry and tag annotations.
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
    tags: Vec<String>,
    /// Monotonic recency stamp; larger = more recently used
    last_access: u64,
    /// Approximate bytes held by this entry
    size: usize,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Local tier statistics
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub entries: usize,
    pub memory_usage: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_purges: u64,
}

/// In-memory cache implementation
pub struct InMemoryCache {
    max_entries: usize,
    max_memory_bytes: usize,

    entries: DashMap<String, MemoryEntry>,

    /// Source of recency stamps for LRU ordering
    access_clock: AtomicU64,

    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_purges: AtomicU64,
    memory_usage: AtomicUsize,
}

impl InMemoryCache {
    pub fn new(settings: &MemorySettings) -> Self {
        Self {
            max_entries: settings.max_entries,
            max_memory_bytes: settings.max_memory_mb * 1024 * 1024,
            entries: DashMap::new(),
            access_clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_purges: AtomicU64::new(0),
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Get a value. Expired entries behave as a miss and are purged lazily.
    pub fn get(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get_mut(key) {
            Some(mut entry) => {
                if entry.is_expired() {
                    true
                } else {
                    entry.last_access = self.tick();
                    let value = entry.value.clone();
                    drop(entry);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(value);
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            if let Some((_, entry)) = self.entries.remove(key) {
                self.memory_usage.fetch_sub(entry.size, Ordering::Relaxed);
                self.expired_purges.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value with a TTL and its dependency tags, evicting as needed
    /// to stay inside the entry and byte budgets.
    pub fn set(&self, key: &str, value: String, ttl: Duration, tags: Vec<String>) {
        let size = value.len() + key.len() + std::mem::size_of::<MemoryEntry>();
        let entry = MemoryEntry {
            value,
            expires_at: Instant::now() + ttl,
            tags,
            last_access: self.tick(),
            size,
        };

        match self.entries.insert(key.to_string(), entry) {
            Some(old) => {
                self.memory_usage.fetch_sub(old.size, Ordering::Relaxed);
                self.memory_usage.fetch_add(size, Ordering::Relaxed);
            }
            None => {
                self.memory_usage.fetch_add(size, Ordering::Relaxed);
            }
        }

        self.evict_if_needed();
    }

    /// Delete a key; true when something was removed.
    pub fn delete(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.memory_usage.fetch_sub(entry.size, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Tags the given key was written with, if present and live.
    pub fn tags_for(&self, key: &str) -> Option<Vec<String>> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.tags.clone())
    }

    /// Drop every entry and reset the statistics counters.
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        self.memory_usage.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expired_purges.store(0, Ordering::Relaxed);
        debug!("Cleared {} entries from in-memory cache", count);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            entries: self.entries.len(),
            memory_usage: self.memory_usage.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_purges: self.expired_purges.load(Ordering::Relaxed),
        }
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn over_budget(&self) -> bool {
        self.entries.len() > self.max_entries
            || self.memory_usage.load(Ordering::Relaxed) > self.max_memory_bytes
    }

    fn evict_if_needed(&self) {
        if !self.over_budget() {
            return;
        }

        // Reclaim expired entries before touching live ones.
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect();
        for key in expired {
            if let Some((_, entry)) = self.entries.remove(&key) {
                self.memory_usage.fetch_sub(entry.size, Ordering::Relaxed);
                self.expired_purges.fetch_add(1, Ordering::Relaxed);
            }
        }

        if !self.over_budget() {
            return;
        }

        // LRU eviction down to 90% of the entry budget so a burst of writes
        // does not evict on every insert.
        let target = (self.max_entries * 9 / 10).max(1);
        let mut by_recency: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_access))
            .collect();
        by_recency.sort_by_key(|(_, access)| *access);

        let mut evicted = 0u64;
        for (key, _) in by_recency {
            if self.entries.len() <= target
                && self.memory_usage.load(Ordering::Relaxed) <= self.max_memory_bytes
            {
                break;
            }
            if let Some((_, entry)) = self.entries.remove(&key) {
                self.memory_usage.fetch_sub(entry.size, Ordering::Relaxed);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!("Evicted {} LRU entries from in-memory cache", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(max_entries: usize) -> InMemoryCache {
        InMemoryCache::new(&MemorySettings {
            max_memory_mb: 10,
            max_entries,
        })
    }

    #[test]
    fn test_basic_operations() {
        let cache = small_cache(100);

        cache.set(
            "key",
            "\"value\"".to_string(),
            Duration::from_secs(60),
            vec![],
        );
        assert_eq!(cache.get("key"), Some("\"value\"".to_string()));
        assert!(cache.delete("key"));
        assert_eq!(cache.get("key"), None);
        assert!(!cache.delete("key"));
    }

    #[test]
    fn test_expired_entry_reads_as_miss_and_is_purged() {
        let cache = small_cache(100);

        cache.set("key", "1".to_string(), Duration::from_nanos(1), vec![]);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.get("key"), None);
        assert_eq!(cache.len(), 0);

        let stats = cache.stats();
        assert_eq!(stats.expired_purges, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lru_eviction_prefers_stale_entries() {
        let cache = small_cache(3);

        cache.set("a", "1".to_string(), Duration::from_secs(60), vec![]);
        cache.set("b", "2".to_string(), Duration::from_secs(60), vec![]);
        cache.set("c", "3".to_string(), Duration::from_secs(60), vec![]);

        // Touch "a" so "b" is the least recently used.
        cache.get("a");

        cache.set("d", "4".to_string(), Duration::from_secs(60), vec![]);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("d").is_some());
        assert!(cache.stats().evictions >= 1);
    }

    #[test]
    fn test_tags_are_retained() {
        let cache = small_cache(10);
        cache.set(
            "key",
            "1".to_string(),
            Duration::from_secs(60),
            vec!["entity:item-1".to_string(), "table:items".to_string()],
        );

        let tags = cache.tags_for("key").unwrap();
        assert_eq!(tags, vec!["entity:item-1", "table:items"]);
        assert_eq!(cache.tags_for("missing"), None);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = small_cache(10);
        cache.set("key", "1".to_string(), Duration::from_secs(60), vec![]);

        cache.get("key");
        cache.get("absent");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!(stats.memory_usage > 0);
    }

    #[test]
    fn test_clear_resets_usage_and_counters() {
        let cache = small_cache(10);
        cache.set("key", "1".to_string(), Duration::from_secs(60), vec![]);
        cache.get("key");
        cache.clear();
        assert!(cache.is_empty());
        let stats = cache.stats();
        assert_eq!(stats.memory_usage, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_overwrite_adjusts_memory_usage() {
        let cache = small_cache(10);
        cache.set("key", "x".repeat(100), Duration::from_secs(60), vec![]);
        let before = cache.stats().memory_usage;
        cache.set("key", "x".to_string(), Duration::from_secs(60), vec![]);
        assert!(cache.stats().memory_usage < before);
        assert_eq!(cache.len(), 1);
    }
}
