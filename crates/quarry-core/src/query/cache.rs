//! Response cache for context queries.
//!
//! A lightweight TTL + capacity bounded in-memory cache.  Keys embed the
//! store's cache epoch, so a reindex that changes anything implicitly
//! invalidates every cached response without a flush call.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::models::{ContextQuery, RankedContext};

struct CacheEntry {
    value: RankedContext,
    expires_at: Instant,
}

pub struct ContextCache {
    max_entries: usize,
    ttl: Duration,
    entries: Mutex<IndexMap<String, CacheEntry>>,
}

impl Default for ContextCache {
    fn default() -> Self {
        Self::new(512, Duration::from_secs(15))
    }
}

impl ContextCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            ttl,
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Cache key: epoch, budget, hints, and query text.
    pub fn key(epoch: i64, query: &ContextQuery) -> String {
        format!(
            "{epoch}:{}:{}:{}",
            query.budget,
            query.hints.join(","),
            query.text
        )
    }

    pub fn get(&self, key: &str) -> Option<RankedContext> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if let Some(entry) = entries.get(key) {
            if entry.expires_at <= now {
                entries.shift_remove(key);
                return None;
            }
            return Some(entry.value.clone());
        }
        None
    }

    pub fn put(&self, key: String, value: RankedContext) {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        while entries.len() >= self.max_entries {
            entries.shift_remove_index(0);
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
