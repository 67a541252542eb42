use super::{CacheStore, CounterState};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local cache with per-entry expiry.
///
/// Expired entries are dropped lazily when touched.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone());

        if value.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.value))
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<CounterState> {
        let now = Instant::now();
        let fresh = || CacheEntry {
            value: "1".to_string(),
            expires_at: Some(now + window),
        };

        // The entry guard holds the shard lock for the whole read-modify-write
        let state = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = fresh();
                } else {
                    let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
                    entry.value = count.to_string();
                    if entry.expires_at.is_none() {
                        entry.expires_at = Some(now + window);
                    }
                }
                counter_state(entry, now)
            }
            Entry::Vacant(vacant) => {
                let entry = vacant.insert(fresh());
                counter_state(&entry, now)
            }
        };
        Ok(state)
    }
}

fn counter_state(entry: &CacheEntry, now: Instant) -> CounterState {
    CounterState {
        count: entry.value.parse().unwrap_or(0),
        ttl: entry
            .expires_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or_default(),
    }
}
