//! Query cache: normalized question → finished answer, with TTL expiry.
//!
//! The [`QueryCache`] trait is the seam the orchestrator talks to, so the
//! process-local [`InMemoryQueryCache`] can be swapped for an external
//! store without touching the pipeline.
//!
//! # Expiry
//!
//! An entry is visible while `now - created_at <= ttl`. Expired entries
//! are removed lazily by the read that observes them; there is no
//! background sweeper. To keep memory bounded, inserting a new key into a
//! full cache first drops every expired entry and then, if still full,
//! evicts the least recently used one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::clock::{Clock, SystemClock};
use crate::models::CachedAnswer;

/// Length of a cache key in hex characters (128 bits of SHA-256).
pub const CACHE_KEY_LEN: usize = 32;

/// Default time-to-live: one hour.
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Derive the cache key for a question.
///
/// The question is trimmed and lowercased before hashing, so questions
/// differing only in case or surrounding whitespace share a key.
///
/// ```rust
/// use nerdsiq_core::cache::cache_key;
///
/// assert_eq!(cache_key("Hello World"), cache_key("  hello world  "));
/// assert_eq!(cache_key("Hello World").len(), 32);
/// ```
pub fn cache_key(query: &str) -> String {
    let normalized = query.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..CACHE_KEY_LEN].to_string()
}

/// Introspection snapshot; reading it has no side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Return the cached answer if present and unexpired. Removes the
    /// entry when it is found but expired.
    async fn get(&self, key: &str) -> Option<CachedAnswer>;

    /// Insert or overwrite, stamped with the current time.
    async fn put(&self, key: &str, value: CachedAnswer);

    /// Remove one entry. Absent keys are ignored.
    async fn invalidate(&self, key: &str);

    /// Remove every entry (e.g. after documents are reindexed).
    async fn invalidate_all(&self);

    fn stats(&self) -> CacheStats;
}

struct CacheEntry {
    value: CachedAnswer,
    created_at: DateTime<Utc>,
    last_access: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Process-local [`QueryCache`] with TTL expiry and an entry-count bound.
pub struct InMemoryQueryCache {
    ttl: Duration,
    ttl_seconds: u64,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl InMemoryQueryCache {
    pub fn new(ttl_seconds: u64, max_entries: usize) -> Self {
        Self::with_clock(ttl_seconds, max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl_seconds: u64, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: i64::try_from(ttl_seconds)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            ttl_seconds,
            max_entries: max_entries.max(1),
            clock,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - created_at > self.ttl
    }

    fn make_room(&self, state: &mut CacheState, now: DateTime<Utc>) {
        if state.entries.len() < self.max_entries {
            return;
        }
        state
            .entries
            .retain(|_, entry| now - entry.created_at <= self.ttl);
        if state.entries.len() < self.max_entries {
            return;
        }
        let oldest = state
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            state.entries.remove(&key);
        }
    }
}

impl Default for InMemoryQueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECS, 10_000)
    }
}

#[async_trait]
impl QueryCache for InMemoryQueryCache {
    async fn get(&self, key: &str) -> Option<CachedAnswer> {
        let now = self.clock.now();
        let mut state = self.lock();
        let tick = state.next_tick();

        let entry = state.entries.get_mut(key)?;
        if self.is_expired(entry.created_at, now) {
            state.entries.remove(key);
            return None;
        }
        entry.last_access = tick;
        Some(entry.value.clone())
    }

    async fn put(&self, key: &str, value: CachedAnswer) {
        let now = self.clock.now();
        let mut state = self.lock();
        if !state.entries.contains_key(key) {
            self.make_room(&mut state, now);
        }
        let tick = state.next_tick();
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                last_access: tick,
            },
        );
    }

    async fn invalidate(&self, key: &str) {
        self.lock().entries.remove(key);
    }

    async fn invalidate_all(&self) {
        self.lock().entries.clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.lock().entries.len(),
            ttl_seconds: self.ttl_seconds,
            max_entries: self.max_entries,
        }
    }
}
