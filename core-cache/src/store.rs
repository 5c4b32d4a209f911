//! # Cache Store
//!
//! Multi-policy key/value cache with LRU eviction, dependency cascade
//! invalidation, and stale-while-revalidate refresh scheduling.
//!
//! ## Overview
//!
//! Reads and writes go through an in-memory LRU index guarded by a single
//! async `RwLock`, which serializes writers so a concurrent `put` and
//! `invalidate` on the same key cannot interleave. Every mutation is
//! written through to [`CacheRepository`] so cache contents survive
//! restart. A `get` never touches the network: a stale lookup only pushes
//! a [`RefreshRequest`] onto a channel the sync coordinator drains.
//!
//! ## Capacity
//!
//! The store enforces a byte budget over all non-pinned entries in
//! least-recently-used order. `Forever` entries count against the budget
//! but are never evicted; pinned entries are excluded from the budget
//! entirely.

use lru::LruCache;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use bridge_traits::Clock;
use bytes::Bytes;
use core_runtime::events::{CacheEvent, EngineEvent};
use core_runtime::EventBus;

use crate::entry::{CacheEntry, CacheWrite, RefreshSource};
use crate::error::Result;
use crate::policy::{CachePolicy, Freshness};
use crate::repository::CacheRepository;

/// Result of a cache lookup. Freshness is always reported; the value is
/// present only when it is usable (fresh or stale).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub value: Option<Bytes>,
    pub freshness: Freshness,
}

impl Lookup {
    fn miss() -> Self {
        Self {
            value: None,
            freshness: Freshness::Miss,
        }
    }

    fn expired() -> Self {
        Self {
            value: None,
            freshness: Freshness::Expired,
        }
    }

    /// Whether the lookup produced a usable value.
    pub fn is_usable(&self) -> bool {
        self.freshness.is_usable()
    }
}

/// One-shot background refresh request handed to the sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub key: String,
    pub source: RefreshSource,
    /// Current entry size; used to skip large refreshes on metered
    /// connections.
    pub size_hint: usize,
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub budget_used_bytes: usize,
    pub budget_bytes: usize,
}

struct StoreInner {
    entries: LruCache<String, CacheEntry>,
    /// Bytes charged against the budget (non-pinned entries only).
    budget_used: usize,
    /// Keys with a refresh currently scheduled or in flight.
    refresh_inflight: HashSet<String>,
}

/// Multi-policy cache store.
pub struct CacheStore {
    inner: RwLock<StoreInner>,
    repository: Arc<dyn CacheRepository>,
    clock: Arc<dyn Clock>,
    budget_bytes: usize,
    events: EventBus,
    refresh_tx: mpsc::UnboundedSender<RefreshRequest>,
}

impl CacheStore {
    /// Create a store and the refresh request receiver the coordinator
    /// will drain.
    pub fn new(
        repository: Arc<dyn CacheRepository>,
        clock: Arc<dyn Clock>,
        budget_bytes: usize,
        events: EventBus,
    ) -> (Self, mpsc::UnboundedReceiver<RefreshRequest>) {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let store = Self {
            inner: RwLock::new(StoreInner {
                entries: LruCache::unbounded(),
                budget_used: 0,
                refresh_inflight: HashSet::new(),
            }),
            repository,
            clock,
            budget_bytes,
            events,
            refresh_tx,
        };
        (store, refresh_rx)
    }

    /// Rebuild the in-memory index from storage. Entries already past
    /// every usable window are dropped instead of loaded.
    pub async fn load_from_storage(&self) -> Result<()> {
        let now = self.clock.now_ms();
        let entries = self.repository.load_all().await?;
        let mut expired_keys = Vec::new();

        let mut inner = self.inner.write().await;
        for entry in entries {
            if entry.policy.freshness_at(entry.age_ms(now)) == Freshness::Expired {
                expired_keys.push(entry.key);
                continue;
            }
            if !entry.pinned {
                inner.budget_used += entry.size_bytes();
            }
            inner.entries.put(entry.key.clone(), entry);
        }
        let loaded = inner.entries.len();
        drop(inner);

        if !expired_keys.is_empty() {
            self.repository.delete_many(&expired_keys).await?;
        }

        info!(
            loaded,
            dropped_expired = expired_keys.len(),
            "Cache index rebuilt from storage"
        );
        Ok(())
    }

    /// Look up a key. Never blocks on network.
    ///
    /// A stale lookup under `StaleWhileRevalidate` schedules a one-shot
    /// background refresh; at most one refresh per key is in flight.
    pub async fn get(&self, key: &str) -> Lookup {
        let now = self.clock.now_ms();
        let mut inner = self.inner.write().await;

        let Some(entry) = inner.entries.get(key) else {
            return Lookup::miss();
        };

        match entry.policy.freshness_at(entry.age_ms(now)) {
            Freshness::Fresh => Lookup {
                value: Some(entry.value.clone()),
                freshness: Freshness::Fresh,
            },
            Freshness::Stale => {
                let value = entry.value.clone();
                let request = entry.refresh_source.clone().map(|source| RefreshRequest {
                    key: key.to_string(),
                    source,
                    size_hint: entry.size_bytes(),
                });

                if let Some(request) = request {
                    if inner.refresh_inflight.insert(key.to_string()) {
                        debug!(key, "Scheduling background refresh for stale entry");
                        if self.refresh_tx.send(request).is_err() {
                            warn!(key, "Refresh channel closed; refresh dropped");
                            inner.refresh_inflight.remove(key);
                        }
                    }
                }

                Lookup {
                    value: Some(value),
                    freshness: Freshness::Stale,
                }
            }
            Freshness::Expired => {
                // Reported once; the entry is dropped so later lookups miss.
                if let Some(entry) = inner.entries.pop(key) {
                    if !entry.pinned {
                        inner.budget_used -= entry.size_bytes();
                    }
                }
                inner.refresh_inflight.remove(key);
                drop(inner);

                if let Err(e) = self.repository.delete_many(&[key.to_string()]).await {
                    warn!(key, error = %e, "Failed to delete expired entry");
                }
                Lookup::expired()
            }
            Freshness::Miss => Lookup::miss(),
        }
    }

    /// Store a value under the given policy. Overwrites atomically per key.
    pub async fn put(&self, key: impl Into<String>, value: Bytes, policy: CachePolicy) -> Result<()> {
        self.put_entry(CacheWrite::new(key, value, policy)).await
    }

    /// Store a value with dependencies, pinning, or a refresh source.
    pub async fn put_entry(&self, write: CacheWrite) -> Result<()> {
        let now = self.clock.now_ms();
        let entry = write.into_entry(now);
        let key = entry.key.clone();

        let mut inner = self.inner.write().await;

        if let Some(previous) = inner.entries.pop(&key) {
            if !previous.pinned {
                inner.budget_used -= previous.size_bytes();
            }
        }
        if !entry.pinned {
            inner.budget_used += entry.size_bytes();
        }
        inner.entries.put(key.clone(), entry.clone());
        inner.refresh_inflight.remove(&key);

        let evicted = self.evict_over_budget(&mut inner);
        drop(inner);

        self.repository.upsert(&entry).await?;
        if !evicted.is_empty() {
            let keys: Vec<String> = evicted.iter().map(|(k, _)| k.clone()).collect();
            self.repository.delete_many(&keys).await?;
            for (key, size_bytes) in evicted {
                debug!(key, size_bytes, "Evicted cache entry under budget pressure");
                self.events
                    .emit(EngineEvent::Cache(CacheEvent::Evicted {
                        key,
                        size_bytes: size_bytes as u64,
                    }))
                    .ok();
            }
        }

        Ok(())
    }

    /// Remove a key. With `cascade`, transitively removes every entry
    /// whose dependencies include an invalidated key. Returns the number
    /// of entries removed.
    pub async fn invalidate(&self, key: &str, cascade: bool) -> Result<u64> {
        let mut inner = self.inner.write().await;

        // The key seeds the set even when it is not resident; dependents
        // of an absent parent still have to go.
        let mut invalidated: HashSet<String> = HashSet::new();
        invalidated.insert(key.to_string());

        if cascade {
            // Fixpoint over the dependency edges; entries only ever point
            // at parents, so each pass can only grow the set.
            loop {
                let mut grew = false;
                let dependents: Vec<String> = inner
                    .entries
                    .iter()
                    .filter(|(k, entry)| {
                        !invalidated.contains(*k)
                            && entry.dependencies.iter().any(|d| invalidated.contains(d))
                    })
                    .map(|(k, _)| k.clone())
                    .collect();
                for k in dependents {
                    grew |= invalidated.insert(k);
                }
                if !grew {
                    break;
                }
            }
        }

        let mut removed: Vec<String> = Vec::new();
        for k in &invalidated {
            if let Some(entry) = inner.entries.pop(k) {
                if !entry.pinned {
                    inner.budget_used -= entry.size_bytes();
                }
                removed.push(k.clone());
            }
            inner.refresh_inflight.remove(k);
        }
        drop(inner);

        if removed.is_empty() {
            return Ok(0);
        }
        self.repository.delete_many(&removed).await?;

        let cascaded = removed.iter().filter(|k| *k != key).count() as u64;
        info!(key, cascaded, "Invalidated cache entry");
        self.events
            .emit(EngineEvent::Cache(CacheEvent::Invalidated {
                key: key.to_string(),
                cascaded,
            }))
            .ok();

        Ok(removed.len() as u64)
    }

    /// Compare a freshly fetched version/ETag against the cached one.
    ///
    /// On a match the entry is re-marked fresh with an updated timestamp
    /// and `true` is returned; the caller skips the payload transfer. On a
    /// mismatch the caller fetches and `put`s the new value.
    pub async fn revalidate(&self, key: &str, remote_tag: &str) -> Result<bool> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.write().await;

        let Some(entry) = inner.entries.get_mut(key) else {
            return Ok(false);
        };

        let matched = entry.policy.revalidation_tag() == Some(remote_tag);
        if matched {
            entry.last_refreshed_at = now;
        }
        drop(inner);

        if matched {
            self.repository.touch(key, now).await?;
            self.events
                .emit(EngineEvent::Cache(CacheEvent::Revalidated {
                    key: key.to_string(),
                }))
                .ok();
        }
        Ok(matched)
    }

    /// Land a background refresh: replace the value, re-mark the entry
    /// fresh, and clear the in-flight marker. The entry's policy,
    /// dependencies, and refresh source are preserved.
    ///
    /// Returns `false` when the entry vanished while the refresh was in
    /// flight (invalidated or evicted); the fetched value is discarded.
    pub async fn complete_refresh(&self, key: &str, value: Bytes) -> Result<bool> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.write().await;
        inner.refresh_inflight.remove(key);

        let Some(entry) = inner.entries.get_mut(key) else {
            return Ok(false);
        };

        let old_size = entry.size_bytes();
        entry.value = value;
        entry.last_refreshed_at = now;
        let entry = entry.clone();

        if !entry.pinned {
            inner.budget_used = inner.budget_used - old_size + entry.size_bytes();
        }
        let evicted = self.evict_over_budget(&mut inner);
        drop(inner);

        self.repository.upsert(&entry).await?;
        if !evicted.is_empty() {
            let keys: Vec<String> = evicted.iter().map(|(k, _)| k.clone()).collect();
            self.repository.delete_many(&keys).await?;
            for (key, size_bytes) in evicted {
                self.events
                    .emit(EngineEvent::Cache(CacheEvent::Evicted {
                        key,
                        size_bytes: size_bytes as u64,
                    }))
                    .ok();
            }
        }

        Ok(true)
    }

    /// Clear the in-flight marker for a key whose refresh finished without
    /// a `put` (failed or skipped), so a later stale read can reschedule.
    pub async fn refresh_done(&self, key: &str) {
        self.inner.write().await.refresh_inflight.remove(key);
    }

    /// Current statistics.
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        CacheStats {
            entry_count: inner.entries.len(),
            budget_used_bytes: inner.budget_used,
            budget_bytes: self.budget_bytes,
        }
    }

    /// Pop least-recently-used evictable entries until the budget holds.
    /// Returns `(key, size)` pairs for the evicted entries.
    fn evict_over_budget(&self, inner: &mut StoreInner) -> Vec<(String, usize)> {
        let mut evicted = Vec::new();
        let mut unevictable = Vec::new();

        while inner.budget_used > self.budget_bytes {
            match inner.entries.pop_lru() {
                Some((key, entry)) if entry.is_evictable() => {
                    inner.budget_used -= entry.size_bytes();
                    evicted.push((key, entry.size_bytes()));
                }
                Some((key, entry)) => unevictable.push((key, entry)),
                None => break,
            }
        }

        // Unevictable entries go back; their recency position is refreshed,
        // which is harmless since eviction can never touch them.
        for (key, entry) in unevictable {
            inner.entries.put(key, entry);
        }

        evicted
    }
}
