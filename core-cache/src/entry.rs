//! Cache entry model.

use crate::policy::CachePolicy;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Where a stale-while-revalidate entry is refetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSource {
    /// Logical endpoint name, used for circuit breaking.
    pub endpoint: String,
    /// Request path handed to the transport.
    pub path: String,
}

/// A single cached value with its policy and dependency edges.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Bytes,
    pub policy: CachePolicy,
    /// Unix epoch milliseconds when the entry was first stored.
    pub created_at: i64,
    /// Unix epoch milliseconds of the last refresh/revalidation.
    pub last_refreshed_at: i64,
    /// Keys this entry depends on; invalidating any of them (with cascade)
    /// invalidates this entry too.
    pub dependencies: BTreeSet<String>,
    /// Pinned entries are excluded from the capacity budget and never
    /// evicted.
    pub pinned: bool,
    /// Where the coordinator refetches this entry from, when it has a
    /// refreshable policy.
    pub refresh_source: Option<RefreshSource>,
}

impl CacheEntry {
    /// Size charged against the capacity budget.
    pub fn size_bytes(&self) -> usize {
        self.key.len() + self.value.len()
    }

    /// Age relative to the last refresh.
    pub fn age_ms(&self, now_ms: i64) -> u64 {
        (now_ms - self.last_refreshed_at).max(0) as u64
    }

    /// Whether eviction may remove this entry.
    pub fn is_evictable(&self) -> bool {
        !self.pinned && self.policy.is_evictable()
    }
}

/// A pending write, built by callers before handing it to the store.
#[derive(Debug, Clone)]
pub struct CacheWrite {
    pub key: String,
    pub value: Bytes,
    pub policy: CachePolicy,
    pub dependencies: BTreeSet<String>,
    pub pinned: bool,
    pub refresh_source: Option<RefreshSource>,
}

impl CacheWrite {
    pub fn new(key: impl Into<String>, value: Bytes, policy: CachePolicy) -> Self {
        Self {
            key: key.into(),
            value,
            policy,
            dependencies: BTreeSet::new(),
            pinned: false,
            refresh_source: None,
        }
    }

    pub fn depends_on<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(parents.into_iter().map(Into::into));
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    pub fn refreshed_from(mut self, endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        self.refresh_source = Some(RefreshSource {
            endpoint: endpoint.into(),
            path: path.into(),
        });
        self
    }

    pub(crate) fn into_entry(self, now_ms: i64) -> CacheEntry {
        CacheEntry {
            key: self.key,
            value: self.value,
            policy: self.policy,
            created_at: now_ms,
            last_refreshed_at: now_ms,
            dependencies: self.dependencies,
            pinned: self.pinned,
            refresh_source: self.refresh_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn write_builder() {
        let write = CacheWrite::new(
            "products:list",
            Bytes::from_static(b"[]"),
            CachePolicy::ttl(Duration::from_secs(60)),
        )
        .depends_on(["catalog"])
        .refreshed_from("products", "/v1/products");

        let entry = write.into_entry(1_000);
        assert_eq!(entry.created_at, 1_000);
        assert!(entry.dependencies.contains("catalog"));
        assert_eq!(
            entry.refresh_source.as_ref().map(|s| s.endpoint.as_str()),
            Some("products")
        );
    }

    #[test]
    fn entry_accounting() {
        let entry = CacheWrite::new(
            "k",
            Bytes::from_static(b"value"),
            CachePolicy::Forever,
        )
        .into_entry(0);
        assert_eq!(entry.size_bytes(), 1 + 5);
        assert!(!entry.is_evictable());
        assert_eq!(entry.age_ms(2_500), 2_500);
    }
}
