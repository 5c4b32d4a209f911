//! Cache policy and freshness types.
//!
//! A [`CachePolicy`] describes how long a cached value may be served and
//! how it is revalidated; [`Freshness`] is what every lookup reports next
//! to the value. A `get` never silently returns expired data as fresh.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Freshness of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    /// Within the policy's fresh window; safe to use as-is.
    Fresh,
    /// Usable, but a background refresh has been (or should be) scheduled.
    Stale,
    /// Past every usable window. Reported once, then the entry is gone.
    Expired,
    /// No entry for the key.
    Miss,
}

impl Freshness {
    /// Whether the lookup produced a usable value.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Fresh | Self::Stale)
    }
}

/// Caching policy attached to an entry at `put` time.
///
/// Durations are stored as milliseconds so policies round-trip through the
/// persistence layer unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CachePolicy {
    /// Never expires; only explicit invalidation removes it. Not evictable
    /// under capacity pressure.
    Forever,
    /// Fresh for `ttl_ms` after the last refresh, then expired.
    Ttl { ttl_ms: u64 },
    /// Fresh until the coordinator observes a different server version.
    Versioned { version: String },
    /// Fresh until the coordinator observes a different entity tag.
    ETag { etag: String },
    /// Lives purely off its parents; invalidated when any of them is.
    Dependent,
    /// Fresh for `fresh_ms`, then stale (and refreshed in the background)
    /// until `stale_ms`, both measured from the last refresh.
    /// `stale_ms` is the total staleness deadline, not an increment.
    StaleWhileRevalidate { fresh_ms: u64, stale_ms: u64 },
}

impl CachePolicy {
    /// TTL policy from a duration.
    pub fn ttl(ttl: Duration) -> Self {
        Self::Ttl {
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    /// Stale-while-revalidate policy from durations.
    pub fn stale_while_revalidate(fresh: Duration, stale: Duration) -> Self {
        Self::StaleWhileRevalidate {
            fresh_ms: fresh.as_millis() as u64,
            stale_ms: stale.as_millis() as u64,
        }
    }

    /// Freshness of an entry that was last refreshed `age_ms` ago.
    pub fn freshness_at(&self, age_ms: u64) -> Freshness {
        match self {
            Self::Forever | Self::Versioned { .. } | Self::ETag { .. } | Self::Dependent => {
                Freshness::Fresh
            }
            Self::Ttl { ttl_ms } => {
                if age_ms <= *ttl_ms {
                    Freshness::Fresh
                } else {
                    Freshness::Expired
                }
            }
            Self::StaleWhileRevalidate { fresh_ms, stale_ms } => {
                if age_ms <= *fresh_ms {
                    Freshness::Fresh
                } else if age_ms <= *stale_ms {
                    Freshness::Stale
                } else {
                    Freshness::Expired
                }
            }
        }
    }

    /// Whether eviction may remove an entry with this policy.
    pub fn is_evictable(&self) -> bool {
        !matches!(self, Self::Forever)
    }

    /// The comparison tag the coordinator revalidates against, if any.
    pub fn revalidation_tag(&self) -> Option<&str> {
        match self {
            Self::Versioned { version } => Some(version),
            Self::ETag { etag } => Some(etag),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_freshness() {
        let policy = CachePolicy::ttl(Duration::from_secs(10));
        assert_eq!(policy.freshness_at(0), Freshness::Fresh);
        assert_eq!(policy.freshness_at(10_000), Freshness::Fresh);
        assert_eq!(policy.freshness_at(10_001), Freshness::Expired);
    }

    #[test]
    fn swr_windows() {
        // Fresh for 5 minutes, stale until the 60 minute mark.
        let policy =
            CachePolicy::stale_while_revalidate(Duration::from_secs(300), Duration::from_secs(3600));
        assert_eq!(policy.freshness_at(60_000), Freshness::Fresh);
        assert_eq!(policy.freshness_at(360_000), Freshness::Stale);
        assert_eq!(policy.freshness_at(3_660_000), Freshness::Expired);
    }

    #[test]
    fn forever_and_tagged_stay_fresh() {
        assert_eq!(CachePolicy::Forever.freshness_at(u64::MAX), Freshness::Fresh);
        let versioned = CachePolicy::Versioned {
            version: "v7".into(),
        };
        assert_eq!(versioned.freshness_at(u64::MAX), Freshness::Fresh);
        assert_eq!(versioned.revalidation_tag(), Some("v7"));
    }

    #[test]
    fn evictability() {
        assert!(!CachePolicy::Forever.is_evictable());
        assert!(CachePolicy::ttl(Duration::from_secs(1)).is_evictable());
        assert!(CachePolicy::Dependent.is_evictable());
    }

    #[test]
    fn policy_serde_round_trip() {
        let policy = CachePolicy::stale_while_revalidate(
            Duration::from_secs(300),
            Duration::from_secs(3600),
        );
        let json = serde_json::to_string(&policy).unwrap();
        let back: CachePolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }

    #[test]
    fn usable_freshness() {
        assert!(Freshness::Fresh.is_usable());
        assert!(Freshness::Stale.is_usable());
        assert!(!Freshness::Expired.is_usable());
        assert!(!Freshness::Miss.is_usable());
    }
}
