//! Freshness policy for cached upstream responses.
//!
//! A policy classifies an entry's age into fresh, stale, or expired.
//! The stale ceiling may be unbounded, in which case stale data is served
//! indefinitely until a background revalidation succeeds.

use std::time::Duration;

/// How long an entry may be served past its freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleMaxAge {
    /// Stale grace ends `Duration` after freshness expiry. A zero duration
    /// means no stale window at all.
    Bounded(Duration),
    /// Stale data is served forever while revalidation keeps failing.
    Unbounded,
}

impl StaleMaxAge {
    /// Parse the configuration convention: negative seconds mean unbounded.
    pub fn from_config_seconds(seconds: i64) -> Self {
        if seconds < 0 {
            Self::Unbounded
        } else {
            Self::Bounded(Duration::from_secs(seconds as u64))
        }
    }
}

/// Per-route stale-while-revalidate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwrPolicy {
    /// Time after `stored_at` during which the entry is fresh.
    pub max_age: Duration,
    /// Additional time during which the entry is served while a refresh
    /// runs in the background.
    pub stale_max_age: StaleMaxAge,
}

/// Classification of an entry's age under a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

impl SwrPolicy {
    pub fn new(max_age: Duration, stale_max_age: StaleMaxAge) -> Self {
        Self {
            max_age,
            stale_max_age,
        }
    }

    /// Classify an entry age. Both window boundaries are inclusive, so an
    /// entry hitting `max_age` exactly is still fresh and a request storm at
    /// the boundary instant does not fan out to the upstream.
    pub fn classify(&self, age: Duration) -> Freshness {
        if age <= self.max_age {
            return Freshness::Fresh;
        }
        match self.stale_max_age {
            StaleMaxAge::Unbounded => Freshness::Stale,
            StaleMaxAge::Bounded(grace) => {
                if age <= self.max_age.saturating_add(grace) {
                    Freshness::Stale
                } else {
                    Freshness::Expired
                }
            }
        }
    }
}
