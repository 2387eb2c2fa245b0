//! Stored cache records and expiry bookkeeping.
//!
//! Every value is written together with its expiry metadata so freshness can
//! be decided on read, independently of whatever TTL the backend enforces.
//!
//! - Without soft expiration the value is gone at `now + expiration`.
//! - With soft expiration the value turns *stale* at `now + expiration` and
//!   is only gone after the stale window (or never, without one).

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn add_millis(base: u64, d: Duration) -> u64 {
    base.saturating_add(d.as_millis().min(u64::MAX as u128) as u64)
}

/// Expiry metadata for one write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiryPlan {
    pub soft_expires_at: Option<u64>,
    pub hard_expires_at: Option<u64>,
    /// TTL handed to the backend so it can evict on its own.
    pub backend_ttl: Option<Duration>,
}

impl ExpiryPlan {
    pub fn compute(
        now_ms: u64,
        expiration: Option<Duration>,
        soft_expiration: bool,
        stale_window: Option<Duration>,
    ) -> Self {
        match (expiration, soft_expiration) {
            (None, _) => ExpiryPlan {
                soft_expires_at: None,
                hard_expires_at: None,
                backend_ttl: None,
            },
            (Some(ttl), false) => ExpiryPlan {
                soft_expires_at: None,
                hard_expires_at: Some(add_millis(now_ms, ttl)),
                backend_ttl: Some(ttl),
            },
            (Some(ttl), true) => {
                let soft = add_millis(now_ms, ttl);
                let hard_ttl = stale_window.map(|w| ttl.saturating_add(w));
                ExpiryPlan {
                    soft_expires_at: Some(soft),
                    hard_expires_at: hard_ttl.map(|t| add_millis(now_ms, t)),
                    backend_ttl: hard_ttl,
                }
            }
        }
    }
}

/// Result of checking a record against the clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Past the soft expiry but still servable.
    Stale,
    /// Past the hard expiry; treat as absent.
    Expired,
}

/// What is stored under a value key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CachedRecord {
    /// Postcard-encoded callback result.
    pub data: Vec<u8>,
    pub stored_at: u64,
    pub soft_expires_at: Option<u64>,
    pub hard_expires_at: Option<u64>,
}

impl CachedRecord {
    pub fn new(data: Vec<u8>, stored_at: u64, plan: ExpiryPlan) -> Self {
        CachedRecord {
            data,
            stored_at,
            soft_expires_at: plan.soft_expires_at,
            hard_expires_at: plan.hard_expires_at,
        }
    }

    pub fn freshness(&self, now_ms: u64) -> Freshness {
        if self.hard_expires_at.is_some_and(|at| now_ms >= at) {
            Freshness::Expired
        } else if self.soft_expires_at.is_some_and(|at| now_ms >= at) {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }
}
