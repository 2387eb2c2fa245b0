//! Metrics hooks for reads and regeneration.
//!
//! Implement [`RegenMetrics`] to feed your monitoring system. Every method
//! has a default that logs through the `log` crate, so an implementation only
//! overrides what it counts. [`NoOpMetrics`] silences everything and is what
//! a registry uses unless told otherwise.
//!
//! ```ignore
//! use regen_kit::observability::RegenMetrics;
//! use std::time::Duration;
//!
//! struct Counters;
//!
//! impl RegenMetrics for Counters {
//!     fn record_regenerated(&self, name: &str, _modifier: &str, took: Duration) {
//!         // histogram!("regen_seconds", "cache" => name).record(took);
//!     }
//! }
//!
//! // let registry = Registry::builder(backend)
//! //     .with_metrics(Arc::new(Counters))
//! //     ...
//! ```
//!
//! Hooks:
//! - `record_hit()` - fresh value served
//! - `record_stale()` - soft-expired value served, refresh scheduled
//! - `record_miss()` - nothing usable stored, regenerating inline
//! - `record_regenerated()` - callback ran and the result was stored
//! - `record_contention()` - lock held elsewhere, regeneration skipped
//! - `record_error()` - any surfaced or swallowed failure

use std::time::Duration;

/// Trait for regeneration metrics collection.
pub trait RegenMetrics: Send + Sync {
    /// A fresh value was served.
    fn record_hit(&self, name: &str, modifier: &str) {
        debug!("Cache HIT: {}[{}]", name, modifier);
    }

    /// A soft-expired value was served while a refresh was scheduled.
    fn record_stale(&self, name: &str, modifier: &str) {
        debug!("Cache STALE: {}[{}]", name, modifier);
    }

    /// No usable value was stored.
    fn record_miss(&self, name: &str, modifier: &str) {
        debug!("Cache MISS: {}[{}]", name, modifier);
    }

    /// A regeneration completed and was stored.
    fn record_regenerated(&self, name: &str, modifier: &str, took: Duration) {
        debug!("Cache REGENERATED: {}[{}] took {:?}", name, modifier, took);
    }

    /// Regeneration skipped because another owner holds the lock.
    fn record_contention(&self, name: &str, modifier: &str) {
        debug!("Cache LOCKED: {}[{}] regenerating elsewhere", name, modifier);
    }

    /// Record an error.
    fn record_error(&self, name: &str, modifier: &str, error: &str) {
        warn!("Cache ERROR for {}[{}]: {}", name, modifier, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl RegenMetrics for NoOpMetrics {
    fn record_hit(&self, _name: &str, _modifier: &str) {}
    fn record_stale(&self, _name: &str, _modifier: &str) {}
    fn record_miss(&self, _name: &str, _modifier: &str) {}
    fn record_regenerated(&self, _name: &str, _modifier: &str, _took: Duration) {}
    fn record_contention(&self, _name: &str, _modifier: &str) {}
    fn record_error(&self, _name: &str, _modifier: &str, _error: &str) {}
}

/// Metrics implementation that only logs (the trait defaults).
#[derive(Clone, Default)]
pub struct LogMetrics;

impl RegenMetrics for LogMetrics {}
