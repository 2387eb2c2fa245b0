//! One addressable cache entry: a definition plus a modifier.
//!
//! Entries are cheap handles built on demand by the registry and never
//! persisted. Each carries its own [`LockToken`], so two handles for the same
//! key compete for the lock like two independent processes would.

use crate::backend::CacheBackend;
use crate::definition::{CacheDefinition, Modifier, StaleRefresh};
use crate::error::{Error, Result};
use crate::key::StorageKey;
use crate::lock::{LockManager, LockToken};
use crate::observability::RegenMetrics;
use crate::record::{now_millis, CachedRecord, Freshness};
use crate::serialization::{decode_value, deserialize_from_cache, encode_value, serialize_for_cache};
use crate::worker::{RegenerationJob, RegenerationWorker};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// What a regeneration attempt did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegenOutcome {
    /// The callback ran and its value was stored.
    Regenerated,
    /// Another owner holds the lock; nothing was done.
    Contended,
    /// A refresh found a fresh value already stored; nothing was done.
    AlreadyFresh,
}

enum Attempt {
    Regenerated(Vec<u8>),
    Contended,
    AlreadyFresh,
}

impl Attempt {
    fn outcome(self) -> RegenOutcome {
        match self {
            Attempt::Regenerated(_) => RegenOutcome::Regenerated,
            Attempt::Contended => RegenOutcome::Contended,
            Attempt::AlreadyFresh => RegenOutcome::AlreadyFresh,
        }
    }
}

/// Stored state of an entry as seen by a read.
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup {
    Fresh(CachedRecord),
    Stale(CachedRecord),
    /// Nothing stored, hard-expired, or unreadable.
    Missing,
}

/// Handle for `(definition, modifier)`.
#[derive(Clone)]
pub struct CacheEntry<B: CacheBackend> {
    definition: Arc<CacheDefinition>,
    modifier: Modifier,
    key: StorageKey,
    backend: B,
    lock: LockManager<B>,
    token: LockToken,
    worker: Option<Arc<dyn RegenerationWorker>>,
    metrics: Arc<dyn RegenMetrics>,
}

impl<B: CacheBackend> CacheEntry<B> {
    pub fn new(
        definition: Arc<CacheDefinition>,
        modifier: Modifier,
        backend: B,
        worker: Option<Arc<dyn RegenerationWorker>>,
        metrics: Arc<dyn RegenMetrics>,
    ) -> Self {
        let key = definition.storage_key(&modifier);
        let lock = LockManager::new(backend.clone(), key.lock_key(), definition.lock_ttl());

        CacheEntry {
            definition,
            modifier,
            key,
            backend,
            lock,
            token: LockToken::generate(),
            worker,
            metrics,
        }
    }

    /// Replace the generated lock token, e.g. to resume a lock taken earlier.
    pub fn with_token(mut self, token: LockToken) -> Self {
        self.token = token;
        self
    }

    pub fn definition(&self) -> &CacheDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn modifier(&self) -> &Modifier {
        &self.modifier
    }

    pub fn storage_key(&self) -> &StorageKey {
        &self.key
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    pub fn lock(&self) -> &LockManager<B> {
        &self.lock
    }

    /// Read the stored record and classify it. Unreadable records (bad
    /// magic, old schema, corrupt bytes) count as missing so they get
    /// overwritten by the next regeneration.
    pub async fn lookup(&self) -> Result<Lookup> {
        let Some(bytes) = self.backend.get(self.key.as_str()).await? else {
            return Ok(Lookup::Missing);
        };

        let record: CachedRecord = match deserialize_from_cache(&bytes) {
            Ok(record) => record,
            Err(
                e @ (Error::InvalidCacheEntry(_)
                | Error::VersionMismatch { .. }
                | Error::DeserializationError(_)),
            ) => {
                warn!("Discarding unreadable record {}: {}", self.key, e);
                return Ok(Lookup::Missing);
            }
            Err(e) => return Err(e),
        };

        Ok(match record.freshness(now_millis()) {
            Freshness::Fresh => Lookup::Fresh(record),
            Freshness::Stale => Lookup::Stale(record),
            Freshness::Expired => Lookup::Missing,
        })
    }

    /// Current encoded value, regenerating on a miss.
    ///
    /// Returns `Ok(None)` only when nothing is stored and another owner is
    /// already regenerating.
    pub async fn get_raw(&self) -> Result<Option<Vec<u8>>> {
        let name = self.definition.name();
        match self.lookup().await? {
            Lookup::Fresh(record) => {
                self.metrics.record_hit(name, self.modifier.as_str());
                Ok(Some(record.data))
            }
            Lookup::Stale(record) => {
                self.metrics.record_stale(name, self.modifier.as_str());
                self.schedule_refresh();
                Ok(Some(record.data))
            }
            Lookup::Missing => {
                self.metrics.record_miss(name, self.modifier.as_str());
                match self.attempt(false).await? {
                    Attempt::Regenerated(data) => Ok(Some(data)),
                    Attempt::Contended | Attempt::AlreadyFresh => Ok(None),
                }
            }
        }
    }

    /// Current value decoded as `T`.
    ///
    /// # Errors
    /// `Error::DeserializationError` if `T` is not what the callback returns.
    pub async fn get<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.get_raw().await? {
            Some(bytes) => decode_value(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Store `value` with fresh expiry metadata, bypassing the lock.
    pub async fn set<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.set_raw(encode_value(value)?).await
    }

    /// Store already-encoded bytes with fresh expiry metadata.
    pub async fn set_raw(&self, data: Vec<u8>) -> Result<()> {
        let now = now_millis();
        let plan = self.definition.expiry_at(now);
        let record = CachedRecord::new(data, now, plan);
        let bytes = serialize_for_cache(&record)?;

        self.backend
            .set(self.key.as_str(), bytes, plan.backend_ttl)
            .await?;
        debug!("» Stored {} (ttl {:?})", self.key, plan.backend_ttl);
        Ok(())
    }

    /// Regenerate under the lock.
    ///
    /// # Errors
    /// - `Error::RegenerationError` if the callback fails or panics
    /// - `Error::BackendError` if the store fails
    pub async fn regenerate(&self) -> Result<RegenOutcome> {
        Ok(self.attempt(false).await?.outcome())
    }

    /// Regenerate under the lock unless a fresh value is already stored.
    ///
    /// Used for stale refreshes, so a burst of stale reads that each
    /// scheduled a refresh still runs the callback once.
    pub async fn refresh(&self) -> Result<RegenOutcome> {
        Ok(self.attempt(true).await?.outcome())
    }

    async fn attempt(&self, skip_if_fresh: bool) -> Result<Attempt> {
        let name = self.definition.name();
        let modifier = self.modifier.as_str();

        let held = self.lock.owns_lock(&self.token).await?;
        if !held && !self.lock.lock(&self.token).await? {
            self.metrics.record_contention(name, modifier);
            return Ok(Attempt::Contended);
        }

        let result = if skip_if_fresh {
            match self.lookup().await {
                Ok(Lookup::Fresh(_)) => Ok(None),
                Ok(_) => self.run_callback().await.map(Some),
                Err(e) => Err(e),
            }
        } else {
            self.run_callback().await.map(Some)
        };

        if let Err(e) = self.lock.unlock().await {
            warn!("Failed to release lock {}: {}", self.lock.key(), e);
            self.metrics.record_error(name, modifier, &e.to_string());
        }

        match result {
            Ok(Some(data)) => Ok(Attempt::Regenerated(data)),
            Ok(None) => {
                debug!("» {} already fresh, refresh skipped", self.key);
                Ok(Attempt::AlreadyFresh)
            }
            Err(e) => {
                self.metrics.record_error(name, modifier, &e.to_string());
                Err(e)
            }
        }
    }

    async fn run_callback(&self) -> Result<Vec<u8>> {
        let name = self.definition.name();
        let started = Instant::now();

        let callback = Arc::clone(self.definition.callback());
        let modifier = self.modifier.clone();
        let outcome = AssertUnwindSafe(async move { callback(modifier).await })
            .catch_unwind()
            .await;

        let data = match outcome {
            Ok(Ok(data)) => data,
            Ok(Err(e @ Error::RegenerationError { .. })) => return Err(e),
            Ok(Err(e)) => return Err(Error::regeneration(name, self.modifier.as_str(), e)),
            Err(panic) => {
                let message = format!("callback panicked: {}", panic_message(panic.as_ref()));
                return Err(Error::regeneration(name, self.modifier.as_str(), message));
            }
        };

        self.set_raw(data.clone()).await?;
        self.metrics
            .record_regenerated(name, self.modifier.as_str(), started.elapsed());
        Ok(data)
    }

    /// Remove the stored value, bypassing the lock.
    pub async fn invalidate(&self) -> Result<()> {
        self.backend.delete(self.key.as_str()).await?;
        debug!("» Invalidated {}", self.key);
        Ok(())
    }

    /// Alias of [`invalidate`](Self::invalidate).
    pub async fn delete(&self) -> Result<()> {
        self.invalidate().await
    }

    /// Take this handle's lock ahead of a regeneration.
    pub async fn lock_update(&self) -> Result<bool> {
        self.lock.lock(&self.token).await
    }

    /// Release the lock whoever holds it.
    pub async fn unlock_update(&self) -> Result<()> {
        self.lock.unlock().await
    }

    pub async fn is_locked(&self) -> Result<bool> {
        self.lock.is_locked().await
    }

    /// Whether this handle's token holds the lock.
    pub async fn owns_lock(&self) -> Result<bool> {
        self.lock.owns_lock(&self.token).await
    }

    fn schedule_refresh(&self) {
        let route = self.definition.stale_refresh();
        if route == StaleRefresh::Worker {
            if let Some(worker) = &self.worker {
                let job =
                    RegenerationJob::stale_refresh(self.definition.name(), self.modifier.clone());
                if let Err(e) = worker.submit(job) {
                    warn!("Stale refresh of {} not queued: {}", self.key, e);
                    self.metrics.record_error(
                        self.definition.name(),
                        self.modifier.as_str(),
                        &e.to_string(),
                    );
                }
                return;
            }
            warn!("No worker for stale refresh of {}, spawning", self.key);
        }

        let entry = self.clone();
        tokio::spawn(async move {
            match entry.refresh().await {
                Ok(outcome) => debug!("» Stale refresh of {}: {:?}", entry.key, outcome),
                Err(e) => warn!("Stale refresh of {} failed: {}", entry.key, e),
            }
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
