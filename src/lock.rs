//! Per-entry advisory lock built on the storage backend.
//!
//! A lock is a short-lived record under the entry's lock key whose value is
//! the owner's [`LockToken`]. Acquisition is a single `create_if_absent`
//! attempt: no spinning, no waiting. A holder that dies without unlocking is
//! recovered when the record's TTL runs out, so the TTL has to cover a
//! typical regeneration but stay short enough to bound staleness.

use crate::backend::CacheBackend;
use crate::error::{Error, Result};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Default lock TTL.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Identifier proving ownership of a lock.
///
/// The empty token (`LockToken::default()`) never owns any lock; it is how a
/// caller asks "does *someone else* hold this?".
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Fresh unique token (time-ordered UUID).
    pub fn generate() -> Self {
        LockToken(Uuid::now_v7().to_string())
    }

    /// Wrap an existing identifier.
    pub fn new(token: impl Into<String>) -> Self {
        LockToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Advisory lock for one storage key.
#[derive(Clone)]
pub struct LockManager<B: CacheBackend> {
    backend: B,
    key: String,
    ttl: Duration,
}

impl<B: CacheBackend> LockManager<B> {
    pub fn new(backend: B, key: impl Into<String>, ttl: Duration) -> Self {
        LockManager {
            backend,
            key: key.into(),
            ttl,
        }
    }

    /// Try once to take the lock for `token`.
    ///
    /// Returns `Ok(false)` when an unexpired lock already exists, whoever
    /// owns it.
    ///
    /// # Errors
    /// - `Error::ValidationError` for an empty token
    /// - `Error::BackendError` if the store fails
    pub async fn lock(&self, token: &LockToken) -> Result<bool> {
        if token.is_empty() {
            return Err(Error::ValidationError(
                "cannot lock with an empty token".to_string(),
            ));
        }

        let acquired = self
            .backend
            .create_if_absent(&self.key, token.as_str().as_bytes().to_vec(), Some(self.ttl))
            .await?;

        if acquired {
            debug!("» Lock {} acquired (ttl {:?})", self.key, self.ttl);
        } else {
            debug!("» Lock {} already held", self.key);
        }
        Ok(acquired)
    }

    /// Whether any unexpired lock exists.
    pub async fn is_locked(&self) -> Result<bool> {
        self.backend.exists(&self.key).await
    }

    /// Whether the stored lock belongs to `token`.
    pub async fn owns_lock(&self, token: &LockToken) -> Result<bool> {
        if token.is_empty() {
            return Ok(false);
        }

        let stored = self.backend.get(&self.key).await?;
        Ok(stored.as_deref() == Some(token.as_str().as_bytes()))
    }

    /// Remove the lock regardless of owner. Idempotent.
    pub async fn unlock(&self) -> Result<()> {
        self.backend.delete(&self.key).await?;
        debug!("» Lock {} released", self.key);
        Ok(())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
