//! Storage key resolution.
//!
//! A cache entry is addressed by `(prefix, modifier)`. Plain keys are
//! `"{prefix}:{modifier}"`; hashed keys are the SHA-256 hex digest of that
//! same string, which keeps backend keys at a fixed 64 characters (Memcached
//! caps keys at 250 bytes).
//!
//! Prefixes are restricted to [`is_valid_prefix`] characters, so the first
//! `:` of a plain key always ends the prefix and two distinct pairs can never
//! resolve to the same key. Lock keys use `~lock`, which contains a character
//! no data key can have, so lock records never collide with values.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;

const LOCK_SUFFIX: &str = "~lock";

/// Check that a storage prefix only uses `[A-Za-z0-9_.-]` and is non-empty.
pub fn is_valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Validate a storage prefix, describing the problem on failure.
///
/// # Errors
/// Returns `Error::RegistrationError` for empty prefixes or disallowed characters.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if is_valid_prefix(prefix) {
        Ok(())
    } else {
        Err(Error::RegistrationError(format!(
            "storage key prefix {:?} must be non-empty and use only [A-Za-z0-9_.-]",
            prefix
        )))
    }
}

/// Builder for storage keys.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Plain key: `"{prefix}:{modifier}"`.
    ///
    /// The modifier is embedded verbatim. `MemcachedBackend` rejects keys with
    /// whitespace, control characters or more than 250 bytes; use hashed keys
    /// there.
    pub fn build(prefix: &str, modifier: &str) -> String {
        format!("{}:{}", prefix, modifier)
    }

    /// Hashed key: hex SHA-256 of the plain key.
    pub fn build_hashed(prefix: &str, modifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(Self::build(prefix, modifier).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Lock key for the same pair.
    pub fn build_lock(prefix: &str, modifier: &str, hashed: bool) -> String {
        if hashed {
            format!("{}{}", Self::build_hashed(prefix, modifier), LOCK_SUFFIX)
        } else {
            format!("{}{}:{}", prefix, LOCK_SUFFIX, modifier)
        }
    }
}

/// Resolved backend keys for one `(prefix, modifier)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageKey {
    value: String,
    lock: String,
}

impl StorageKey {
    /// Resolve the value and lock keys.
    pub fn resolve(prefix: &str, modifier: &str, hashed: bool) -> Self {
        let value = if hashed {
            CacheKeyBuilder::build_hashed(prefix, modifier)
        } else {
            CacheKeyBuilder::build(prefix, modifier)
        };

        StorageKey {
            value,
            lock: CacheKeyBuilder::build_lock(prefix, modifier, hashed),
        }
    }

    /// Key holding the cached record.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Key holding the advisory lock.
    pub fn lock_key(&self) -> &str {
        &self.lock
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}
