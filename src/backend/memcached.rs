//! Memcached storage backend implementation.

use super::CacheBackend;
use crate::error::{Error, Result};
use crate::record::now_millis;
use async_memcached::AsciiProtocol;
use deadpool_memcached::{Manager, Pool};
use std::time::Duration;

/// Default Memcached connection pool size.
/// Override with MEMCACHED_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: u32 = 16;

/// Configuration for Memcached backend.
#[derive(Clone, Debug)]
pub struct MemcachedConfig {
    pub servers: Vec<String>, // e.g., ["localhost:11211", "cache2:11211"]
    pub connection_timeout: Duration,
    pub pool_size: u32,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        MemcachedConfig {
            servers: vec!["localhost:11211".to_string()],
            connection_timeout: Duration::from_secs(5),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Longest relative expiration memcached accepts; larger values are read as
/// absolute Unix timestamps.
const MAX_RELATIVE_TTL_SECS: u64 = 60 * 60 * 24 * 30;

/// Longest key the ASCII protocol accepts.
const MAX_KEY_LEN: usize = 250;

/// Memcached expiration in whole seconds.
///
/// Memcached reads 0 as "never expires", so sub-second TTLs round up to 1.
/// TTLs past 30 days become absolute timestamps, capped at the largest
/// 32-bit time the server stores.
fn ttl_seconds(ttl: Option<Duration>) -> Option<i64> {
    ttl_seconds_at(ttl, now_millis() / 1000)
}

fn ttl_seconds_at(ttl: Option<Duration>, now_secs: u64) -> Option<i64> {
    ttl.map(|d| {
        let secs = d
            .as_secs()
            .saturating_add(u64::from(d.subsec_nanos() > 0))
            .max(1);
        if secs <= MAX_RELATIVE_TTL_SECS {
            secs as i64
        } else {
            now_secs.saturating_add(secs).min(u64::from(u32::MAX)) as i64
        }
    })
}

/// Reject keys the ASCII protocol cannot carry.
///
/// Plain storage keys embed the modifier verbatim; definitions whose
/// modifiers may contain whitespace or run long should set `hash_key(true)`.
fn check_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(Error::ValidationError(format!(
            "memcached key {:?} must be 1-{} bytes without whitespace or control characters (use hash_key)",
            key, MAX_KEY_LEN
        )));
    }
    Ok(())
}

/// Memcached backend with connection pooling.
///
/// `create_if_absent` maps to the `add` command, which the server only
/// applies when the key is not already stored.
///
/// # Example
///
/// ```no_run
/// # use regen_kit::backend::{MemcachedBackend, MemcachedConfig, CacheBackend};
/// # use regen_kit::error::Result;
/// # async fn example() -> Result<()> {
/// let backend = MemcachedBackend::new(MemcachedConfig::default()).await?;
/// backend.set("key", b"value".to_vec(), None).await?;
/// let value = backend.get("key").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemcachedBackend {
    pool: Pool,
}

impl MemcachedBackend {
    /// Create new Memcached backend from configuration.
    ///
    /// # Errors
    /// Returns `Err` if no server is configured or pool creation fails
    pub async fn new(config: MemcachedConfig) -> Result<Self> {
        // deadpool-memcached Manager takes a single server address
        let addr = config
            .servers
            .first()
            .ok_or_else(|| Error::ConfigError("No memcached servers specified".to_string()))?
            .clone();

        let manager = Manager::new(addr.clone());

        let pool = Pool::builder(manager)
            .max_size(config.pool_size as usize)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create connection pool: {}", e)))?;

        info!(
            "✓ Memcached backend initialized with server: {} (pool size: {})",
            addr, config.pool_size
        );

        Ok(MemcachedBackend { pool })
    }

    /// Create from server address directly.
    ///
    /// Pool size is determined by:
    /// 1. `MEMCACHED_POOL_SIZE` environment variable (if set)
    /// 2. `DEFAULT_POOL_SIZE` constant (16)
    ///
    /// # Errors
    /// Returns `Err` if connection pool creation fails
    pub async fn from_server(addr: String) -> Result<Self> {
        let pool_size = std::env::var("MEMCACHED_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let config = MemcachedConfig {
            servers: vec![addr],
            pool_size,
            ..Default::default()
        };
        Self::new(config).await
    }
}

impl CacheBackend for MemcachedBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        let mut conn = self.pool.get().await.map_err(|e| {
            Error::BackendError(format!("Failed to get Memcached connection: {}", e))
        })?;

        match conn.get(key).await {
            Ok(Some(value)) => {
                debug!("✓ Memcached GET {} -> HIT", key);
                Ok(value.data)
            }
            Ok(None) => {
                debug!("✓ Memcached GET {} -> MISS", key);
                Ok(None)
            }
            Err(e) => Err(Error::BackendError(format!(
                "Memcached GET failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        check_key(key)?;
        let mut conn = self.pool.get().await.map_err(|e| {
            Error::BackendError(format!("Failed to get Memcached connection: {}", e))
        })?;

        conn.set(key, value.as_slice(), ttl_seconds(ttl), None)
            .await
            .map_err(|e| {
                Error::BackendError(format!("Memcached SET failed for key {}: {}", key, e))
            })?;

        if let Some(d) = ttl {
            debug!("✓ Memcached SET {} (TTL: {:?})", key, d);
        } else {
            debug!("✓ Memcached SET {}", key);
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        check_key(key)?;
        let mut conn = self.pool.get().await.map_err(|e| {
            Error::BackendError(format!("Failed to get Memcached connection: {}", e))
        })?;

        match conn.delete(key).await {
            Ok(()) => {}
            // Deleting an absent key is a no-op for callers
            Err(e) if e.to_string().to_lowercase().contains("not found") => {}
            Err(e) => {
                return Err(Error::BackendError(format!(
                    "Memcached DELETE failed for key {}: {}",
                    key, e
                )))
            }
        }

        debug!("✓ Memcached DELETE {}", key);
        Ok(())
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        check_key(key)?;
        let mut conn = self.pool.get().await.map_err(|e| {
            Error::BackendError(format!("Failed to get Memcached connection: {}", e))
        })?;

        match conn.add(key, value.as_slice(), ttl_seconds(ttl), None).await {
            Ok(()) => {
                debug!("✓ Memcached ADD {} -> CREATED", key);
                Ok(true)
            }
            Err(e) if e.to_string().to_lowercase().contains("not stored") => {
                debug!("✓ Memcached ADD {} -> EXISTS", key);
                Ok(false)
            }
            Err(e) => Err(Error::BackendError(format!(
                "Memcached ADD failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        // Memcached doesn't have native EXISTS, use get to check
        Ok(self.get(key).await?.is_some())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.pool.get().await {
            Ok(mut conn) => match conn.get("__health_check__").await {
                Ok(_) => Ok(true),
                Err(_) => Ok(false),
            },
            Err(_) => Ok(false),
        }
    }

    async fn clear_all(&self) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| {
            Error::BackendError(format!("Failed to get Memcached connection: {}", e))
        })?;

        conn.flush_all()
            .await
            .map_err(|e| Error::BackendError(format!("Memcached FLUSH_ALL failed: {}", e)))?;

        warn!("⚠ Memcached FLUSH_ALL executed - all entries cleared!");
        Ok(())
    }
}
