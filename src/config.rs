//! Registry-wide defaults.

use crate::definition::StaleRefresh;
use crate::error::{Error, Result};
use crate::lock::DEFAULT_LOCK_TTL;
use std::time::Duration;

/// Environment variable overriding [`RegistryConfig::lock_ttl`], in milliseconds.
pub const LOCK_TTL_ENV: &str = "REGEN_LOCK_TTL_MS";

/// Environment variable overriding [`RegistryConfig::default_stale_refresh`].
pub const STALE_REFRESH_ENV: &str = "REGEN_STALE_REFRESH";

/// Defaults applied to definitions that leave an option unset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Lock TTL. Must cover a typical regeneration.
    pub lock_ttl: Duration,
    pub default_stale_refresh: StaleRefresh,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            lock_ttl: DEFAULT_LOCK_TTL,
            default_stale_refresh: StaleRefresh::Auto,
        }
    }
}

impl RegistryConfig {
    /// Defaults overridden by `REGEN_LOCK_TTL_MS` and `REGEN_STALE_REFRESH`.
    ///
    /// # Errors
    /// `Error::ConfigError` if a variable is set but unparseable.
    pub fn from_env() -> Result<Self> {
        let mut config = RegistryConfig::default();

        if let Ok(raw) = std::env::var(LOCK_TTL_ENV) {
            config.lock_ttl = parse_lock_ttl(&raw)?;
        }
        if let Ok(raw) = std::env::var(STALE_REFRESH_ENV) {
            config.default_stale_refresh = raw.parse()?;
        }

        Ok(config)
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_stale_refresh(mut self, mode: StaleRefresh) -> Self {
        self.default_stale_refresh = mode;
        self
    }
}

fn parse_lock_ttl(raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(Error::ConfigError(format!("{} must be positive", LOCK_TTL_ENV))),
        Ok(ms) => Ok(Duration::from_millis(ms)),
        Err(e) => Err(Error::ConfigError(format!(
            "{}={:?} is not a number of milliseconds: {}",
            LOCK_TTL_ENV, raw, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.lock_ttl, Duration::from_secs(30));
        assert_eq!(config.default_stale_refresh, StaleRefresh::Auto);
    }

    #[test]
    fn test_builder() {
        let config = RegistryConfig::default()
            .with_lock_ttl(Duration::from_secs(5))
            .with_stale_refresh(StaleRefresh::Spawn);
        assert_eq!(config.lock_ttl, Duration::from_secs(5));
        assert_eq!(config.default_stale_refresh, StaleRefresh::Spawn);
    }

    #[test]
    fn test_parse_lock_ttl() {
        assert_eq!(parse_lock_ttl("1500").unwrap(), Duration::from_millis(1500));
        assert!(matches!(parse_lock_ttl("0"), Err(Error::ConfigError(_))));
        assert!(matches!(parse_lock_ttl("30s"), Err(Error::ConfigError(_))));
    }
}
