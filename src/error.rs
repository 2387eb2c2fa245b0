//! Error types for regen-kit.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the regeneration cache.
///
/// Lock contention is deliberately absent: losing the race for a lock is a
/// normal outcome reported as `Ok(None)` by the entry and as
/// `DispatchReport::contended` by the dispatcher.
#[derive(Debug, Clone)]
pub enum Error {
    /// A cache definition could not be registered.
    ///
    /// Raised synchronously by `RegistryBuilder::register` when:
    /// - the regeneration callback is missing
    /// - the name is already registered
    /// - the storage key prefix contains characters outside `[A-Za-z0-9_.-]`
    /// - the selected storage engine was never added to the builder
    /// - async updates are requested but no worker is configured
    RegistrationError(String),

    /// No cache definition is registered under this name.
    UnknownDefinition(String),

    /// The regeneration callback failed or panicked.
    ///
    /// The entry lock is always released before this is returned.
    RegenerationError {
        /// Definition name
        name: String,
        /// Modifier being regenerated
        modifier: String,
        /// Callback failure message
        message: String,
    },

    /// Serialization failed when encoding a value or record.
    SerializationError(String),

    /// Deserialization failed when decoding stored bytes.
    ///
    /// Also returned when a caller asks `get_transient` for a type that
    /// does not match what the callback produced.
    DeserializationError(String),

    /// Invalid stored record: bad magic or corrupted envelope.
    InvalidCacheEntry(String),

    /// Stored record was written with a different schema version.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from stored record)
        found: u32,
    },

    /// Backend storage error (Redis, Memcached, etc).
    ///
    /// Surfaced to the immediate caller; nothing here retries.
    BackendError(String),

    /// Input rejected before touching storage (e.g. empty record ID for a
    /// record-attached engine).
    ValidationError(String),

    /// The async worker refused a job (channel closed).
    WorkerError(String),

    /// Configuration error during initialization.
    ConfigError(String),

    /// Feature not implemented or not enabled.
    NotImplemented(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Build a `RegenerationError` from anything displayable.
    pub fn regeneration(name: &str, modifier: &str, message: impl fmt::Display) -> Self {
        Error::RegenerationError {
            name: name.to_string(),
            modifier: modifier.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RegistrationError(msg) => write!(f, "Registration error: {}", msg),
            Error::UnknownDefinition(name) => write!(f, "Unknown cache definition: {}", name),
            Error::RegenerationError {
                name,
                modifier,
                message,
            } => write!(
                f,
                "Regeneration of {}[{}] failed: {}",
                name, modifier, message
            ),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => write!(
                f,
                "Cache version mismatch: expected {}, found {}",
                expected, found
            ),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::WorkerError(msg) => write!(f, "Worker error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_data() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(format!("Redis error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::RegistrationError("weather: callback is required".to_string());
        assert_eq!(
            err.to_string(),
            "Registration error: weather: callback is required"
        );
    }

    #[test]
    fn test_regeneration_error_display() {
        let err = Error::regeneration("weather", "nyc", "upstream timed out");
        assert_eq!(
            err.to_string(),
            "Regeneration of weather[nyc] failed: upstream timed out"
        );
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_error_from_json_syntax() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::DeserializationError(_)));
    }
}
