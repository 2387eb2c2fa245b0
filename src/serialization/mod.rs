//! Postcard-based serialization with versioned envelopes.
//!
//! Two layers are stored for every cache entry:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (4 bytes)│ POSTCARD CachedRecord             │
//! └─────────────────┴─────────────────┴──────────────────────────────────┘
//!   "RKIT"              u32                 { data, expiry metadata }
//! ```
//!
//! `CachedRecord::data` is itself the postcard encoding of whatever the
//! regeneration callback returned ([`encode_value`]). The registry is
//! type-erased, so the value type is only known again when a caller asks
//! for it with [`decode_value`].
//!
//! # Example
//!
//! ```rust
//! use regen_kit::serialization::{serialize_for_cache, deserialize_from_cache};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Forecast {
//!     city: String,
//!     high: i32,
//! }
//!
//! # fn main() -> regen_kit::Result<()> {
//! let forecast = Forecast { city: "nyc".to_string(), high: 21 };
//! let bytes = serialize_for_cache(&forecast)?;
//! let back: Forecast = deserialize_from_cache(&bytes)?;
//! assert_eq!(forecast, back);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic header for regen-kit records: b"RKIT"
pub const CACHE_MAGIC: [u8; 4] = *b"RKIT";

/// Current schema version of the stored record layout.
///
/// Increment when `CachedRecord` changes shape. Records with another
/// version are treated as absent and regenerated.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope for stored records.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be b"RKIT"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// The wrapped record
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    /// Create a new envelope with current magic and version.
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Serialize a value with envelope for storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn serialize_for_cache<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        log::error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Deserialize a value from storage, validating magic and version.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: Invalid magic header
/// - `Error::VersionMismatch`: Schema version mismatch
/// - `Error::DeserializationError`: Corrupted Postcard payload
pub fn deserialize_from_cache<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let envelope: CacheEnvelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        log::error!("Cache deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        log::warn!(
            "Invalid cache entry: expected magic {:?}, got {:?}",
            CACHE_MAGIC,
            envelope.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        log::warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION,
            envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}

/// Encode a callback value into the bytes kept in `CachedRecord::data`.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| Error::SerializationError(e.to_string()))
}

/// Decode bytes produced by [`encode_value`] as `T`.
///
/// # Errors
///
/// Returns `Error::DeserializationError` if the bytes are not a `T`.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(|e| {
        Error::DeserializationError(format!(
            "stored value is not a {}: {}",
            std::any::type_name::<T>(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct Forecast {
        city: String,
        high: i32,
        sunny: bool,
    }

    fn forecast() -> Forecast {
        Forecast {
            city: "nyc".to_string(),
            high: 21,
            sunny: true,
        }
    }

    #[test]
    fn test_roundtrip() {
        let bytes = serialize_for_cache(&forecast()).unwrap();
        let back: Forecast = deserialize_from_cache(&bytes).unwrap();
        assert_eq!(back, forecast());
    }

    #[test]
    fn test_envelope_structure() {
        let bytes = serialize_for_cache(&forecast()).unwrap();
        let envelope: CacheEnvelope<Forecast> = postcard::from_bytes(&bytes).unwrap();

        assert_eq!(envelope.magic, CACHE_MAGIC);
        assert_eq!(envelope.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(envelope.payload, forecast());
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let envelope = CacheEnvelope {
            magic: *b"CKIT",
            version: CURRENT_SCHEMA_VERSION,
            payload: forecast(),
        };
        let bytes = postcard::to_allocvec(&envelope).unwrap();

        let result: Result<Forecast> = deserialize_from_cache(&bytes);
        assert!(matches!(result, Err(Error::InvalidCacheEntry(_))));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut envelope = CacheEnvelope::new(forecast());
        envelope.version = 999;

        let bytes = postcard::to_allocvec(&envelope).unwrap();
        let result: Result<Forecast> = deserialize_from_cache(&bytes);

        match result {
            Err(Error::VersionMismatch { expected, found }) => {
                assert_eq!(expected, CURRENT_SCHEMA_VERSION);
                assert_eq!(found, 999);
            }
            other => panic!("Expected VersionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let mut bytes = serialize_for_cache(&forecast()).unwrap();
        bytes.truncate(bytes.len() / 2);

        let result: Result<Forecast> = deserialize_from_cache(&bytes);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn test_value_codec_type_mismatch() {
        let bytes = encode_value(&"not a forecast").unwrap();
        let result: Result<Forecast> = decode_value(&bytes);
        assert!(matches!(result, Err(Error::DeserializationError(_))));

        let text: String = decode_value(&bytes).unwrap();
        assert_eq!(text, "not a forecast");
    }
}
