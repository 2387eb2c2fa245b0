//! Read-path filters for [`Registry::get_transient`](crate::Registry::get_transient).
//!
//! A [`ReadFilter`] can redirect a read to another definition, rewrite the
//! modifier, or replace the value handed back to the caller. Every method
//! defaults to passing its input through, so an implementation only
//! overrides what it changes.
//!
//! ```ignore
//! use regen_kit::filter::ReadFilter;
//! use regen_kit::Modifier;
//!
//! /// Every locale shares one forecast.
//! struct StripLocale;
//!
//! impl ReadFilter for StripLocale {
//!     fn modifier(&self, modifier: Modifier, name: &str) -> Modifier {
//!         match (name, modifier.as_str().split_once('@')) {
//!             ("weather", Some((city, _locale))) => Modifier::new(city),
//!             _ => modifier,
//!         }
//!     }
//! }
//!
//! // let registry = builder.with_read_filter(Arc::new(StripLocale)).build();
//! ```
//!
//! Values are the encoded callback output; use
//! [`encode_value`](crate::serialization::encode_value) and
//! [`decode_value`](crate::serialization::decode_value) to inspect or replace
//! them. Filters only apply to `get_transient`, never to regeneration,
//! events or the worker.

use crate::definition::Modifier;

/// Rewrites applied around a `get_transient` read.
pub trait ReadFilter: Send + Sync {
    /// Definition to read. Sees the caller's modifier.
    fn name(&self, name: String, _modifier: &Modifier) -> String {
        name
    }

    /// Modifier to read. Sees the caller's definition name.
    fn modifier(&self, modifier: Modifier, _name: &str) -> Modifier {
        modifier
    }

    /// Value returned to the caller, after the lookup. Sees the filtered name
    /// and modifier.
    fn result(
        &self,
        value: Option<Vec<u8>>,
        _name: &str,
        _modifier: &Modifier,
    ) -> Option<Vec<u8>> {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::entry::Lookup;
    use crate::serialization::encode_value;
    use crate::{CacheConfig, Error, LockToken, Registry};
    use std::sync::Arc;

    struct Passthrough;

    impl ReadFilter for Passthrough {}

    /// `forecast` is an alias for `weather`, and cities are case-insensitive.
    struct Aliases;

    impl ReadFilter for Aliases {
        fn name(&self, name: String, _modifier: &Modifier) -> String {
            if name == "forecast" {
                "weather".to_string()
            } else {
                name
            }
        }

        fn modifier(&self, modifier: Modifier, name: &str) -> Modifier {
            if name == "forecast" || name == "weather" {
                Modifier::new(modifier.as_str().to_lowercase())
            } else {
                modifier
            }
        }
    }

    /// Substitutes a placeholder while a value is being regenerated elsewhere.
    struct Placeholder;

    impl ReadFilter for Placeholder {
        fn result(
            &self,
            value: Option<Vec<u8>>,
            name: &str,
            modifier: &Modifier,
        ) -> Option<Vec<u8>> {
            value.or_else(|| encode_value(&format!("pending {}[{}]", name, modifier)).ok())
        }
    }

    fn registry(filters: Vec<Arc<dyn ReadFilter>>) -> Registry<InMemoryBackend> {
        let mut builder = Registry::builder(InMemoryBackend::new());
        for filter in filters {
            builder = builder.with_read_filter(filter);
        }
        builder
            .register(
                "weather",
                CacheConfig::new()
                    .callback(|city: Modifier| async move { Ok(format!("sunny in {}", city)) }),
            )
            .expect("Failed to register");
        builder.build()
    }

    #[tokio::test]
    async fn test_passthrough_filter_changes_nothing() {
        let registry = registry(vec![Arc::new(Passthrough)]);

        let value: Option<String> = registry.get_transient("weather", "nyc").await.unwrap();
        assert_eq!(value.as_deref(), Some("sunny in nyc"));
    }

    #[tokio::test]
    async fn test_name_and_modifier_rewrite() {
        let registry = registry(vec![Arc::new(Aliases)]);

        let value: Option<String> = registry.get_transient("forecast", "NYC").await.unwrap();
        assert_eq!(value.as_deref(), Some("sunny in nyc"));

        // Same entry as the canonical read
        let entry = registry.entry("weather", "nyc").unwrap();
        assert!(matches!(entry.lookup().await.unwrap(), Lookup::Fresh(_)));

        // Unfiltered names still fail the usual way
        assert!(matches!(
            registry.get_transient::<String>("traffic", "nyc").await,
            Err(Error::UnknownDefinition(_))
        ));
    }

    #[tokio::test]
    async fn test_result_filter_fills_contended_read() {
        let registry = registry(vec![Arc::new(Aliases), Arc::new(Placeholder)]);

        let entry = registry.entry("weather", "nyc").unwrap();
        let holder = LockToken::generate();
        assert!(entry.lock().lock(&holder).await.unwrap());

        let value: Option<String> = registry.get_transient("forecast", "NYC").await.unwrap();
        assert_eq!(value.as_deref(), Some("pending weather[nyc]"));
    }
}
