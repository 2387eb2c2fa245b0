//! # regen-kit
//!
//! A regenerating cache: values are computed by a registered callback, stored
//! under a named definition plus a modifier, and rebuilt when they expire or
//! when a bound event fires.
//!
//! ## Features
//!
//! - **Named definitions:** register a callback once, read it anywhere by name
//! - **Soft expiration:** serve the stale value while one refresh runs elsewhere
//! - **Single regenerator:** an advisory lock per entry, built on the backend's
//!   atomic create-if-absent, so concurrent callers never duplicate work
//! - **Event triggers:** bind hooks to policies that pick which entries to rebuild
//! - **Inline or deferred:** regenerate inside the event or hand it to a worker
//! - **Backend agnostic:** in-memory, Redis, Memcached, or your own `CacheBackend`
//!
//! ## Quick Start
//!
//! ```ignore
//! use regen_kit::{CacheConfig, LocalHooks, Modifier, Registry};
//! use regen_kit::backend::InMemoryBackend;
//! use serde_json::Value;
//! use std::time::Duration;
//!
//! // 1. Register definitions
//! let mut builder = Registry::builder(InMemoryBackend::new());
//! builder.register(
//!     "related_posts",
//!     CacheConfig::new()
//!         .callback(|post: Modifier| async move { find_related(post.as_str()).await })
//!         .expiration(Duration::from_secs(3600))
//!         .update_hook("post_updated", |args: &[Value]| {
//!             args.first().and_then(Modifier::from_value)
//!         }),
//! )?;
//! let registry = builder.build();
//!
//! // 2. Wire event triggers
//! let hooks = LocalHooks::new();
//! registry.bind_hooks(&hooks);
//!
//! // 3. Read; a miss regenerates inline
//! let related: Option<Vec<u64>> = registry.get_transient("related_posts", 42u64).await?;
//!
//! // 4. Events regenerate the affected entries
//! hooks.fire("post_updated", vec![42.into()]).await;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod config;
pub mod definition;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod key;
pub mod lock;
pub mod observability;
pub mod record;
pub mod registry;
pub mod serialization;
pub mod worker;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use config::RegistryConfig;
pub use definition::{CacheConfig, CacheDefinition, Modifier, Modifiers, StaleRefresh};
pub use dispatch::{DispatchReport, RegenerationDispatcher};
pub use entry::{CacheEntry, RegenOutcome};
pub use error::{Error, Result};
pub use filter::ReadFilter;
pub use hooks::{HookHost, LocalHooks};
pub use lock::{LockManager, LockToken};
pub use registry::{Registry, RegistryBuilder};
pub use worker::{ChannelWorker, RegenerationJob, RegenerationWorker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
