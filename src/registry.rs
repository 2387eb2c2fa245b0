//! Registry of cache definitions.
//!
//! Definitions are registered once through [`RegistryBuilder`] and are
//! immutable afterwards. [`Registry`] wraps everything in an `Arc`, so it is
//! cheap to clone into handlers, listeners and the worker task.
//!
//! ```ignore
//! use regen_kit::{CacheConfig, Modifier, Registry};
//! use regen_kit::backend::InMemoryBackend;
//! use std::time::Duration;
//!
//! let mut builder = Registry::builder(InMemoryBackend::new());
//! builder.register(
//!     "weather",
//!     CacheConfig::new()
//!         .callback(|city: Modifier| async move { fetch_forecast(city.as_str()).await })
//!         .expiration(Duration::from_secs(3600)),
//! )?;
//! let registry = builder.build();
//!
//! let forecast: Option<Forecast> = registry.get_transient("weather", "nyc").await?;
//! ```

use crate::backend::CacheBackend;
use crate::config::RegistryConfig;
use crate::definition::{CacheConfig, CacheDefinition, Modifier, DEFAULT_ENGINE};
use crate::entry::{CacheEntry, RegenOutcome};
use crate::error::{Error, Result};
use crate::filter::ReadFilter;
use crate::observability::{NoOpMetrics, RegenMetrics};
use crate::serialization::decode_value;
use crate::worker::{RegenerationJob, RegenerationWorker};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// How an engine addresses its entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// Keys are global; the empty modifier is a valid entry.
    Shared,
    /// Entries hang off a record, so the modifier (record ID) is required.
    RecordAttached,
}

#[derive(Clone)]
struct Engine<B> {
    backend: B,
    kind: EngineKind,
}

/// Collects engines and definitions, then freezes them into a [`Registry`].
pub struct RegistryBuilder<B: CacheBackend> {
    engines: HashMap<String, Engine<B>>,
    definitions: BTreeMap<String, Arc<CacheDefinition>>,
    /// `(engine, prefix, hashed)` already claimed, and by which definition.
    namespaces: HashMap<(String, String, bool), String>,
    config: RegistryConfig,
    metrics: Arc<dyn RegenMetrics>,
    worker: Option<Arc<dyn RegenerationWorker>>,
    read_filters: Vec<Arc<dyn ReadFilter>>,
}

impl<B: CacheBackend> RegistryBuilder<B> {
    /// Start with `backend` as the [`DEFAULT_ENGINE`].
    pub fn new(backend: B) -> Self {
        let mut engines = HashMap::new();
        engines.insert(
            DEFAULT_ENGINE.to_string(),
            Engine {
                backend,
                kind: EngineKind::Shared,
            },
        );

        RegistryBuilder {
            engines,
            definitions: BTreeMap::new(),
            namespaces: HashMap::new(),
            config: RegistryConfig::default(),
            metrics: Arc::new(NoOpMetrics),
            worker: None,
            read_filters: Vec::new(),
        }
    }

    /// Add (or replace) a shared engine selectable through `cache_type`.
    pub fn with_engine(mut self, name: impl Into<String>, backend: B) -> Self {
        self.engines.insert(
            name.into(),
            Engine {
                backend,
                kind: EngineKind::Shared,
            },
        );
        self
    }

    /// Add (or replace) a record-attached engine.
    pub fn with_record_engine(mut self, name: impl Into<String>, backend: B) -> Self {
        self.engines.insert(
            name.into(),
            Engine {
                backend,
                kind: EngineKind::RecordAttached,
            },
        );
        self
    }

    /// Registry-wide defaults. Applies to definitions registered afterwards.
    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn RegenMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_worker(mut self, worker: Arc<dyn RegenerationWorker>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Append a [`ReadFilter`] to the `get_transient` chain. Filters run in
    /// the order they were added.
    pub fn with_read_filter(mut self, filter: Arc<dyn ReadFilter>) -> Self {
        self.read_filters.push(filter);
        self
    }

    /// Validate and add a definition.
    ///
    /// # Errors
    /// `Error::RegistrationError` when the callback is missing, the name is
    /// taken, the prefix is invalid or already used by another definition on
    /// the same engine, the engine was never added, or the definition needs a
    /// worker and none is configured. Nothing is registered on error.
    pub fn register(&mut self, name: impl Into<String>, config: CacheConfig) -> Result<&mut Self> {
        let name = name.into();

        if self.definitions.contains_key(&name) {
            return Err(Error::RegistrationError(format!(
                "{} is already registered",
                name
            )));
        }

        let mut definition = CacheDefinition::from_config(&name, config)?;
        definition.apply_defaults(self.config.lock_ttl, self.config.default_stale_refresh);

        if !self.engines.contains_key(definition.cache_type()) {
            return Err(Error::RegistrationError(format!(
                "{}: unknown storage engine {:?}",
                name,
                definition.cache_type()
            )));
        }

        if definition.needs_worker() && self.worker.is_none() {
            return Err(Error::RegistrationError(format!(
                "{}: async updates need a worker (RegistryBuilder::with_worker)",
                name
            )));
        }

        let namespace = (
            definition.cache_type().to_string(),
            definition.prefix().to_string(),
            definition.hash_key(),
        );
        if let Some(owner) = self.namespaces.get(&namespace) {
            return Err(Error::RegistrationError(format!(
                "{}: key prefix {:?} on engine {:?} is already used by {}",
                name,
                definition.prefix(),
                definition.cache_type(),
                owner
            )));
        }

        info!(
            "✓ Registered cache {} (engine {}, async {}, {} hook(s))",
            name,
            definition.cache_type(),
            definition.async_updates(),
            definition.update_hooks().len()
        );
        self.namespaces.insert(namespace, name.clone());
        self.definitions.insert(name, Arc::new(definition));
        Ok(self)
    }

    pub fn build(self) -> Registry<B> {
        Registry {
            inner: Arc::new(RegistryInner {
                engines: self.engines,
                definitions: self.definitions,
                config: self.config,
                metrics: self.metrics,
                worker: self.worker,
                read_filters: self.read_filters,
                hooks_bound: AtomicBool::new(false),
            }),
        }
    }
}

struct RegistryInner<B> {
    engines: HashMap<String, Engine<B>>,
    definitions: BTreeMap<String, Arc<CacheDefinition>>,
    config: RegistryConfig,
    metrics: Arc<dyn RegenMetrics>,
    worker: Option<Arc<dyn RegenerationWorker>>,
    read_filters: Vec<Arc<dyn ReadFilter>>,
    hooks_bound: AtomicBool,
}

/// Immutable set of cache definitions and the engines behind them.
#[derive(Clone)]
pub struct Registry<B: CacheBackend> {
    inner: Arc<RegistryInner<B>>,
}

impl<B: CacheBackend> Registry<B> {
    pub fn builder(backend: B) -> RegistryBuilder<B> {
        RegistryBuilder::new(backend)
    }

    /// # Errors
    /// `Error::UnknownDefinition` if nothing is registered under `name`.
    pub fn definition(&self, name: &str) -> Result<&Arc<CacheDefinition>> {
        self.inner
            .definitions
            .get(name)
            .ok_or_else(|| Error::UnknownDefinition(name.to_string()))
    }

    /// All definitions, ordered by name.
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<CacheDefinition>> {
        self.inner.definitions.values()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Arc<dyn RegenMetrics> {
        &self.inner.metrics
    }

    pub(crate) fn hooks_bound(&self) -> &AtomicBool {
        &self.inner.hooks_bound
    }

    /// Handle for `(name, modifier)`.
    ///
    /// # Errors
    /// - `Error::UnknownDefinition` for an unregistered name
    /// - `Error::ValidationError` for an empty modifier on a record-attached engine
    pub fn entry(&self, name: &str, modifier: impl Into<Modifier>) -> Result<CacheEntry<B>> {
        let definition = self.definition(name)?;
        let modifier = modifier.into();

        let engine = self
            .inner
            .engines
            .get(definition.cache_type())
            .ok_or_else(|| {
                Error::ConfigError(format!(
                    "{}: engine {:?} missing",
                    name,
                    definition.cache_type()
                ))
            })?;

        if engine.kind == EngineKind::RecordAttached && modifier.is_empty() {
            return Err(Error::ValidationError(format!(
                "{}: engine {:?} needs a record ID as modifier",
                name,
                definition.cache_type()
            )));
        }

        Ok(CacheEntry::new(
            Arc::clone(definition),
            modifier,
            engine.backend.clone(),
            self.inner.worker.clone(),
            Arc::clone(&self.inner.metrics),
        ))
    }

    /// Read a cached value, regenerating it if missing.
    ///
    /// Registered [`ReadFilter`]s may rewrite the name and modifier before the
    /// lookup and the encoded value after it.
    ///
    /// `Ok(None)` means nothing is stored yet and another owner is already
    /// regenerating it.
    ///
    /// # Errors
    /// - `Error::UnknownDefinition` for an unregistered name
    /// - `Error::RegenerationError` if an inline regeneration fails
    /// - `Error::DeserializationError` if `T` does not match the callback's type
    /// - `Error::BackendError` if the store fails
    pub async fn get_transient<T: DeserializeOwned>(
        &self,
        name: &str,
        modifier: impl Into<Modifier>,
    ) -> Result<Option<T>> {
        let modifier = modifier.into();
        if self.inner.read_filters.is_empty() {
            return self.entry(name, modifier)?.get().await;
        }

        let (name, modifier) = self.filter_request(name, modifier);
        let entry = self.entry(&name, modifier)?;
        let mut value = entry.get_raw().await?;
        for filter in &self.inner.read_filters {
            value = filter.result(value, &name, entry.modifier());
        }

        match value {
            Some(bytes) => decode_value(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// The name rewrite sees the requested modifier and the modifier rewrite
    /// sees the requested name.
    fn filter_request(&self, name: &str, modifier: Modifier) -> (String, Modifier) {
        let mut filtered_name = name.to_string();
        for filter in &self.inner.read_filters {
            filtered_name = filter.name(filtered_name, &modifier);
        }

        let mut filtered_modifier = modifier;
        for filter in &self.inner.read_filters {
            filtered_modifier = filter.modifier(filtered_modifier, name);
        }

        if filtered_name != name {
            debug!("Read filter renamed {} to {}", name, filtered_name);
        }
        (filtered_name, filtered_modifier)
    }

    /// Overwrite a cached value without running the callback.
    pub async fn set_transient<T: Serialize + ?Sized>(
        &self,
        name: &str,
        modifier: impl Into<Modifier>,
        value: &T,
    ) -> Result<()> {
        self.entry(name, modifier)?.set(value).await
    }

    /// Regenerate now, under the entry lock.
    pub async fn regenerate(
        &self,
        name: &str,
        modifier: impl Into<Modifier>,
    ) -> Result<RegenOutcome> {
        self.entry(name, modifier)?.regenerate().await
    }

    /// Drop a cached value; the next read regenerates.
    pub async fn invalidate(&self, name: &str, modifier: impl Into<Modifier>) -> Result<()> {
        self.entry(name, modifier)?.invalidate().await
    }

    /// Hand `(name, modifier)` to the worker.
    ///
    /// # Errors
    /// `Error::WorkerError` if no worker is configured or it refuses the job.
    pub fn submit(&self, name: &str, modifier: impl Into<Modifier>) -> Result<()> {
        let definition = self.definition(name)?;
        let worker = self
            .inner
            .worker
            .as_ref()
            .ok_or_else(|| Error::WorkerError("no worker configured".to_string()))?;
        worker.submit(RegenerationJob::new(definition.name(), modifier))
    }

    /// Execute a job taken from the worker.
    pub async fn run_job(&self, job: &RegenerationJob) -> Result<RegenOutcome> {
        let entry = self.entry(&job.name, job.modifier.clone())?;
        if job.only_if_stale {
            entry.refresh().await
        } else {
            entry.regenerate().await
        }
    }
}
