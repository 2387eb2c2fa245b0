//! Cache definitions and their registration options.
//!
//! A [`CacheConfig`] is what callers hand to
//! [`RegistryBuilder::register`](crate::registry::RegistryBuilder::register);
//! the registry validates it into an immutable [`CacheDefinition`].

use crate::error::{Error, Result};
use crate::key::{validate_prefix, StorageKey};
use crate::lock::DEFAULT_LOCK_TTL;
use crate::record::ExpiryPlan;
use crate::serialization::encode_value;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Name of the engine every registry starts with.
pub const DEFAULT_ENGINE: &str = "default";

/// Regeneration callback, type-erased to encoded bytes.
pub type RegenerateFn = Arc<dyn Fn(Modifier) -> BoxFuture<'static, Result<Vec<u8>>> + Send + Sync>;

/// Policy callback mapping raw event arguments to modifiers.
pub type PolicyFn = Arc<dyn Fn(&[Value]) -> Modifiers + Send + Sync>;

/// Disambiguates instances of one definition, typically a record ID.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Modifier(String);

impl Modifier {
    pub fn new(modifier: impl Into<String>) -> Self {
        Modifier(modifier.into())
    }

    /// Modifier from an event argument: strings as-is, numbers and booleans
    /// in their JSON form. Arrays, objects and null have no modifier.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Modifier(s.clone())),
            Value::Number(n) => Some(Modifier(n.to_string())),
            Value::Bool(b) => Some(Modifier(b.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Modifier {
    fn from(s: &str) -> Self {
        Modifier(s.to_string())
    }
}

impl From<String> for Modifier {
    fn from(s: String) -> Self {
        Modifier(s)
    }
}

impl From<&String> for Modifier {
    fn from(s: &String) -> Self {
        Modifier(s.clone())
    }
}

macro_rules! modifier_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Modifier {
            fn from(id: $t) -> Self {
                Modifier(id.to_string())
            }
        })*
    };
}

modifier_from_int!(u32, u64, i32, i64, usize);

/// What a policy callback decided for one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Modifiers {
    /// Nothing to regenerate.
    Skip,
    /// Regenerate a single entry.
    One(Modifier),
    /// Regenerate each entry independently.
    Many(Vec<Modifier>),
}

impl Modifiers {
    pub fn into_vec(self) -> Vec<Modifier> {
        match self {
            Modifiers::Skip => Vec::new(),
            Modifiers::One(m) => vec![m],
            Modifiers::Many(ms) => ms,
        }
    }
}

impl<M: Into<Modifier>> From<Option<M>> for Modifiers {
    fn from(m: Option<M>) -> Self {
        match m {
            Some(m) => Modifiers::One(m.into()),
            None => Modifiers::Skip,
        }
    }
}

/// How a soft-expired read schedules its refresh.
///
/// The stale value is always returned immediately; this only decides who
/// runs the regeneration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StaleRefresh {
    /// Worker when the definition has `async_updates`, otherwise `Spawn`.
    #[default]
    Auto,
    /// Background task on the current tokio runtime.
    Spawn,
    /// Submit to the registry's worker.
    Worker,
}

impl FromStr for StaleRefresh {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StaleRefresh::Auto),
            "spawn" => Ok(StaleRefresh::Spawn),
            "worker" => Ok(StaleRefresh::Worker),
            other => Err(Error::ConfigError(format!(
                "unknown stale refresh mode {:?} (expected auto, spawn or worker)",
                other
            ))),
        }
    }
}

/// One `(hook → policy)` binding.
#[derive(Clone)]
pub struct UpdateHook {
    pub hook: String,
    /// `None` regenerates the empty modifier on every fire.
    pub policy: Option<PolicyFn>,
}

impl fmt::Debug for UpdateHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateHook")
            .field("hook", &self.hook)
            .field("policy", &self.policy.is_some())
            .finish()
    }
}

/// Registration options for a cache definition.
///
/// # Example
///
/// ```ignore
/// use regen_kit::{CacheConfig, Modifier, Modifiers};
/// use std::time::Duration;
///
/// let config = CacheConfig::new()
///     .callback(|city: Modifier| async move { fetch_forecast(city.as_str()).await })
///     .expiration(Duration::from_secs(3600))
///     .update_hook("forecast_published", |args| {
///         args.first().and_then(Modifier::from_value).into()
///     });
/// ```
#[derive(Clone)]
pub struct CacheConfig {
    /// Storage key prefix; defaults to the definition name.
    pub key: Option<String>,
    /// Hash `(prefix, modifier)` into a fixed-length key.
    pub hash_key: bool,
    /// Storage engine name.
    pub cache_type: String,
    /// Regeneration callback. Required.
    pub callback: Option<RegenerateFn>,
    /// Regenerate through the worker instead of inline on events.
    pub async_updates: bool,
    /// Ordered, one binding per hook name.
    pub update_hooks: Vec<UpdateHook>,
    /// Lifetime of a regenerated value. `None` = never expires.
    pub expiration: Option<Duration>,
    /// Serve values past `expiration` while refreshing them.
    pub soft_expiration: bool,
    /// With soft expiration: how long past the soft expiry a stale value may
    /// still be served. `None` = until replaced.
    pub stale_window: Option<Duration>,
    /// Refresh route for stale reads; `None` = registry default.
    pub stale_refresh: Option<StaleRefresh>,
    /// Lock TTL for this definition; `None` = registry default.
    pub lock_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            key: None,
            hash_key: false,
            cache_type: DEFAULT_ENGINE.to_string(),
            callback: None,
            async_updates: false,
            update_hooks: Vec::new(),
            expiration: None,
            soft_expiration: false,
            stale_window: None,
            stale_refresh: None,
            lock_ttl: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, prefix: impl Into<String>) -> Self {
        self.key = Some(prefix.into());
        self
    }

    /// Store under the SHA-256 of the plain key. Required on Memcached when
    /// modifiers can contain whitespace or push the key past 250 bytes.
    pub fn hash_key(mut self, hash: bool) -> Self {
        self.hash_key = hash;
        self
    }

    pub fn cache_type(mut self, engine: impl Into<String>) -> Self {
        self.cache_type = engine.into();
        self
    }

    /// Set the regeneration callback.
    ///
    /// The returned value is encoded with postcard when stored; read it back
    /// with the same type through `get_transient`.
    pub fn callback<F, Fut, T>(mut self, callback: F) -> Self
    where
        F: Fn(Modifier) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        self.callback = Some(Arc::new(move |modifier: Modifier| {
            let fut = callback(modifier);
            async move {
                let value = fut.await?;
                encode_value(&value)
            }
            .boxed()
        }));
        self
    }

    pub fn async_updates(mut self, enabled: bool) -> Self {
        self.async_updates = enabled;
        self
    }

    /// Bind `hook` with a policy callback. Rebinding a hook replaces its
    /// policy in place.
    pub fn update_hook<P, M>(self, hook: impl Into<String>, policy: P) -> Self
    where
        P: Fn(&[Value]) -> M + Send + Sync + 'static,
        M: Into<Modifiers>,
    {
        let policy: PolicyFn = Arc::new(move |args: &[Value]| policy(args).into());
        self.bind(hook.into(), Some(policy))
    }

    /// Bind `hook` without a policy: every fire regenerates the empty modifier.
    pub fn update_hook_always(self, hook: impl Into<String>) -> Self {
        self.bind(hook.into(), None)
    }

    fn bind(mut self, hook: String, policy: Option<PolicyFn>) -> Self {
        match self.update_hooks.iter_mut().find(|h| h.hook == hook) {
            Some(existing) => existing.policy = policy,
            None => self.update_hooks.push(UpdateHook { hook, policy }),
        }
        self
    }

    pub fn expiration(mut self, ttl: Duration) -> Self {
        self.expiration = Some(ttl);
        self
    }

    pub fn soft_expiration(mut self, enabled: bool) -> Self {
        self.soft_expiration = enabled;
        self
    }

    pub fn stale_window(mut self, window: Duration) -> Self {
        self.stale_window = Some(window);
        self
    }

    pub fn stale_refresh(mut self, mode: StaleRefresh) -> Self {
        self.stale_refresh = Some(mode);
        self
    }

    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }
}

impl From<Modifier> for Modifiers {
    fn from(m: Modifier) -> Self {
        Modifiers::One(m)
    }
}

impl From<Vec<Modifier>> for Modifiers {
    fn from(ms: Vec<Modifier>) -> Self {
        Modifiers::Many(ms)
    }
}

/// A validated, immutable cache definition.
#[derive(Clone)]
pub struct CacheDefinition {
    name: String,
    prefix: String,
    hash_key: bool,
    cache_type: String,
    callback: RegenerateFn,
    async_updates: bool,
    update_hooks: Vec<UpdateHook>,
    expiration: Option<Duration>,
    soft_expiration: bool,
    stale_window: Option<Duration>,
    stale_refresh: Option<StaleRefresh>,
    lock_ttl: Option<Duration>,
}

impl CacheDefinition {
    /// Validate a registration.
    ///
    /// # Errors
    /// `Error::RegistrationError` when the callback is missing, the prefix
    /// is invalid, or soft expiration is enabled without an expiration.
    pub fn from_config(name: &str, config: CacheConfig) -> Result<Self> {
        let callback = config.callback.ok_or_else(|| {
            Error::RegistrationError(format!(
                "{}: a regeneration callback is required",
                name
            ))
        })?;

        let prefix = config.key.unwrap_or_else(|| name.to_string());
        validate_prefix(&prefix)?;

        if config.soft_expiration && config.expiration.is_none() {
            return Err(Error::RegistrationError(format!(
                "{}: soft expiration needs an expiration",
                name
            )));
        }

        Ok(CacheDefinition {
            name: name.to_string(),
            prefix,
            hash_key: config.hash_key,
            cache_type: config.cache_type,
            callback,
            async_updates: config.async_updates,
            update_hooks: config.update_hooks,
            expiration: config.expiration,
            soft_expiration: config.soft_expiration,
            stale_window: config.stale_window,
            stale_refresh: config.stale_refresh,
            lock_ttl: config.lock_ttl,
        })
    }

    /// Fill registry-wide defaults for options left unset.
    pub(crate) fn apply_defaults(&mut self, lock_ttl: Duration, stale_refresh: StaleRefresh) {
        self.lock_ttl.get_or_insert(lock_ttl);
        self.stale_refresh.get_or_insert(stale_refresh);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn hash_key(&self) -> bool {
        self.hash_key
    }

    pub fn cache_type(&self) -> &str {
        &self.cache_type
    }

    pub fn callback(&self) -> &RegenerateFn {
        &self.callback
    }

    pub fn async_updates(&self) -> bool {
        self.async_updates
    }

    pub fn update_hooks(&self) -> &[UpdateHook] {
        &self.update_hooks
    }

    /// Policy bound to `hook`, if the hook is bound at all.
    pub fn update_hook(&self, hook: &str) -> Option<&UpdateHook> {
        self.update_hooks.iter().find(|h| h.hook == hook)
    }

    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }

    pub fn soft_expiration(&self) -> bool {
        self.soft_expiration
    }

    pub fn stale_window(&self) -> Option<Duration> {
        self.stale_window
    }

    /// Effective stale refresh route with `Auto` resolved.
    pub fn stale_refresh(&self) -> StaleRefresh {
        match self.stale_refresh.unwrap_or_default() {
            StaleRefresh::Auto if self.async_updates => StaleRefresh::Worker,
            StaleRefresh::Auto => StaleRefresh::Spawn,
            explicit => explicit,
        }
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl.unwrap_or(DEFAULT_LOCK_TTL)
    }

    /// Whether anything about this definition needs the async worker.
    pub fn needs_worker(&self) -> bool {
        self.async_updates || self.stale_refresh == Some(StaleRefresh::Worker)
    }

    pub fn storage_key(&self, modifier: &Modifier) -> StorageKey {
        StorageKey::resolve(&self.prefix, modifier.as_str(), self.hash_key)
    }

    /// Expiry metadata for a value written at `now_ms`.
    pub fn expiry_at(&self, now_ms: u64) -> ExpiryPlan {
        ExpiryPlan::compute(
            now_ms,
            self.expiration,
            self.soft_expiration,
            self.stale_window,
        )
    }
}

impl fmt::Debug for CacheDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheDefinition")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("hash_key", &self.hash_key)
            .field("cache_type", &self.cache_type)
            .field("async_updates", &self.async_updates)
            .field("update_hooks", &self.update_hooks)
            .field("expiration", &self.expiration)
            .field("soft_expiration", &self.soft_expiration)
            .field("stale_window", &self.stale_window)
            .field("stale_refresh", &self.stale_refresh)
            .field("lock_ttl", &self.lock_ttl)
            .finish()
    }
}
