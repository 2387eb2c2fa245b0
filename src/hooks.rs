//! Wiring definitions to named events.
//!
//! The crate does not own an event system. It needs one thing from the host:
//! a way to attach a listener to a named hook ([`HookHost`]). Calling
//! [`Registry::bind_hooks`] attaches exactly one listener per
//! `(definition, hook)` pair; each listener feeds the raw event arguments to
//! a [`RegenerationDispatcher`].
//!
//! [`LocalHooks`] is a minimal in-process host for applications without an
//! event bus of their own, and for tests.

use crate::backend::CacheBackend;
use crate::dispatch::RegenerationDispatcher;
use crate::registry::Registry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Raw, ordered event arguments.
pub type EventArgs = Vec<Value>;

/// A hook listener.
pub type Listener = Arc<dyn Fn(EventArgs) -> BoxFuture<'static, ()> + Send + Sync>;

/// Something listeners can be attached to by hook name.
pub trait HookHost {
    fn add_listener(&self, hook: &str, listener: Listener);
}

/// One `(definition, hook)` pair attached by [`Registry::bind_hooks`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerBinding {
    pub definition: String,
    pub hook: String,
}

/// In-process hook host.
#[derive(Clone, Default)]
pub struct LocalHooks {
    listeners: Arc<DashMap<String, Vec<Listener>>>,
}

impl LocalHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `hook`, awaiting every listener in attach order.
    ///
    /// Returns how many listeners ran.
    pub async fn fire(&self, hook: &str, args: EventArgs) -> usize {
        // Clone out so no map guard is held across awaits
        let listeners = match self.listeners.get(hook) {
            Some(listeners) => listeners.clone(),
            None => {
                debug!("» Hook {} fired with no listeners", hook);
                return 0;
            }
        };

        for listener in &listeners {
            listener(args.clone()).await;
        }
        listeners.len()
    }

    pub fn listener_count(&self, hook: &str) -> usize {
        self.listeners.get(hook).map(|l| l.len()).unwrap_or(0)
    }
}

impl HookHost for LocalHooks {
    fn add_listener(&self, hook: &str, listener: Listener) {
        self.listeners
            .entry(hook.to_string())
            .or_default()
            .push(listener);
    }
}

impl<B: CacheBackend> Registry<B> {
    /// Attach one listener per `(definition, hook)` binding to `host`.
    ///
    /// Only the first call binds anything; later calls return an empty list
    /// so listeners are never attached twice.
    pub fn bind_hooks<H: HookHost + ?Sized>(&self, host: &H) -> Vec<TriggerBinding> {
        if self.hooks_bound().swap(true, Ordering::SeqCst) {
            warn!("Hooks already bound for this registry, ignoring");
            return Vec::new();
        }

        let mut bound = Vec::new();
        for definition in self.definitions() {
            for binding in definition.update_hooks() {
                let dispatcher = Arc::new(RegenerationDispatcher::new(
                    self.clone(),
                    definition.name(),
                    binding.hook.as_str(),
                    binding.policy.clone(),
                ));

                let listener: Listener = Arc::new(move |args: EventArgs| {
                    let dispatcher = Arc::clone(&dispatcher);
                    async move {
                        dispatcher.handle(&args).await;
                    }
                    .boxed()
                });
                host.add_listener(&binding.hook, listener);

                bound.push(TriggerBinding {
                    definition: definition.name().to_string(),
                    hook: binding.hook.clone(),
                });
            }
        }

        info!("✓ Bound {} cache trigger(s)", bound.len());
        bound
    }
}
