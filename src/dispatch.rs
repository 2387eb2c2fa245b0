//! Turning hook fires into regenerations.
//!
//! A [`RegenerationDispatcher`] serves one `(definition, hook)` binding. On
//! every fire it asks the binding's policy which modifiers are affected and
//! then, per modifier, either regenerates inline or submits a job to the
//! worker. Failures end up in the [`DispatchReport`], the log and the
//! metrics; they never escape into the code that fired the hook.

use crate::backend::CacheBackend;
use crate::definition::{Modifier, Modifiers, PolicyFn};
use crate::entry::RegenOutcome;
use crate::error::{Error, Result};
use crate::registry::Registry;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Summary of one hook fire for one definition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Regenerated inline.
    pub regenerated: Vec<Modifier>,
    /// Skipped because another owner held the lock.
    pub contended: Vec<Modifier>,
    /// Handed to the worker.
    pub submitted: Vec<Modifier>,
    /// Modifier and error message.
    pub failed: Vec<(Modifier, String)>,
}

impl DispatchReport {
    /// True when the policy selected nothing.
    pub fn is_empty(&self) -> bool {
        self.attempts() == 0
    }

    pub fn attempts(&self) -> usize {
        self.regenerated.len() + self.contended.len() + self.submitted.len() + self.failed.len()
    }
}

/// Dispatcher for one `(definition, hook)` binding.
#[derive(Clone)]
pub struct RegenerationDispatcher<B: CacheBackend> {
    registry: Registry<B>,
    name: String,
    hook: String,
    policy: Option<PolicyFn>,
}

impl<B: CacheBackend> RegenerationDispatcher<B> {
    pub fn new(
        registry: Registry<B>,
        name: impl Into<String>,
        hook: impl Into<String>,
        policy: Option<PolicyFn>,
    ) -> Self {
        RegenerationDispatcher {
            registry,
            name: name.into(),
            hook: hook.into(),
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hook(&self) -> &str {
        &self.hook
    }

    /// Modifiers the policy selects for `args`.
    ///
    /// Without a policy the empty modifier is selected. A panicking policy
    /// selects nothing.
    pub fn modifiers_for(&self, args: &[Value]) -> Modifiers {
        let Some(policy) = &self.policy else {
            return Modifiers::One(Modifier::default());
        };

        match catch_unwind(AssertUnwindSafe(|| policy(args))) {
            Ok(modifiers) => modifiers,
            Err(_) => {
                error!(
                    "✗ Policy for {} on {} panicked, skipping",
                    self.name, self.hook
                );
                self.registry
                    .metrics()
                    .record_error(&self.name, "", "policy callback panicked");
                Modifiers::Skip
            }
        }
    }

    /// Handle one fire of the hook.
    pub async fn handle(&self, args: &[Value]) -> DispatchReport {
        let mut report = DispatchReport::default();

        let modifiers = self.modifiers_for(args).into_vec();
        if modifiers.is_empty() {
            debug!("» {} on {}: nothing to regenerate", self.name, self.hook);
            return report;
        }

        let async_updates = match self.registry.definition(&self.name) {
            Ok(definition) => definition.async_updates(),
            Err(e) => {
                error!("✗ {} on {}: {}", self.name, self.hook, e);
                report
                    .failed
                    .extend(modifiers.into_iter().map(|m| (m, e.to_string())));
                return report;
            }
        };

        for modifier in modifiers {
            if async_updates {
                match self.registry.submit(&self.name, modifier.clone()) {
                    Ok(()) => report.submitted.push(modifier),
                    Err(e) => self.fail(&mut report, modifier, e),
                }
                continue;
            }

            match self.registry.regenerate(&self.name, modifier.clone()).await {
                Ok(RegenOutcome::Regenerated) => report.regenerated.push(modifier),
                Ok(RegenOutcome::Contended | RegenOutcome::AlreadyFresh) => {
                    report.contended.push(modifier)
                }
                Err(e) => self.fail(&mut report, modifier, e),
            }
        }

        debug!(
            "» {} on {}: {} regenerated, {} contended, {} submitted, {} failed",
            self.name,
            self.hook,
            report.regenerated.len(),
            report.contended.len(),
            report.submitted.len(),
            report.failed.len()
        );
        report
    }

    fn fail(&self, report: &mut DispatchReport, modifier: Modifier, e: Error) {
        warn!(
            "✗ {}[{}] on {} failed: {}",
            self.name, modifier, self.hook, e
        );
        self.registry
            .metrics()
            .record_error(&self.name, modifier.as_str(), &e.to_string());
        report.failed.push((modifier, e.to_string()));
    }
}

impl<B: CacheBackend> Registry<B> {
    /// Dispatcher for `name` bound to `hook`.
    ///
    /// # Errors
    /// - `Error::UnknownDefinition` for an unregistered name
    /// - `Error::ValidationError` if `hook` is not bound for that definition
    pub fn dispatcher(&self, name: &str, hook: &str) -> Result<RegenerationDispatcher<B>> {
        let definition = self.definition(name)?;
        let binding = definition.update_hook(hook).ok_or_else(|| {
            Error::ValidationError(format!("{} is not bound to hook {}", name, hook))
        })?;

        Ok(RegenerationDispatcher::new(
            self.clone(),
            name,
            hook,
            binding.policy.clone(),
        ))
    }

    /// Run the `(name, hook)` binding directly, as if `hook` fired with `args`.
    pub async fn dispatch(&self, name: &str, hook: &str, args: &[Value]) -> Result<DispatchReport> {
        Ok(self.dispatcher(name, hook)?.handle(args).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::definition::CacheConfig;
    use crate::worker::ChannelWorker;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(calls: &Arc<AtomicUsize>) -> CacheConfig {
        let calls = Arc::clone(calls);
        CacheConfig::new().callback(move |m: Modifier| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(m.to_string())
            }
        })
    }

    #[tokio::test]
    async fn test_skip_regenerates_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Registry::builder(InMemoryBackend::new());
        builder
            .register(
                "related",
                counting(&calls).update_hook("post_updated", |_args: &[Value]| Modifiers::Skip),
            )
            .unwrap();
        let registry = builder.build();

        let report = registry
            .dispatch("related", "post_updated", &[json!(42)])
            .await
            .unwrap();
        assert!(report.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_many_regenerates_each() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Registry::builder(InMemoryBackend::new());
        builder
            .register(
                "related",
                counting(&calls).update_hook("terms_changed", |args: &[Value]| {
                    Modifiers::Many(args.iter().filter_map(Modifier::from_value).collect())
                }),
            )
            .unwrap();
        let registry = builder.build();

        let report = registry
            .dispatch("related", "terms_changed", &[json!(1), json!(2), json!(3)])
            .await
            .unwrap();
        assert_eq!(report.regenerated.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stored: Option<String> = registry.get_transient("related", 2u64).await.unwrap();
        assert_eq!(stored.as_deref(), Some("2"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_policy_uses_empty_modifier() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Registry::builder(InMemoryBackend::new());
        builder
            .register("totals", counting(&calls).update_hook_always("post_saved"))
            .unwrap();
        let registry = builder.build();

        let report = registry.dispatch("totals", "post_saved", &[]).await.unwrap();
        assert_eq!(report.regenerated, vec![Modifier::default()]);
    }

    #[tokio::test]
    async fn test_contended_and_failed_are_reported() {
        let mut builder = Registry::builder(InMemoryBackend::new());
        builder
            .register(
                "flaky",
                CacheConfig::new()
                    .callback(|m: Modifier| async move {
                        if m.as_str() == "bad" {
                            Err(Error::Other("no data".to_string()))
                        } else {
                            Ok(1u8)
                        }
                    })
                    .update_hook("tick", |args: &[Value]| {
                        Modifiers::Many(args.iter().filter_map(Modifier::from_value).collect())
                    }),
            )
            .unwrap();
        let registry = builder.build();

        let holder = registry.entry("flaky", "busy").unwrap();
        assert!(holder.lock_update().await.unwrap());

        let report = registry
            .dispatch("flaky", "tick", &[json!("ok"), json!("busy"), json!("bad")])
            .await
            .expect("dispatch itself never fails");

        assert_eq!(report.regenerated, vec![Modifier::from("ok")]);
        assert_eq!(report.contended, vec![Modifier::from("busy")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, Modifier::from("bad"));
        assert_eq!(report.attempts(), 3);
    }

    #[tokio::test]
    async fn test_async_definition_submits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (worker, mut jobs) = ChannelWorker::channel();
        let mut builder = Registry::builder(InMemoryBackend::new()).with_worker(Arc::new(worker));
        builder
            .register(
                "related",
                counting(&calls)
                    .async_updates(true)
                    .update_hook("post_updated", |args: &[Value]| {
                        args.first().and_then(Modifier::from_value)
                    }),
            )
            .unwrap();
        let registry = builder.build();

        let report = registry
            .dispatch("related", "post_updated", &[json!(42)])
            .await
            .unwrap();
        assert_eq!(report.submitted, vec![Modifier::from(42u64)]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let job = jobs.recv().await.unwrap();
        registry.run_job(&job).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_policy_is_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Registry::builder(InMemoryBackend::new());
        builder
            .register(
                "related",
                counting(&calls).update_hook("post_updated", |args: &[Value]| -> Modifiers {
                    let id = args[5].as_u64().unwrap();
                    Modifiers::One(id.into())
                }),
            )
            .unwrap();
        let registry = builder.build();

        let report = registry
            .dispatch("related", "post_updated", &[json!(1)])
            .await
            .unwrap();
        assert!(report.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unbound_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = Registry::builder(InMemoryBackend::new());
        builder.register("related", counting(&calls)).unwrap();
        let registry = builder.build();

        let result = registry.dispatch("related", "post_updated", &[]).await;
        assert!(matches!(result, Err(Error::ValidationError(_))));
    }
}
