//! Deferred regeneration.
//!
//! Definitions with `async_updates` do not regenerate inside the event that
//! triggered them; they hand a [`RegenerationJob`] to a
//! [`RegenerationWorker`] and return. The job only names the definition and
//! modifier, so whoever executes it re-enters the registry through
//! [`Registry::run_job`], which takes the lock like any other regeneration.
//!
//! [`ChannelWorker`] is the in-process implementation: submissions go onto an
//! unbounded tokio channel drained by a [`JobReceiver`] task.
//!
//! ```ignore
//! let (worker, jobs) = ChannelWorker::channel();
//! let mut builder = Registry::builder(backend).with_worker(Arc::new(worker));
//! builder.register("related_posts", config)?;
//! let registry = builder.build();
//! let handle = jobs.spawn(registry.clone());
//! ```

use crate::backend::CacheBackend;
use crate::definition::Modifier;
use crate::error::{Error, Result};
use crate::registry::Registry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A request to regenerate one entry later.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegenerationJob {
    pub name: String,
    pub modifier: Modifier,
    /// Skip the callback if the entry is fresh by the time the job runs.
    pub only_if_stale: bool,
}

impl RegenerationJob {
    /// Unconditional regeneration, as triggered by an event.
    pub fn new(name: impl Into<String>, modifier: impl Into<Modifier>) -> Self {
        RegenerationJob {
            name: name.into(),
            modifier: modifier.into(),
            only_if_stale: false,
        }
    }

    /// Refresh scheduled by a stale read.
    pub fn stale_refresh(name: impl Into<String>, modifier: impl Into<Modifier>) -> Self {
        RegenerationJob {
            only_if_stale: true,
            ..RegenerationJob::new(name, modifier)
        }
    }
}

/// Accepts regeneration jobs for later execution.
///
/// Submission must not block on the regeneration itself. No ordering or
/// deduplication is promised; the entry lock already collapses concurrent
/// runs of the same job.
pub trait RegenerationWorker: Send + Sync {
    fn submit(&self, job: RegenerationJob) -> Result<()>;
}

/// Worker backed by an unbounded tokio channel.
#[derive(Clone, Debug)]
pub struct ChannelWorker {
    tx: mpsc::UnboundedSender<RegenerationJob>,
}

impl ChannelWorker {
    /// Create a worker and the receiver that executes its jobs.
    pub fn channel() -> (ChannelWorker, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelWorker { tx }, JobReceiver { rx })
    }
}

impl RegenerationWorker for ChannelWorker {
    fn submit(&self, job: RegenerationJob) -> Result<()> {
        debug!("» Queueing regeneration {}[{}]", job.name, job.modifier);
        self.tx
            .send(job)
            .map_err(|e| Error::WorkerError(format!("job receiver is gone: {}", e)))
    }
}

/// Receiving half of a [`ChannelWorker`].
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<RegenerationJob>,
}

impl JobReceiver {
    /// Take the next job, `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<RegenerationJob> {
        self.rx.recv().await
    }

    /// Execute jobs until the channel closes.
    ///
    /// Failures are logged and the loop moves on. A registry holding this
    /// receiver's own worker keeps the channel open, so in that setup the
    /// loop runs until its task is aborted.
    pub async fn run<B: CacheBackend>(mut self, registry: Registry<B>) {
        info!("✓ Regeneration worker started");
        while let Some(job) = self.rx.recv().await {
            match registry.run_job(&job).await {
                Ok(outcome) => {
                    debug!("✓ Job {}[{}]: {:?}", job.name, job.modifier, outcome)
                }
                Err(e) => error!("✗ Job {}[{}] failed: {}", job.name, job.modifier, e),
            }
        }
        info!("Regeneration worker stopped");
    }

    /// Run the receive loop on the current tokio runtime.
    pub fn spawn<B: CacheBackend>(self, registry: Registry<B>) -> JoinHandle<()> {
        tokio::spawn(self.run(registry))
    }
}
