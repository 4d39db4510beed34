//! # Background workers
//!
//! Both movers in the pipeline share one lifecycle: a worker is either
//! stopped or running a single background task, which sleeps until it
//! is signalled that there is work, drains everything it can, and goes
//! back to sleep.
//!
//! Stopping is cooperative.  [`Worker::stop`] flips a watch channel
//! and then joins the task; the task only looks at the channel between
//! passes (or wherever its job chooses to), so a drain in
//! progress always reaches a safe point first.  A signal that arrives
//! while the task is busy, or while the worker is stopped, is kept
//! until the next wait; nothing added in between is missed.

pub(crate) mod dispatch;
mod intake;

pub use self::dispatch::{DispatchMode, DispatchWorker};
pub use self::intake::IntakeMover;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

/// One pass of work, run every time the worker wakes.
#[async_trait::async_trait]
pub(crate) trait Job: Send + Sync + 'static {
    /// Drains whatever is available.
    ///
    /// `stop` becomes `true` once a stop has been requested; jobs may
    /// check it between items to end the pass early.
    async fn drain(&self, stop: &watch::Receiver<bool>);
}

#[allow(clippy::exhaustive_enums)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WorkerError {
    #[error("cannot reconfigure {name} while it is running")]
    Running { name: &'static str },
    #[error("{name} has been disposed")]
    Disposed { name: &'static str },
}

pub(crate) struct Worker<J> {
    name: &'static str,
    signal: Arc<Notify>,
    wake_interval: Option<Duration>,
    inner: Mutex<Inner<J>>,
}

struct Inner<J> {
    job: Arc<J>,
    phase: Phase,
}

enum Phase {
    Stopped,
    Running {
        stop: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
    Disposed,
}

impl<J: Job> Worker<J> {
    pub(crate) fn new(name: &'static str, job: J, signal: Arc<Notify>) -> Self {
        Self {
            name,
            signal,
            wake_interval: None,
            inner: Mutex::new(Inner {
                job: Arc::new(job),
                phase: Phase::Stopped,
            }),
        }
    }

    /// Also wake up every `interval`, signalled or not.
    pub(crate) fn with_wake_interval(self, interval: Option<Duration>) -> Self {
        Self {
            wake_interval: interval,
            ..self
        }
    }

    /// Starts the background task.
    ///
    /// Starting a running worker does nothing.  The first pass runs
    /// straight away, so anything queued while the worker was stopped
    /// is picked up without waiting for a new signal.
    pub(crate) async fn start(&self) {
        let mut inner = self.inner.lock().await;
        match inner.phase {
            Phase::Running { .. } => return,
            Phase::Disposed => {
                tracing::warn!(worker = self.name, "ignoring start on a disposed worker");
                return;
            }
            Phase::Stopped => {}
        }

        let (stop, rx) = watch::channel(false);
        self.signal.notify_one();
        let handle = tokio::spawn(run(
            self.name,
            Arc::clone(&inner.job),
            Arc::clone(&self.signal),
            rx,
            self.wake_interval,
        ));

        inner.phase = Phase::Running { stop, handle };
        tracing::debug!(worker = self.name, "worker started");
    }

    /// Requests termination and waits for the background task to
    /// finish.  Safe to call on a worker that isn't running.
    pub(crate) async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        match std::mem::replace(&mut inner.phase, Phase::Stopped) {
            Phase::Running { stop, handle } => {
                stop.send(true).ok();
                if let Err(error) = handle.await {
                    tracing::error!(worker = self.name, %error, "worker task failed");
                }
                tracing::debug!(worker = self.name, "worker stopped");
            }
            other => inner.phase = other,
        }
    }

    /// Stops the worker, if needed, and refuses any later start.
    /// Idempotent.
    pub(crate) async fn dispose(&self) {
        self.stop().await;
        self.inner.lock().await.phase = Phase::Disposed;
    }

    pub(crate) async fn state(&self) -> WorkerState {
        match self.inner.lock().await.phase {
            Phase::Running { .. } => WorkerState::Running,
            Phase::Stopped | Phase::Disposed => WorkerState::Stopped,
        }
    }

    /// Swaps the job out for a new one.  Only allowed while stopped.
    pub(crate) async fn replace_job(&self, job: J) -> Result<(), WorkerError> {
        let mut inner = self.inner.lock().await;
        match inner.phase {
            Phase::Running { .. } => Err(WorkerError::Running { name: self.name }),
            Phase::Disposed => Err(WorkerError::Disposed { name: self.name }),
            Phase::Stopped => {
                inner.job = Arc::new(job);
                Ok(())
            }
        }
    }
}

impl<J> std::fmt::Debug for Worker<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("wake_interval", &self.wake_interval)
            .finish_non_exhaustive()
    }
}

#[tracing::instrument(skip_all, name = "reyna.worker", fields(worker = name))]
async fn run<J: Job>(
    name: &'static str,
    job: Arc<J>,
    signal: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
    wake_interval: Option<Duration>,
) {
    loop {
        // the signal is polled first: a signal that raced a stop still
        // gets its drain, and the stop is seen right after.
        tokio::select! {
            biased;
            () = signal.notified() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            () = tick(wake_interval) => {
                tracing::trace!("periodic wake");
            }
        }

        job.drain(&stop).await;

        if *stop.borrow() {
            break;
        }
    }
}

async fn tick(interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => std::future::pending().await,
    }
}

/// A handle that wakes a worker, as if new work had arrived.
#[derive(Debug, Clone)]
pub struct Signal(Arc<Notify>);

impl Signal {
    pub(crate) fn new(notify: Arc<Notify>) -> Self { Self(notify) }

    /// Wakes the worker.  If it is busy, or stopped, the wake is kept
    /// for its next wait.
    pub fn raise(&self) { self.0.notify_one(); }
}
