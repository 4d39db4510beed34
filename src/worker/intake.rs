use super::{Job, Signal, Worker, WorkerState};
use crate::{Repository, VolatileQueue};
use std::sync::Arc;
use tokio::sync::watch;

/// Moves messages from the volatile queue into the durable queue.
///
/// This decouples producers from persistence latency: `add` on the
/// volatile queue returns immediately, and this worker does the
/// writes in the background.  A drain always runs to the end of the
/// volatile queue before a stop is honoured, so a message is never
/// half-moved.
pub struct IntakeMover<R: Repository> {
    source: Arc<VolatileQueue>,
    target: Arc<R>,
    worker: Worker<Intake<R>>,
}

struct Intake<R> {
    source: Arc<VolatileQueue>,
    target: Arc<R>,
    downstream: Option<Signal>,
}

impl<R: Repository> IntakeMover<R> {
    pub fn new(source: Arc<VolatileQueue>, target: Arc<R>) -> Self { Self::assemble(source, target, None) }

    /// Raises `signal` every time a message is persisted; typically
    /// the [`DispatchWorker`](super::DispatchWorker)'s signal.
    #[must_use]
    pub fn notifying(self, signal: Signal) -> Self { Self::assemble(self.source, self.target, Some(signal)) }

    fn assemble(source: Arc<VolatileQueue>, target: Arc<R>, downstream: Option<Signal>) -> Self {
        let job = Intake {
            source: Arc::clone(&source),
            target: Arc::clone(&target),
            downstream,
        };

        Self {
            worker: Worker::new("intake", job, source.signal()),
            source,
            target,
        }
    }

    pub async fn start(&self) { self.worker.start().await; }

    /// Stops the mover, waiting for any drain in progress to finish.
    pub async fn stop(&self) { self.worker.stop().await; }

    pub async fn dispose(&self) { self.worker.dispose().await; }

    pub async fn state(&self) -> WorkerState { self.worker.state().await }
}

impl<R: Repository> std::fmt::Debug for IntakeMover<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeMover")
            .field("source", &self.source)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<R: Repository> Job for Intake<R> {
    #[tracing::instrument(skip_all, name = "reyna.intake")]
    async fn drain(&self, _stop: &watch::Receiver<bool>) {
        let mut moved = 0_usize;

        while let Some(message) = self.source.get() {
            match self.target.add(&message).await {
                Ok(id) => {
                    moved += 1;
                    tracing::trace!(%id, "persisted message");
                    if let Some(downstream) = &self.downstream {
                        downstream.raise();
                    }
                }
                Err(error) => {
                    tracing::error!(%error, "failed to persist message, keeping it in memory");
                    self.source.requeue(message);
                    break;
                }
            }
        }

        if moved > 0 {
            tracing::debug!(moved, "moved messages to the durable queue");
        }
    }
}
