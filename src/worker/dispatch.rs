use super::{Job, Signal, Worker, WorkerError, WorkerState};
use crate::backout::PeriodicBackoutCheck;
use crate::provider::batch::{BatchConfiguration, BatchProvider};
use crate::provider::{MessageProvider, ProviderError, SingleMessageProvider};
use crate::{DeliveryResult, Repository, Transport};
use futures::FutureExt as _;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// How the dispatch worker reads the durable queue.
#[derive(Clone, Default)]
#[non_exhaustive]
pub enum DispatchMode {
    /// One POST per queued message.
    #[default]
    Single,
    /// Aggregated, throttled batches.
    Batch {
        configuration: BatchConfiguration,
        backout: Arc<dyn PeriodicBackoutCheck>,
    },
}

impl DispatchMode {
    pub fn batch<B: PeriodicBackoutCheck + 'static>(configuration: BatchConfiguration, backout: Arc<B>) -> Self {
        Self::Batch {
            configuration,
            backout,
        }
    }
}

impl std::fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => f.write_str("Single"),
            Self::Batch { configuration, .. } => f
                .debug_struct("Batch")
                .field("configuration", configuration)
                .finish_non_exhaustive(),
        }
    }
}

/// Delivers messages from the durable queue to the network.
///
/// Every pass takes the oldest queued message (or batch), posts it,
/// and removes it if it was delivered or permanently rejected.  A
/// temporary failure ends the pass with the message still at the head
/// of the queue; it is retried on the next wake.  Between messages
/// the worker checks for a stop request, so stopping never has to wait
/// for more than the post in flight.
pub struct DispatchWorker<R: Repository, T: Transport> {
    repository: Arc<R>,
    transport: Arc<T>,
    signal: Arc<Notify>,
    worker: Worker<Dispatch<R, T>>,
}

struct Dispatch<R, T> {
    repository: Arc<R>,
    transport: Arc<T>,
    mode: DispatchMode,
}

impl<R: Repository, T: Transport> DispatchWorker<R, T> {
    pub fn new(repository: Arc<R>, transport: Arc<T>) -> Self {
        let signal = Arc::new(Notify::new());
        let job = Dispatch {
            repository: Arc::clone(&repository),
            transport: Arc::clone(&transport),
            mode: DispatchMode::Single,
        };

        Self {
            worker: Worker::new("dispatch", job, Arc::clone(&signal)),
            repository,
            transport,
            signal,
        }
    }

    #[must_use]
    pub fn with_mode(self, mode: DispatchMode) -> Self {
        let job = Dispatch {
            repository: Arc::clone(&self.repository),
            transport: Arc::clone(&self.transport),
            mode,
        };

        Self {
            worker: Worker::new("dispatch", job, Arc::clone(&self.signal)),
            ..self
        }
    }

    /// Also wake every `interval`, so a message held back by a
    /// temporary error is retried even if nothing new is queued.
    #[must_use]
    pub fn with_retry_interval(self, interval: Option<Duration>) -> Self {
        Self {
            worker: self.worker.with_wake_interval(interval),
            ..self
        }
    }

    /// A handle that wakes this worker, for whatever puts messages in
    /// the durable queue.
    pub fn signal(&self) -> Signal { Signal::new(Arc::clone(&self.signal)) }

    /// Changes the mode.  The worker has to be stopped.
    pub async fn reconfigure(&self, mode: DispatchMode) -> Result<(), WorkerError> {
        self.worker
            .replace_job(Dispatch {
                repository: Arc::clone(&self.repository),
                transport: Arc::clone(&self.transport),
                mode,
            })
            .await
    }

    pub async fn start(&self) { self.worker.start().await; }

    /// Stops the worker, waiting for the post in flight, if any.
    pub async fn stop(&self) { self.worker.stop().await; }

    pub async fn dispose(&self) { self.worker.dispose().await; }

    pub async fn state(&self) -> WorkerState { self.worker.state().await }
}

impl<R: Repository, T: Transport> std::fmt::Debug for DispatchWorker<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchWorker")
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<R: Repository, T: Transport> Job for Dispatch<R, T> {
    #[tracing::instrument(skip_all, name = "reyna.dispatch")]
    async fn drain(&self, stop: &watch::Receiver<bool>) {
        let outcome = match &self.mode {
            DispatchMode::Single => {
                let provider = SingleMessageProvider::new(Arc::clone(&self.repository));
                forward(provider, &*self.transport, stop).await
            }
            DispatchMode::Batch {
                configuration,
                backout,
            } => {
                let provider = BatchProvider::new(
                    Arc::clone(&self.repository),
                    Arc::clone(backout),
                    configuration.clone(),
                );
                forward(provider, &*self.transport, stop).await
            }
        };

        match outcome {
            Ok(0) => {}
            Ok(sent) => tracing::debug!(sent, "dispatch pass finished"),
            Err(error) => tracing::error!(%error, "dispatch pass aborted"),
        }
    }
}

/// Runs one provider session, returning how many messages left the
/// queue.  The session is always closed, even when it fails.
async fn forward<P: MessageProvider, T: Transport>(
    mut provider: P,
    transport: &T,
    stop: &watch::Receiver<bool>,
) -> Result<usize, ProviderError> {
    let result = forward_session(&mut provider, transport, stop).await;
    provider.close();
    result
}

async fn forward_session<P: MessageProvider, T: Transport>(
    provider: &mut P,
    transport: &T,
    stop: &watch::Receiver<bool>,
) -> Result<usize, ProviderError> {
    if !provider.can_send().await? {
        tracing::trace!("provider declined to send");
        return Ok(0);
    }

    let mut sent = 0;
    while let Some(message) = provider.get_next().await? {
        let result = post(transport, &message).await;
        if !result.is_final() {
            tracing::debug!(url = %message.url(), "temporary failure, pausing until the next wake");
            break;
        }

        if result == DeliveryResult::PermanentError {
            tracing::warn!(url = %message.url(), id = ?message.id(), "dropping undeliverable message");
        }

        provider.delete(&message).await?;
        sent += 1;

        if *stop.borrow() {
            break;
        }
    }

    Ok(sent)
}

/// Posts a message, treating a panicking transport as a permanent
/// failure.
pub(crate) async fn post<T: Transport + ?Sized>(transport: &T, message: &crate::Message) -> DeliveryResult {
    AssertUnwindSafe(transport.post(message))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            tracing::error!(url = %message.url(), "transport panicked");
            DeliveryResult::PermanentError
        })
}
