mod build;

pub use self::build::{BuildError, ReynaBuilder};

use crate::worker::{DispatchWorker, IntakeMover, Signal};
use crate::{Message, Repository, Transport, VolatileQueue};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ReynaError {
    #[error("failed to prepare the durable queue: {source}")]
    Repository {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// The whole pipeline: a volatile intake queue, the intake mover
/// persisting it, and the dispatch worker delivering what was
/// persisted.
///
/// [`put`](Reyna::put) never blocks on storage or the network.
pub struct Reyna<R: Repository, T: Transport> {
    repository: Arc<R>,
    volatile: Arc<VolatileQueue>,
    intake: IntakeMover<R>,
    dispatch: DispatchWorker<R, T>,
}

impl<R: Repository, T: Transport> Reyna<R, T> {
    pub fn builder() -> ReynaBuilder<R, T> {
        ReynaBuilder {
            repository: None,
            transport: None,
            batch: None,
            backout: None,
            retry_interval: None,
        }
    }

    /// Queues a message for delivery.
    pub fn put(&self, message: Message) { self.volatile.add(message); }

    /// Creates the durable queue if needed, then starts both workers.
    #[tracing::instrument(skip_all, name = "reyna.start")]
    pub async fn start(&self) -> Result<(), ReynaError> {
        let missing = self
            .repository
            .does_not_exist()
            .await
            .map_err(|source| ReynaError::Repository {
                source: Box::new(source),
            })?;

        if missing {
            tracing::info!("creating durable queue");
            self.repository
                .create()
                .await
                .map_err(|source| ReynaError::Repository {
                    source: Box::new(source),
                })?;
        }

        self.intake.start().await;
        self.dispatch.start().await;
        Ok(())
    }

    /// Stops intake first, so everything it accepted is persisted, and
    /// then dispatch.
    pub async fn stop(&self) {
        self.intake.stop().await;
        self.dispatch.stop().await;
    }

    pub async fn dispose(&self) {
        self.intake.dispose().await;
        self.dispatch.dispose().await;
    }

    /// Wakes the dispatch worker, e.g. after connectivity came back.
    pub fn wake(&self) { self.dispatch.signal().raise(); }

    pub fn signal(&self) -> Signal { self.dispatch.signal() }

    pub fn repository(&self) -> &Arc<R> { &self.repository }

    pub fn volatile(&self) -> &VolatileQueue { &self.volatile }
}

impl<R: Repository, T: Transport> std::fmt::Debug for Reyna<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reyna")
            .field("volatile", &self.volatile)
            .field("intake", &self.intake)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}
