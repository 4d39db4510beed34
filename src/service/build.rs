use super::Reyna;
use crate::backout::PeriodicBackoutCheck;
use crate::provider::batch::BatchConfiguration;
use crate::worker::{DispatchMode, DispatchWorker, IntakeMover};
use crate::{Repository, Transport, VolatileQueue};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("missing required parameter `{name}`")]
    MissingParameter { name: &'static str },
}

pub struct ReynaBuilder<R, T> {
    pub(super) repository: Option<Arc<R>>,
    pub(super) transport: Option<Arc<T>>,
    pub(super) batch: Option<BatchConfiguration>,
    pub(super) backout: Option<Arc<dyn PeriodicBackoutCheck>>,
    pub(super) retry_interval: Option<Duration>,
}

impl<R, T> ReynaBuilder<R, T> {
    #[must_use]
    pub fn with_repository(self, repository: Arc<R>) -> Self {
        Self {
            repository: Some(repository),
            ..self
        }
    }

    #[must_use]
    pub fn with_transport(self, transport: Arc<T>) -> Self {
        Self {
            transport: Some(transport),
            ..self
        }
    }

    /// Deliver in batches instead of one message at a time.  Batching
    /// needs a backout check as well.
    #[must_use]
    pub fn with_batch(self, configuration: BatchConfiguration) -> Self {
        Self {
            batch: Some(configuration),
            ..self
        }
    }

    #[must_use]
    pub fn with_backout<B: PeriodicBackoutCheck + 'static>(self, backout: Arc<B>) -> Self {
        Self {
            backout: Some(backout),
            ..self
        }
    }

    #[must_use]
    pub fn with_retry_interval(self, retry_interval: Duration) -> Self {
        Self {
            retry_interval: Some(retry_interval),
            ..self
        }
    }
}

impl<R: Repository, T: Transport> ReynaBuilder<R, T> {
    pub fn build(self) -> Result<Reyna<R, T>, BuildError> {
        let repository = self
            .repository
            .ok_or(BuildError::MissingParameter { name: "repository" })?;
        let transport = self
            .transport
            .ok_or(BuildError::MissingParameter { name: "transport" })?;

        let mode = match self.batch {
            Some(configuration) => DispatchMode::Batch {
                configuration,
                backout: self
                    .backout
                    .ok_or(BuildError::MissingParameter { name: "backout" })?,
            },
            None => DispatchMode::Single,
        };

        let volatile = Arc::new(VolatileQueue::new());
        let dispatch = DispatchWorker::new(Arc::clone(&repository), transport)
            .with_mode(mode)
            .with_retry_interval(self.retry_interval);
        let intake = IntakeMover::new(Arc::clone(&volatile), Arc::clone(&repository))
            .notifying(dispatch.signal());

        Ok(Reyna {
            repository,
            volatile,
            intake,
            dispatch,
        })
    }
}

impl<R, T> std::fmt::Debug for ReynaBuilder<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReynaBuilder")
            .field("repository", &self.repository.is_some())
            .field("transport", &self.transport.is_some())
            .field("batch", &self.batch)
            .field("backout", &self.backout.is_some())
            .field("retry_interval", &self.retry_interval)
            .finish()
    }
}
