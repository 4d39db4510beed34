//! Inline delivery, for callers that don't want background workers.
//!
//! [`Store::put`] persists a message and immediately runs
//! [`Forward::send`], which drains the durable queue on the caller's
//! task until it is empty or a send fails temporarily.

use crate::worker::dispatch::post;
use crate::{Message, MessageId, Repository, Transport};
use std::sync::Arc;

/// Drains the durable queue to the transport, on demand.
#[derive(Debug)]
pub struct Forward<R, T> {
    repository: Arc<R>,
    transport: Arc<T>,
}

impl<R: Repository, T: Transport> Forward<R, T> {
    pub fn new(repository: Arc<R>, transport: Arc<T>) -> Self { Self { repository, transport } }

    /// Sends queued messages oldest first.  Delivered and permanently
    /// rejected messages are dequeued; the first temporary failure
    /// stops the drain and leaves that message at the head.
    ///
    /// Returns how many messages were dequeued.
    #[tracing::instrument(skip_all, name = "reyna.forward")]
    pub async fn send(&self) -> Result<usize, R::Error> {
        let mut sent = 0;

        while let Some(message) = self.repository.peek().await? {
            if !post(&*self.transport, &message).await.is_final() {
                tracing::debug!(url = %message.url(), "temporary failure, leaving message queued");
                break;
            }

            self.repository.dequeue().await?;
            sent += 1;
        }

        Ok(sent)
    }
}

/// Persists messages and forwards them straight away.
#[derive(Debug)]
pub struct Store<R, T> {
    repository: Arc<R>,
    forward: Forward<R, T>,
}

impl<R: Repository, T: Transport> Store<R, T> {
    pub fn new(repository: Arc<R>, transport: Arc<T>) -> Self {
        Self {
            forward: Forward::new(Arc::clone(&repository), transport),
            repository,
        }
    }

    /// Persists the message, creating the durable queue first if it
    /// doesn't exist yet, then forwards everything queued.
    ///
    /// Returns the id the message was persisted under.  A failed
    /// forward is only logged: the message is safely queued either
    /// way.
    pub async fn put(&self, message: &Message) -> Result<MessageId, R::Error> {
        if self.repository.does_not_exist().await? {
            self.repository.create().await?;
        }

        let id = self.repository.enqueue(message).await?;

        if let Err(error) = self.forward.send().await {
            tracing::warn!(%error, "forwarding after put failed");
        }

        Ok(id)
    }
}
