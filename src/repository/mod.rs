//! # Durable queues
//!
//! A durable queue is the single source of truth for undelivered
//! messages.  It is an id-ordered FIFO: every message it accepts gets
//! a fresh, strictly increasing [`MessageId`], and every read returns
//! messages oldest-first.
//!
//! Implementations must tolerate concurrent appends, counts, and
//! range deletes from different workers without corrupting the id
//! order; nothing in this crate takes locks on their behalf.

mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use self::memory::{InMemoryRepository, InMemoryRepositoryError};

use crate::{Message, MessageId};

#[async_trait::async_trait]
pub trait Repository: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether the backing storage still needs to be created.
    async fn does_not_exist(&self) -> Result<bool, Self::Error>;

    /// Creates the backing storage.
    ///
    /// This only needs to be called once, but it is safe to call it
    /// multiple times.
    async fn create(&self) -> Result<(), Self::Error>;

    /// Appends a message to the end of the queue, returning the id it
    /// was persisted under.
    ///
    /// Any id the message already carries is ignored.
    async fn enqueue(&self, message: &Message) -> Result<MessageId, Self::Error>;

    /// Returns the oldest message, without removing it.
    async fn get(&self) -> Result<Option<Message>, Self::Error>;

    /// Returns the oldest message whose id is strictly greater than
    /// `id`.
    ///
    /// This is used to walk a contiguous run of the queue without
    /// removing anything.
    async fn get_next_message_after(&self, id: MessageId) -> Result<Option<Message>, Self::Error>;

    /// Removes a message previously returned by [`get`](Self::get).
    ///
    /// Removing a message that is no longer queued is a no-op.
    async fn remove(&self, message: &Message) -> Result<(), Self::Error>;

    /// Removes every message with an id less than or equal to the
    /// given message's id.
    async fn delete_messages_from(&self, message: &Message) -> Result<(), Self::Error>;

    /// The current depth of the queue.
    async fn available_messages_count(&self) -> Result<u64, Self::Error>;

    /// Alias of [`enqueue`](Self::enqueue).
    async fn add(&self, message: &Message) -> Result<MessageId, Self::Error> {
        self.enqueue(message).await
    }

    /// Returns the oldest message, without removing it.
    ///
    /// Paired with [`dequeue`](Self::dequeue) by the synchronous
    /// forwarder.
    async fn peek(&self) -> Result<Option<Message>, Self::Error> { self.get().await }

    /// Removes and returns the oldest message.
    async fn dequeue(&self) -> Result<Option<Message>, Self::Error> {
        let Some(message) = self.get().await? else {
            return Ok(None);
        };

        self.remove(&message).await?;
        Ok(Some(message))
    }
}
