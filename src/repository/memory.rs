use super::Repository;
use crate::{Message, MessageId};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// A durable queue that lives in memory.
///
/// Nothing survives the process; this is meant for tests and for
/// hosts that only want the delivery pipeline.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    created: bool,
    last_id: i64,
    messages: BTreeMap<MessageId, Message>,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum InMemoryRepositoryError {
    #[error("message to {url} has not been persisted")]
    NotPersisted { url: url::Url },
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Snapshot of every queued message, oldest first.
    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.values().cloned().collect()
    }
}

fn persisted_id(message: &Message) -> Result<MessageId, InMemoryRepositoryError> {
    message.id().ok_or_else(|| InMemoryRepositoryError::NotPersisted {
        url: message.url().clone(),
    })
}

#[async_trait::async_trait]
impl Repository for InMemoryRepository {
    type Error = InMemoryRepositoryError;

    async fn does_not_exist(&self) -> Result<bool, Self::Error> { Ok(!self.state.lock().await.created) }

    async fn create(&self) -> Result<(), Self::Error> {
        self.state.lock().await.created = true;
        Ok(())
    }

    async fn enqueue(&self, message: &Message) -> Result<MessageId, Self::Error> {
        let mut state = self.state.lock().await;
        state.last_id += 1;
        let id = MessageId::new(state.last_id);
        state.messages.insert(id, message.clone().with_id(id));
        Ok(id)
    }

    async fn get(&self) -> Result<Option<Message>, Self::Error> {
        Ok(self.state.lock().await.messages.values().next().cloned())
    }

    async fn get_next_message_after(&self, id: MessageId) -> Result<Option<Message>, Self::Error> {
        let state = self.state.lock().await;
        let next = state
            .messages
            .range((std::ops::Bound::Excluded(id), std::ops::Bound::Unbounded))
            .next()
            .map(|(_, message)| message.clone());
        Ok(next)
    }

    async fn remove(&self, message: &Message) -> Result<(), Self::Error> {
        let id = persisted_id(message)?;
        self.state.lock().await.messages.remove(&id);
        Ok(())
    }

    async fn delete_messages_from(&self, message: &Message) -> Result<(), Self::Error> {
        let id = persisted_id(message)?;
        let mut state = self.state.lock().await;
        // `split_off` keeps everything >= the key in the returned map.
        let rest = match id.checked_add(1) {
            Some(after) => state.messages.split_off(&MessageId::new(after)),
            None => BTreeMap::new(),
        };
        state.messages = rest;
        Ok(())
    }

    async fn available_messages_count(&self) -> Result<u64, Self::Error> {
        Ok(self.state.lock().await.messages.len() as u64)
    }

    async fn dequeue(&self) -> Result<Option<Message>, Self::Error> {
        Ok(self.state.lock().await.messages.pop_first().map(|(_, message)| message))
    }
}
