//! # Redis durable queue
//!
//! Messages are kept under three keys sharing a common prefix:
//!
//! - `{prefix}:sequence` is a counter; `INCR` hands out message ids,
//!   so ids are strictly increasing for as long as the key lives.
//! - `{prefix}:order` is a sorted set of ids, scored by the id
//!   itself.  All of the ordered reads (oldest, next after, range
//!   purge) are score range queries against it.
//! - `{prefix}:messages` is a hash from id to the serialized message.
//!
//! Appends and range purges touch more than one key, so they run as
//! Lua scripts to stay atomic with respect to other clients.  Reads
//! go to the sorted set first and the hash second; if a concurrent
//! purge removes the entry between the two, the read is retried.

use super::Repository;
use crate::message::Headers;
use crate::{Message, MessageId};
use redis::AsyncCommands as _;

const ENQUEUE_SCRIPT: &str = r"
local id = redis.call('INCR', KEYS[1])
redis.call('HSET', KEYS[3], id, ARGV[1])
redis.call('ZADD', KEYS[2], id, id)
return id
";

// `unpack` is bounded by the Lua stack, so ids are deleted in chunks.
const PURGE_SCRIPT: &str = r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for i = 1, #ids, 1000 do
  redis.call('HDEL', KEYS[2], unpack(ids, i, math.min(i + 999, #ids)))
end
if #ids > 0 then
  redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
end
return #ids
";

#[derive(Clone)]
pub struct RedisRepository {
    client: bb8::Pool<bb8_redis::RedisConnectionManager>,
    sequence: Box<str>,
    order: Box<str>,
    messages: Box<str>,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RedisRepositoryError {
    #[error("failed to connect to redis: {source}")]
    Connection {
        #[source]
        source: bb8::RunError<redis::RedisError>,
    },
    #[error("failed to create the queue: {source}")]
    Create {
        #[source]
        source: redis::RedisError,
    },
    #[error("could not serialize the message: {source}")]
    SerializationFailure {
        #[source]
        source: serde_json::Error,
    },
    #[error("could not deserialize message {id}: {source}")]
    DeserializationFailure {
        id: MessageId,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append to the queue: {source}")]
    Append {
        #[source]
        source: redis::RedisError,
    },
    #[error("failed to read from the queue: {source}")]
    Read {
        #[source]
        source: redis::RedisError,
    },
    #[error("failed to remove message {id}: {source}")]
    Remove {
        id: MessageId,
        #[source]
        source: redis::RedisError,
    },
    #[error("message to {url} has not been persisted")]
    NotPersisted { url: url::Url },
}

/// What is actually written to the hash; the id lives in the key.
#[derive(serde::Serialize, serde::Deserialize)]
struct StoredMessage<'m> {
    url: std::borrow::Cow<'m, url::Url>,
    body: std::borrow::Cow<'m, str>,
    headers: std::borrow::Cow<'m, Headers>,
}

impl RedisRepository {
    /// Creates a new redis-backed durable queue.
    ///
    /// The pool should be set up to connect to the redis server; no
    /// connection is made until the queue is used.  `prefix` namespaces
    /// every key this queue touches, so several queues can share a
    /// database.
    #[must_use = "repository does nothing unless used"]
    pub fn new(client: bb8::Pool<bb8_redis::RedisConnectionManager>, prefix: &str) -> Self {
        Self {
            client,
            sequence: format!("{prefix}:sequence").into(),
            order: format!("{prefix}:order").into(),
            messages: format!("{prefix}:messages").into(),
        }
    }

    async fn connection(
        &self,
    ) -> Result<bb8::PooledConnection<'_, bb8_redis::RedisConnectionManager>, RedisRepositoryError>
    {
        self.client
            .get()
            .await
            .map_err(|source| RedisRepositoryError::Connection { source })
    }

    /// Reads the message with the lowest id in the score range
    /// `(min, +inf]`, where `min` uses redis' range syntax.
    async fn first_in(&self, min: &str) -> Result<Option<Message>, RedisRepositoryError> {
        let mut connection = self.connection().await?;

        loop {
            let ids: Vec<i64> = connection
                .zrangebyscore_limit(&*self.order, min, "+inf", 0, 1)
                .await
                .map_err(|source| RedisRepositoryError::Read { source })?;

            let Some(id) = ids.first().copied().map(MessageId::new) else {
                return Ok(None);
            };

            let raw: Option<String> = connection
                .hget(&*self.messages, *id)
                .await
                .map_err(|source| RedisRepositoryError::Read { source })?;

            // purged between the two reads; look again.
            let Some(raw) = raw else {
                tracing::trace!(%id, "message vanished mid-read, retrying");
                continue;
            };

            let stored: StoredMessage<'_> = serde_json::from_str(&raw)
                .map_err(|source| RedisRepositoryError::DeserializationFailure { id, source })?;

            let message = Message::new(stored.url.into_owned(), stored.body.into_owned())
                .with_headers(stored.headers.into_owned())
                .with_id(id);
            return Ok(Some(message));
        }
    }
}

impl std::fmt::Debug for RedisRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRepository")
            .field("sequence", &self.sequence)
            .field("order", &self.order)
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}

fn persisted_id(message: &Message) -> Result<MessageId, RedisRepositoryError> {
    message.id().ok_or_else(|| RedisRepositoryError::NotPersisted {
        url: message.url().clone(),
    })
}

#[async_trait::async_trait]
impl Repository for RedisRepository {
    type Error = RedisRepositoryError;

    async fn does_not_exist(&self) -> Result<bool, Self::Error> {
        let mut connection = self.connection().await?;
        let exists: bool = connection
            .exists(&*self.sequence)
            .await
            .map_err(|source| RedisRepositoryError::Read { source })?;
        Ok(!exists)
    }

    #[tracing::instrument(skip(self))]
    async fn create(&self) -> Result<(), Self::Error> {
        let mut connection = self.connection().await?;
        // `SETNX` leaves an existing counter alone, so ids keep
        // increasing across repeated creates.
        let _: bool = connection
            .set_nx(&*self.sequence, 0)
            .await
            .map_err(|source| RedisRepositoryError::Create { source })?;
        Ok(())
    }

    async fn enqueue(&self, message: &Message) -> Result<MessageId, Self::Error> {
        let stored = StoredMessage {
            url: std::borrow::Cow::Borrowed(message.url()),
            body: std::borrow::Cow::Borrowed(message.body()),
            headers: std::borrow::Cow::Borrowed(message.headers()),
        };
        let serialized = serde_json::to_string(&stored)
            .map_err(|source| RedisRepositoryError::SerializationFailure { source })?;
        let mut connection = self.connection().await?;

        let id: i64 = redis::Script::new(ENQUEUE_SCRIPT)
            .key(&*self.sequence)
            .key(&*self.order)
            .key(&*self.messages)
            .arg(serialized)
            .invoke_async(&mut *connection)
            .await
            .map_err(|source| RedisRepositoryError::Append { source })?;

        Ok(MessageId::new(id))
    }

    async fn get(&self) -> Result<Option<Message>, Self::Error> { self.first_in("-inf").await }

    async fn get_next_message_after(&self, id: MessageId) -> Result<Option<Message>, Self::Error> {
        self.first_in(&format!("({id}")).await
    }

    async fn remove(&self, message: &Message) -> Result<(), Self::Error> {
        let id = persisted_id(message)?;
        let mut connection = self.connection().await?;

        let (): () = redis::pipe()
            .atomic()
            .zrem(&*self.order, *id)
            .ignore()
            .hdel(&*self.messages, *id)
            .ignore()
            .query_async(&mut *connection)
            .await
            .map_err(|source| RedisRepositoryError::Remove { id, source })?;

        Ok(())
    }

    #[tracing::instrument(skip(message), fields(id = ?message.id()))]
    async fn delete_messages_from(&self, message: &Message) -> Result<(), Self::Error> {
        let id = persisted_id(message)?;
        let mut connection = self.connection().await?;

        let purged: i64 = redis::Script::new(PURGE_SCRIPT)
            .key(&*self.order)
            .key(&*self.messages)
            .arg(*id)
            .invoke_async(&mut *connection)
            .await
            .map_err(|source| RedisRepositoryError::Remove { id, source })?;

        tracing::debug!(purged, "purged delivered messages");
        Ok(())
    }

    async fn available_messages_count(&self) -> Result<u64, Self::Error> {
        let mut connection = self.connection().await?;
        connection
            .zcard(&*self.order)
            .await
            .map_err(|source| RedisRepositoryError::Read { source })
    }
}
