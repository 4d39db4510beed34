//! # Batching
//!
//! Instead of one POST per message, a batch session folds a run of
//! consecutive queued messages into a single JSON document:
//!
//! ```json
//! {"events":[{"url":"https://host/a","reynaId":1,"payload":{"k":"v"}}, ...]}
//! ```
//!
//! Each event carries the original message's URL, its queue id, and
//! its body as a JSON value.  A body that isn't valid JSON is wrapped
//! as `{"body": "<the raw body>"}` rather than dropped, so one corrupt
//! message can't wedge the queue.  The batch endpoint comes from the
//! configuration or from the first message's URL; a message whose URL
//! has no such endpoint (a `data:` URL, say) is dropped instead.
//!
//! The run ends at the configured message count, or once the events
//! reach the configured size; the event that crosses the size limit is
//! still included.  After a successful send everything up to and
//! including the newest folded message is purged from the queue in one
//! go.
//!
//! Batches are throttled: a session may only send once 90% of the
//! submit interval has passed since the last successful batch, unless
//! there are already enough messages queued to fill a whole batch.

use super::{MessageProvider, ProviderError};
use crate::backout::PeriodicBackoutCheck;
use crate::message::Headers;
use crate::{Message, MessageId, Repository};
use serde_json::value::RawValue;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// The key batch submissions are recorded under in the
/// [`PeriodicBackoutCheck`].
pub const BATCH_PROVIDER_KEY: &str = "BatchProvider";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BatchConfiguration {
    /// The most messages folded into one batch.
    pub batch_message_count: usize,
    /// Once the serialized events reach this many bytes, the batch is
    /// closed.
    pub batch_messages_size: usize,
    /// Where batches are posted.  Without one, batches go to `batch`
    /// relative to the first folded message's URL.
    pub batch_url: Option<Url>,
    /// How often batches should be submitted.
    #[serde(rename = "submit_interval_ms", with = "millis")]
    pub submit_interval: Duration,
}

impl Default for BatchConfiguration {
    fn default() -> Self {
        Self {
            batch_message_count: 100,
            batch_messages_size: 300 * 1024,
            batch_url: None,
            submit_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl BatchConfiguration {
    #[must_use]
    pub fn with_batch_message_count(self, batch_message_count: usize) -> Self {
        Self {
            batch_message_count,
            ..self
        }
    }

    #[must_use]
    pub fn with_batch_messages_size(self, batch_messages_size: usize) -> Self {
        Self {
            batch_messages_size,
            ..self
        }
    }

    #[must_use]
    pub fn with_batch_url(self, batch_url: Option<Url>) -> Self { Self { batch_url, ..self } }

    #[must_use]
    pub fn with_submit_interval(self, submit_interval: Duration) -> Self {
        Self {
            submit_interval,
            ..self
        }
    }

    /// The backout interval: 90% of the submit interval.
    fn backout_interval(&self) -> Duration { self.submit_interval * 9 / 10 }
}

mod millis {
    use serde::{Deserialize as _, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// An assembled batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEnvelope {
    pub url: Url,
    pub body: String,
    /// The headers of the first folded message.
    pub headers: Headers,
    /// The id of the newest folded message.  Purging up to and
    /// including it removes exactly the messages in this batch.
    pub last_included_id: MessageId,
}

impl BatchEnvelope {
    /// The batch as a postable message, carrying `last_included_id`
    /// as its id.
    #[must_use]
    pub fn into_message(self) -> Message {
        Message::new(self.url, self.body)
            .with_headers(self.headers)
            .with_id(self.last_included_id)
    }
}

#[derive(serde::Serialize)]
struct Event<'m> {
    url: &'m Url,
    #[serde(rename = "reynaId")]
    reyna_id: MessageId,
    payload: Box<RawValue>,
}

#[derive(serde::Serialize)]
struct Corrupted<'m> {
    body: &'m str,
}

fn payload(body: &str) -> Result<Box<RawValue>, serde_json::Error> {
    match RawValue::from_string(body.to_owned()) {
        Ok(payload) => Ok(payload),
        Err(error) => {
            tracing::debug!(%error, "wrapping message body that is not valid json");
            serde_json::value::to_raw_value(&Corrupted { body })
        }
    }
}

/// Derives the batch endpoint from a message URL: the last path
/// segment is replaced by `batch`, keeping scheme, host and port.
fn derive_batch_url(url: &Url) -> Result<Url, ProviderError> {
    url.join("batch")
        .map_err(|source| ProviderError::BatchUrl { url: url.clone(), source })
}

/// One batch session.
///
/// Create a new provider per dispatch pass; [`close`](MessageProvider::close)
/// records the submission time with the backout check if anything
/// was sent during the session.
pub struct BatchProvider<R> {
    repository: Arc<R>,
    backout: Arc<dyn PeriodicBackoutCheck>,
    configuration: BatchConfiguration,
    sent: bool,
}

impl<R: Repository> BatchProvider<R> {
    pub fn new(
        repository: Arc<R>,
        backout: Arc<dyn PeriodicBackoutCheck>,
        configuration: BatchConfiguration,
    ) -> Self {
        Self {
            repository,
            backout,
            configuration,
            sent: false,
        }
    }

    pub fn configuration(&self) -> &BatchConfiguration { &self.configuration }

    /// The oldest queued message and where its batch goes.
    ///
    /// Without a configured batch URL, a head message whose URL can't
    /// yield one can never be sent as part of a batch; it is dropped so
    /// it doesn't hold up the rest of the queue.
    async fn head(&self) -> Result<Option<(Message, Url)>, ProviderError> {
        loop {
            let Some(first) = self.repository.get().await.map_err(ProviderError::repository)? else {
                return Ok(None);
            };

            let url = match &self.configuration.batch_url {
                Some(url) => url.clone(),
                None => match derive_batch_url(first.url()) {
                    Ok(url) => url,
                    Err(error) => {
                        tracing::warn!(%error, id = ?first.id(), "dropping message without a batch endpoint");
                        self.repository
                            .remove(&first)
                            .await
                            .map_err(ProviderError::repository)?;
                        continue;
                    }
                },
            };

            return Ok(Some((first, url)));
        }
    }

    /// Folds as many queued messages as fit into one batch, starting
    /// at the oldest.  Returns `None` if the queue is empty.
    #[tracing::instrument(skip_all, name = "reyna.batch.assemble")]
    pub async fn assemble(&self) -> Result<Option<BatchEnvelope>, ProviderError> {
        let Some((first, url)) = self.head().await? else {
            return Ok(None);
        };
        let headers = first.headers().clone();

        let mut events: Vec<String> = Vec::new();
        let mut size = 0_usize;
        let mut last_included_id = None;
        let mut current = Some(first);

        while let Some(message) = current.take() {
            let id = message.id().ok_or_else(|| ProviderError::NotPersisted {
                url: message.url().clone(),
            })?;

            let event = Event {
                url: message.url(),
                reyna_id: id,
                payload: payload(message.body())
                    .map_err(|source| ProviderError::Serialization { source })?,
            };
            let event = serde_json::to_string(&event)
                .map_err(|source| ProviderError::Serialization { source })?;

            size += event.len();
            events.push(event);
            last_included_id = Some(id);

            if events.len() >= self.configuration.batch_message_count
                || size >= self.configuration.batch_messages_size
            {
                break;
            }

            current = self
                .repository
                .get_next_message_after(id)
                .await
                .map_err(ProviderError::repository)?;
        }

        // `first` always yields an event, so this is set.
        let Some(last_included_id) = last_included_id else {
            return Ok(None);
        };

        tracing::debug!(events = events.len(), size, %last_included_id, "assembled batch");

        Ok(Some(BatchEnvelope {
            url,
            body: format!("{{\"events\":[{}]}}", events.join(", ")),
            headers,
            last_included_id,
        }))
    }
}

impl<R> std::fmt::Debug for BatchProvider<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProvider")
            .field("configuration", &self.configuration)
            .field("sent", &self.sent)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<R: Repository> MessageProvider for BatchProvider<R> {
    async fn can_send(&mut self) -> Result<bool, ProviderError> {
        if self
            .backout
            .is_time_elapsed(BATCH_PROVIDER_KEY, self.configuration.backout_interval())
        {
            return Ok(true);
        }

        let queued = self
            .repository
            .available_messages_count()
            .await
            .map_err(ProviderError::repository)?;

        Ok(queued >= self.configuration.batch_message_count as u64)
    }

    async fn get_next(&mut self) -> Result<Option<Message>, ProviderError> {
        Ok(self.assemble().await?.map(BatchEnvelope::into_message))
    }

    async fn delete(&mut self, message: &Message) -> Result<(), ProviderError> {
        self.repository
            .delete_messages_from(message)
            .await
            .map_err(ProviderError::repository)?;
        self.sent = true;
        Ok(())
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.sent) {
            self.backout.record(BATCH_PROVIDER_KEY);
        }
    }
}
