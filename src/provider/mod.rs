//! # Message providers
//!
//! A provider is what the dispatch worker reads from.  One dispatch
//! pass is one provider session:
//!
//! 1. ask [`can_send`](MessageProvider::can_send); if not, the pass is
//!    over;
//! 2. take messages from [`get_next`](MessageProvider::get_next) and
//!    post them, calling [`delete`](MessageProvider::delete) for each
//!    one that was delivered or permanently rejected, until the
//!    provider runs dry or a post fails temporarily;
//! 3. [`close`](MessageProvider::close) the session.
//!
//! [`SingleMessageProvider`] hands out queued messages one at a time.
//! [`batch::BatchProvider`] folds runs of queued messages into one
//! aggregated message, and throttles how often it does so.

pub mod batch;

use crate::{Message, Repository};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("durable queue failure: {source}")]
    Repository {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("could not serialize the batch: {source}")]
    Serialization {
        #[source]
        source: serde_json::Error,
    },
    #[error("could not derive a batch url from {url}: {source}")]
    BatchUrl {
        url: url::Url,
        #[source]
        source: url::ParseError,
    },
    #[error("durable queue returned a message to {url} without an id")]
    NotPersisted { url: url::Url },
}

impl ProviderError {
    pub(crate) fn repository<E: std::error::Error + Send + Sync + 'static>(source: E) -> Self {
        Self::Repository {
            source: Box::new(source),
        }
    }
}

#[async_trait::async_trait]
pub trait MessageProvider: Send {
    /// Whether this session may send at all.
    async fn can_send(&mut self) -> Result<bool, ProviderError>;

    /// The next message to post, if any.
    async fn get_next(&mut self) -> Result<Option<Message>, ProviderError>;

    /// Removes a message returned by [`get_next`](Self::get_next) once
    /// it no longer needs sending.
    async fn delete(&mut self, message: &Message) -> Result<(), ProviderError>;

    /// Ends the session.
    fn close(&mut self);
}

/// Hands out queued messages one at a time, oldest first.
#[derive(Debug)]
pub struct SingleMessageProvider<R> {
    repository: Arc<R>,
}

impl<R: Repository> SingleMessageProvider<R> {
    pub fn new(repository: Arc<R>) -> Self { Self { repository } }
}

#[async_trait::async_trait]
impl<R: Repository> MessageProvider for SingleMessageProvider<R> {
    async fn can_send(&mut self) -> Result<bool, ProviderError> { Ok(true) }

    async fn get_next(&mut self) -> Result<Option<Message>, ProviderError> {
        self.repository.get().await.map_err(ProviderError::repository)
    }

    async fn delete(&mut self, message: &Message) -> Result<(), ProviderError> {
        self.repository
            .remove(message)
            .await
            .map_err(ProviderError::repository)
    }

    fn close(&mut self) {}
}
