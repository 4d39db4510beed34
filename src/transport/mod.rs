//! # Transports
//!
//! A transport takes one message and reports what became of it as a
//! [`DeliveryResult`].  Transports never fail in any other way: every
//! problem, including ones local to the process, has to be mapped onto
//! a temporary or permanent error, since that is all the workers
//! understand.
//!
//! Any `tower::Service<Message, Response = DeliveryResult>` can be
//! used as a transport through [`ServiceTransport`]; errors from the
//! service count as permanent.

#[cfg(feature = "http")]
pub mod http;

use crate::{DeliveryResult, Message};
use tower::ServiceExt as _;

#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Attempts to deliver the message.
    async fn post(&self, message: &Message) -> DeliveryResult;
}

/// Decides whether sending should be attempted at all right now.
///
/// Consulted before any network call; anything other than
/// [`DeliveryResult::Ok`] is returned as the result of the send, so a
/// known-bad condition (no network, a blocked window on a metered
/// link) costs nothing.
pub trait Connectivity: Send + Sync {
    fn can_send(&self) -> DeliveryResult;
}

impl<F> Connectivity for F
where
    F: Fn() -> DeliveryResult + Send + Sync,
{
    fn can_send(&self) -> DeliveryResult { self() }
}

/// Never blocks a send.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn can_send(&self) -> DeliveryResult { DeliveryResult::Ok }
}

/// Adapts a tower service into a [`Transport`].
#[derive(Debug, Clone)]
pub struct ServiceTransport<S> {
    service: S,
}

impl<S> ServiceTransport<S> {
    pub fn new(service: S) -> Self { Self { service } }
}

#[async_trait::async_trait]
impl<S> Transport for ServiceTransport<S>
where
    S: tower::Service<Message, Response = DeliveryResult> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: std::fmt::Display + Send,
{
    async fn post(&self, message: &Message) -> DeliveryResult {
        match self.service.clone().oneshot(message.clone()).await {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(%error, url = %message.url(), "transport service failed");
                DeliveryResult::PermanentError
            }
        }
    }
}
