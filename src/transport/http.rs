use super::{AlwaysOnline, Connectivity, Transport};
use crate::{DeliveryResult, Message};
use std::sync::Arc;
use std::time::Duration;

/// Posts messages over HTTP(S).
///
/// Every header on the message is sent as-is, in order.  The outcome
/// maps as follows:
///
/// - `2xx` is [`Ok`](DeliveryResult::Ok);
/// - `5xx`, or no response at all (connection refused or dropped,
///   timeout), is a [`TemporaryError`](DeliveryResult::TemporaryError);
/// - any other status, and any request that can't even be built, is a
///   [`PermanentError`](DeliveryResult::PermanentError).
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    connectivity: Arc<dyn Connectivity>,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HttpClientError {
    #[error("failed to build the http client: {source}")]
    Build {
        #[source]
        source: reqwest::Error,
    },
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder { HttpClientBuilder::default() }

    fn request(&self, message: &Message) -> Result<reqwest::Request, reqwest::Error> {
        let mut request = self
            .client
            .post(message.url().clone())
            .body(message.body().to_owned());

        for (key, value) in message.headers() {
            request = request.header(key.as_str(), value.as_str());
        }

        request.build()
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Transport for HttpClient {
    #[tracing::instrument(skip_all, fields(url = %message.url()))]
    async fn post(&self, message: &Message) -> DeliveryResult {
        let allowed = self.connectivity.can_send();
        if allowed != DeliveryResult::Ok {
            tracing::debug!(result = %allowed, "sending blocked by connectivity");
            return allowed;
        }

        let request = match self.request(message) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(%error, "could not build request");
                return DeliveryResult::PermanentError;
            }
        };

        match self.client.execute(request).await {
            Ok(response) => {
                let status = response.status();
                tracing::debug!(%status, "request completed");
                DeliveryResult::from_status(status.as_u16())
            }
            Err(error) if no_response(&error) => {
                tracing::debug!(%error, "no response from server");
                DeliveryResult::TemporaryError
            }
            Err(error) => {
                tracing::warn!(%error, "request failed");
                DeliveryResult::PermanentError
            }
        }
    }
}

/// Whether the request failed on the wire before any response came
/// back: refused or reset connections, timeouts, and connections
/// closed mid-exchange.
fn no_response(error: &reqwest::Error) -> bool {
    if error.is_builder() || error.is_redirect() || error.status().is_some() {
        return false;
    }

    error.is_connect() || error.is_timeout() || error.is_request() || error.is_body()
}

pub struct HttpClientBuilder {
    timeout: Option<Duration>,
    connectivity: Arc<dyn Connectivity>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            connectivity: Arc::new(AlwaysOnline),
        }
    }
}

impl HttpClientBuilder {
    /// Sets the timeout for a whole request; `None` waits forever.
    #[must_use]
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self { Self { timeout, ..self } }

    #[must_use]
    pub fn with_connectivity<C: Connectivity + 'static>(self, connectivity: C) -> Self {
        Self {
            connectivity: Arc::new(connectivity),
            ..self
        }
    }

    pub fn build(self) -> Result<HttpClient, HttpClientError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|source| HttpClientError::Build { source })?;

        Ok(HttpClient {
            client,
            connectivity: self.connectivity,
        })
    }
}

impl std::fmt::Debug for HttpClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientBuilder")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
