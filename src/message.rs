use indexmap::IndexMap;
use url::Url;

/// The identifier a durable queue assigns to a persisted message.
///
/// Identifiers are strictly increasing in insertion order, so they
/// totally order the queue; batching walks the queue by id, and a
/// batch is purged by deleting everything up to and including the
/// id of its newest message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    /// Creates a new [`MessageId`].
    ///
    /// This should only be called by [`Repository`](crate::Repository)
    /// implementations, when persisting a message.
    #[must_use]
    pub const fn new(id: i64) -> Self { Self(id) }
}

impl std::ops::Deref for MessageId {
    type Target = i64;

    fn deref(&self) -> &Self::Target { &self.0 }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
}

/// Header names and values, in insertion order.
pub type Headers = IndexMap<String, String>;

/// A unit of delivery: a body to POST to a URL, with headers.
///
/// A message is immutable once created, with the exception of its id,
/// which is unset until a durable queue persists it and never changes
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    url: Url,
    body: String,
    #[serde(default)]
    headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<MessageId>,
}

impl Message {
    pub fn new(url: Url, body: impl Into<String>) -> Self {
        Self {
            url,
            body: body.into(),
            headers: Headers::new(),
            id: None,
        }
    }

    /// Adds a header.
    ///
    /// Keys are unique; setting an existing key replaces its value but
    /// keeps its original position.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Returns this message as persisted under `id`.
    ///
    /// Only durable queues should call this; the copy they hand back
    /// from `get`/`peek` is the one that carries the id.
    #[must_use]
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn url(&self) -> &Url { &self.url }

    pub fn body(&self) -> &str { &self.body }

    pub fn headers(&self) -> &Headers { &self.headers }

    pub fn id(&self) -> Option<MessageId> { self.id }
}
