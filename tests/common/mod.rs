#![allow(dead_code)]

use reyna::{DeliveryResult, InMemoryRepository, Message, MessageId, PeriodicBackoutCheck, Repository, Transport};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub fn url(s: &str) -> Url { Url::parse(s).expect("url") }

pub fn message(to: &str, body: &str) -> Message {
    Message::new(url(to), body)
        .with_header("key1", "value1")
        .with_header("key2", "value2")
        .with_header("key4", "value4")
}

pub fn assert_headers(message: &Message) {
    let headers = message
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        headers,
        [("key1", "value1"), ("key2", "value2"), ("key4", "value4")]
    );
}

/// Waits until `check` holds, or panics after a couple of seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

type Respond = Box<dyn Fn(&Message) -> DeliveryResult + Send + Sync>;

/// A transport that records what it was asked to post, and answers
/// with `respond`.
pub struct RecordingTransport {
    respond: Respond,
    posted: Mutex<Vec<Message>>,
}

impl RecordingTransport {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&Message) -> DeliveryResult + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            posted: Mutex::new(Vec::new()),
        })
    }

    pub fn ok() -> Arc<Self> { Self::new(|_| DeliveryResult::Ok) }

    pub fn posted(&self) -> Vec<Message> { self.posted.lock().expect("posted").clone() }

    pub fn posted_bodies(&self) -> Vec<String> {
        self.posted().iter().map(|m| m.body().to_owned()).collect()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn post(&self, message: &Message) -> DeliveryResult {
        self.posted.lock().expect("posted").push(message.clone());
        (self.respond)(message)
    }
}

/// An in-memory repository that logs the calls the tests care about.
#[derive(Default)]
pub struct RecordingRepository {
    inner: InMemoryRepository,
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingRepository {
    pub fn calls(&self) -> Vec<&'static str> { self.calls.lock().expect("calls").clone() }

    pub fn clear(&self) { self.calls.lock().expect("calls").clear(); }

    pub async fn messages(&self) -> Vec<Message> { self.inner.messages().await }

    fn log(&self, call: &'static str) { self.calls.lock().expect("calls").push(call); }
}

#[async_trait::async_trait]
impl Repository for RecordingRepository {
    type Error = reyna::InMemoryRepositoryError;

    async fn does_not_exist(&self) -> Result<bool, Self::Error> {
        self.log("does_not_exist");
        self.inner.does_not_exist().await
    }

    async fn create(&self) -> Result<(), Self::Error> {
        self.log("create");
        self.inner.create().await
    }

    async fn enqueue(&self, message: &Message) -> Result<MessageId, Self::Error> {
        self.log("enqueue");
        self.inner.enqueue(message).await
    }

    async fn get(&self) -> Result<Option<Message>, Self::Error> { self.inner.get().await }

    async fn get_next_message_after(&self, id: MessageId) -> Result<Option<Message>, Self::Error> {
        self.inner.get_next_message_after(id).await
    }

    async fn remove(&self, message: &Message) -> Result<(), Self::Error> {
        self.log("remove");
        self.inner.remove(message).await
    }

    async fn delete_messages_from(&self, message: &Message) -> Result<(), Self::Error> {
        self.log("delete_messages_from");
        self.inner.delete_messages_from(message).await
    }

    async fn available_messages_count(&self) -> Result<u64, Self::Error> {
        self.log("available_messages_count");
        self.inner.available_messages_count().await
    }
}

/// A backout check with a fixed answer that records how it was used.
pub struct FixedBackout {
    elapsed: bool,
    checks: Mutex<Vec<(String, Duration)>>,
    records: Mutex<Vec<String>>,
}

impl FixedBackout {
    pub fn new(elapsed: bool) -> Arc<Self> {
        Arc::new(Self {
            elapsed,
            checks: Mutex::new(Vec::new()),
            records: Mutex::new(Vec::new()),
        })
    }

    pub fn checks(&self) -> Vec<(String, Duration)> { self.checks.lock().expect("checks").clone() }

    pub fn records(&self) -> Vec<String> { self.records.lock().expect("records").clone() }
}

impl PeriodicBackoutCheck for FixedBackout {
    fn is_time_elapsed(&self, key: &str, interval: Duration) -> bool {
        self.checks
            .lock()
            .expect("checks")
            .push((key.to_owned(), interval));
        self.elapsed
    }

    fn record(&self, key: &str) { self.records.lock().expect("records").push(key.to_owned()); }
}
