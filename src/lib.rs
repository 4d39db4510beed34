//! # Reyna
//!
//! A store-and-forward delivery agent.  Messages handed to it are
//! persisted before anything else happens, and delivered to their
//! HTTP endpoints in the background, one by one or aggregated into
//! batches, for as long as it takes.  It is meant for links that come
//! and go or cost money per byte, such as mobile data.
//!
//! ## Pipeline
//!
//! ```text
//! producer -> volatile queue -> intake mover -> durable queue -> dispatch worker -> transport
//! ```
//!
//! 1. [`Reyna::put`] appends to the [`VolatileQueue`], an in-memory
//!    buffer, and returns immediately.
//! 2. The [`IntakeMover`] moves everything in the volatile queue into
//!    the durable queue (a [`Repository`]), which assigns each message
//!    an increasing id.
//! 3. The [`DispatchWorker`] takes the oldest persisted message, or a
//!    batch of them, and posts it through a [`Transport`].
//!
//! Delivery is at-least-once.  The transport reports a
//! [`DeliveryResult`]: on `Ok` or `PermanentError` the message leaves
//! the queue, and on `TemporaryError` it stays at the head of the
//! queue and the worker waits for its next wake before trying again.
//!
//! Callers that don't want background workers can use [`Store`], which
//! persists and forwards inline.
//!
//! ## Providers
//!
//! The durable queue is abstracted behind [`Repository`];
//! [`InMemoryRepository`] is always available, and
//! `repository::redis::RedisRepository` is behind the `redis` feature.
//! The `http` feature provides `transport::http::HttpClient`, a
//! reqwest-backed transport; any `tower::Service` returning
//! [`DeliveryResult`] can be used via [`ServiceTransport`].

mod backout;
mod delivery;
mod forward;
mod message;
pub mod provider;
pub mod repository;
mod service;
pub mod transport;
mod volatile;
pub mod worker;

pub use self::backout::{InMemoryBackoutCheck, PeriodicBackoutCheck};
pub use self::delivery::DeliveryResult;
pub use self::forward::{Forward, Store};
pub use self::message::{Headers, Message, MessageId};
pub use self::provider::batch::{BatchConfiguration, BatchEnvelope, BatchProvider, BATCH_PROVIDER_KEY};
pub use self::provider::{MessageProvider, ProviderError, SingleMessageProvider};
pub use self::repository::{InMemoryRepository, InMemoryRepositoryError, Repository};
pub use self::service::{BuildError, Reyna, ReynaBuilder, ReynaError};
pub use self::transport::{AlwaysOnline, Connectivity, ServiceTransport, Transport};
pub use self::volatile::VolatileQueue;
pub use self::worker::{DispatchMode, DispatchWorker, IntakeMover, Signal, WorkerError, WorkerState};
