use crate::Message;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// The producer-facing intake buffer.
///
/// An in-process FIFO with no persistence.  Every
/// [`add`](VolatileQueue::add) signals the intake mover; a signal sent
/// while nobody is waiting is kept, so the next wait returns
/// immediately instead of missing the message.
#[derive(Debug, Default)]
pub struct VolatileQueue {
    messages: Mutex<VecDeque<Message>>,
    signal: Arc<Notify>,
}

impl VolatileQueue {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Appends a message and wakes one waiting consumer.
    pub fn add(&self, message: Message) {
        self.lock().push_back(message);
        self.signal.notify_one();
    }

    /// Removes and returns the oldest message, without waiting.
    pub fn get(&self) -> Option<Message> { self.lock().pop_front() }

    /// Puts a message back at the head of the queue, without
    /// signalling.
    ///
    /// Used when a message was taken off the queue but could not be
    /// persisted.
    pub(crate) fn requeue(&self, message: Message) { self.lock().push_front(message); }

    pub fn len(&self) -> usize { self.lock().len() }

    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    pub(crate) fn signal(&self) -> Arc<Notify> { Arc::clone(&self.signal) }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
