use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Throttles how often something may happen, keyed by name.
///
/// Callers ask whether enough time has passed since the last recorded
/// success for a key, and record a success once they have one.
pub trait PeriodicBackoutCheck: Send + Sync {
    /// Whether at least `interval` has passed since the last
    /// [`record`](Self::record) for `key`.  Always true for a key
    /// that was never recorded.
    fn is_time_elapsed(&self, key: &str, interval: Duration) -> bool;

    /// Records now as the last success for `key`.
    fn record(&self, key: &str);
}

/// A [`PeriodicBackoutCheck`] that forgets everything on restart.
///
/// Time is read from tokio's clock, so a paused runtime controls it.
#[derive(Debug, Default)]
pub struct InMemoryBackoutCheck {
    recorded: Mutex<HashMap<String, Instant>>,
}

impl InMemoryBackoutCheck {
    #[must_use]
    pub fn new() -> Self { Self::default() }
}

impl PeriodicBackoutCheck for InMemoryBackoutCheck {
    fn is_time_elapsed(&self, key: &str, interval: Duration) -> bool {
        let recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        recorded
            .get(key)
            .map_or(true, |last| last.elapsed() >= interval)
    }

    fn record(&self, key: &str) {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), Instant::now());
    }
}

impl<B: PeriodicBackoutCheck + ?Sized> PeriodicBackoutCheck for std::sync::Arc<B> {
    fn is_time_elapsed(&self, key: &str, interval: Duration) -> bool {
        (**self).is_time_elapsed(key, interval)
    }

    fn record(&self, key: &str) { (**self).record(key) }
}
