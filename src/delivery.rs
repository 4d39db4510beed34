/// The outcome of a delivery attempt.
///
/// This drives what happens to the queued message: it is removed on
/// [`Ok`](DeliveryResult::Ok) and
/// [`PermanentError`](DeliveryResult::PermanentError), and left at
/// the head of the queue on
/// [`TemporaryError`](DeliveryResult::TemporaryError).
#[allow(clippy::exhaustive_enums)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryResult {
    /// The remote accepted the message.
    Ok,
    /// A transient condition: no network, a 5xx, or sending is
    /// currently blocked.  The message must stay queued.
    TemporaryError,
    /// The message can never be delivered as-is (4xx, malformed
    /// request, unexpected local failure).  It must be discarded so it
    /// doesn't block the queue forever.
    PermanentError,
}

impl DeliveryResult {
    /// Maps an HTTP status code onto a delivery result.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Ok,
            500..=599 => Self::TemporaryError,
            _ => Self::PermanentError,
        }
    }

    /// Whether the message this result is for should leave the queue.
    #[must_use]
    pub fn is_final(self) -> bool { !matches!(self, Self::TemporaryError) }
}

impl std::fmt::Display for DeliveryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::TemporaryError => "temporary error",
            Self::PermanentError => "permanent error",
        })
    }
}
