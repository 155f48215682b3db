//! Counter store error type.

/// Result type aliased to `CounterError`.
pub type CounterResult<T> = std::result::Result<T, CounterError>;

/// Errors raised by a [`crate::counter_store::CounterStore`] implementation.
///
/// Per the fail-open/fail-drop policy, callers on the request path log these and either
/// admit the request (pre-check) or drop the write (post-record) rather than propagating
/// them to the client.
#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    /// The backing store could not be reached.
    #[error("counter store connection error: {0}")]
    Connection(String),

    /// The backing store returned a protocol-level error for the command issued.
    #[error("counter store command failed: {0}")]
    Command(String),

    /// A stored value could not be interpreted as the expected type.
    #[error("counter store returned an unexpected value for key {key}")]
    UnexpectedValue {
        /// The key whose value failed to decode.
        key: String,
    },
}

impl CounterError {
    /// Whether retrying the same operation against the same store is likely to help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<redis::RedisError> for CounterError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}
