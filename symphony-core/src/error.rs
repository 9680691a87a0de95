// ABOUTME: Error taxonomy for backend reads, the datafeed poller, the chat directory, and listeners
// ABOUTME: Classifies HTTP status codes into transient (retry) versus fatal (stop) failures

use std::time::Duration;

use thiserror::Error;

/// Failure reported by a messaging backend read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Network, 5xx, or rate-limit failure. Retried after backoff.
    #[error("transient backend error: {message}")]
    Transient {
        message: String,
        /// Server-provided hint for the earliest retry
        retry_after: Option<Duration>,
    },

    /// Authentication or authorization failure. Requires re-authentication.
    #[error("fatal backend error: {message}")]
    Fatal { message: String },

    /// The cursor was rejected (expired or unknown feed); reading restarts from the tip.
    #[error("backend rejected cursor {cursor:?}")]
    InvalidCursor { cursor: Option<String> },
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Attach a retry hint. No effect on non-transient errors.
    pub fn with_retry_after(self, delay: Duration) -> Self {
        match self {
            Self::Transient { message, .. } => Self::Transient {
                message,
                retry_after: Some(delay),
            },
            other => other,
        }
    }

    /// Classify an HTTP response status.
    ///
    /// 401/403 are fatal, 408/429 are retryable, other 4xx are fatal, and 5xx or
    /// anything unrecognised is retryable.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = format!("HTTP {}: {}", status, message.into());
        match status {
            401 | 403 => Self::Fatal { message },
            408 | 429 => Self::transient(message),
            400..=499 => Self::Fatal { message },
            _ => Self::transient(message),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Terminal outcomes of the datafeed poller
#[derive(Debug, Error)]
pub enum PollerError {
    #[error("datafeed stopped on fatal backend error: {0}")]
    Fatal(BackendError),

    #[error("datafeed gave up after {attempts} consecutive transient failures: {last}")]
    RetriesExhausted { attempts: u32, last: BackendError },

    #[error("datafeed poller is already running")]
    AlreadyRunning,

    #[error("datafeed poller is not running")]
    NotRunning,

    #[error("datafeed task panicked: {0}")]
    TaskPanicked(String),
}

/// Recoverable directory failures returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatServiceError {
    /// A chat for this stream is already registered; the existing one is kept.
    #[error("a chat is already registered for stream {stream_id}")]
    DuplicateSession { stream_id: String },

    #[error("chat has no stream id")]
    MissingStream,
}

/// A single listener invocation that failed
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener returned an error: {0:#}")]
    Failed(anyhow::Error),

    #[error("listener panicked: {0}")]
    Panicked(String),
}
