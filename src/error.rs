use thiserror::Error;

/// Failures surfaced by the indexing and retrieval core.
///
/// None of these are fatal to the host process. Callers either skip the unit
/// of work that failed (a row, a batch, a channel) or report it upward as a
/// value.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any network or database call.
    #[error("invalid input: {0}")]
    InputInvalid(&'static str),

    #[error("embedding service returned status {0}")]
    UpstreamStatus(u16),

    #[error("malformed embedding response: {0}")]
    UpstreamShape(String),

    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to write message {message_id}: {source}")]
    RowWrite {
        message_id: u64,
        #[source]
        source: rusqlite::Error,
    },

    #[error("connection pool unavailable: {0}")]
    Connection(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("thread {0} is already managed")]
    DuplicateThread(u64),

    #[error("attachment {url} on message {message_id} has no MIME type")]
    MissingMimeType { message_id: u64, url: String },

    #[error("message source error: {0}")]
    Source(String),

    #[error("blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

impl Error {
    /// Transient failures that a caller-side retry policy may try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::UpstreamStatus(status) => *status >= 500 || *status == 429,
            Error::Connection(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::UpstreamStatus(503).is_retryable());
        assert!(Error::UpstreamStatus(429).is_retryable());
        assert!(!Error::UpstreamStatus(400).is_retryable());
        assert!(!Error::InputInvalid("empty").is_retryable());
        assert!(!Error::UpstreamShape("missing embeddings".into()).is_retryable());
    }
}
