use thiserror::Error;

/// Errors surfaced by the source API client.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The API rejected our credentials. Retrying cannot help; the process
    /// should exit so the operator notices.
    #[error("source API rejected credentials (HTTP 403) at {0}")]
    Forbidden(String),
    #[error("request to {url} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("error decoding source response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl SourceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Forbidden(_))
    }
}

/// Errors surfaced by the entity sinks.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("database error: {0}")]
    Tiberius(#[from] tiberius::error::Error),
    #[error("invalid database URL: {0}")]
    BadUrl(String),
    #[error("webhook delivery to {url} gave up after {attempts} attempts: {last}")]
    WebhookExhausted {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("entity row is missing its \"$id\" column")]
    MissingId,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
