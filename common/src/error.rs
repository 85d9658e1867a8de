use thiserror::Error;

/// Enumeration of errors that can originate from the queue core and its
/// safety collaborators (URL normalization, domain extraction, SSRF
/// validation). Errors from `sqlx` are wrapped to provide additional
/// context, following the same shape as the rest of this workspace's
/// error enums.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },

    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },

    #[error("migration failed with: {error}")]
    MigrationError { error: sqlx::migrate::MigrateError },

    #[error("{0} is not a valid JobStatus")]
    ParseJobStatusError(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("SSRF protection blocked this target: {0}")]
    SsrfBlocked(String),

    #[error("no job found with id {0}")]
    NotFound(String),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
