use thiserror::Error;

/// Errors surfaced by validation and the storage layer. Evaluation never
/// produces these; a bad condition value becomes the `error` reason instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("segment {0:?} is referenced by one or more rules")]
    SegmentInUse(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
