use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input rejected before any rule evaluation runs.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Direct lookup of a record that does not exist or does not belong
    /// to the caller. Treat/mark-read paths never raise this; they are
    /// no-ops by design.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The persistence layer is unavailable or timed out.
    #[error("store failure")]
    Store(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
