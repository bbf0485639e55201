use drt_common::db::error::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid design: {0}")]
    Design(#[from] DbError),

    /// Corrupted search state; the worker that hit it is abandoned.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),

    #[error("worker (de)serialization failed: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("distributed channel failure: {0}")]
    Channel(String),

    #[error("routing cancelled")]
    Cancelled,
}

pub type RouteResult<T> = Result<T, RouteError>;
