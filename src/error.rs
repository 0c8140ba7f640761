use std::time::Duration;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("persistence failure: {0}")]
    Persistence(#[source] BoxError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("blob upload failed: {0}")]
    Upload(#[source] BoxError),

    #[error("publish to worker queue failed: {0}")]
    Publish(#[source] BoxError),

    #[error("queue failure: {0}")]
    Queue(#[source] BoxError),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("{op} cancelled")]
    Cancelled { op: &'static str },

    #[error("invalid worker response: {0}")]
    InvalidResponse(#[source] serde_json::Error),

    #[error("can't encode job message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The worker reported that the conversion itself failed.
    #[error("compress worker error: {0}")]
    CompressWorker(String),

    #[error("{cause}; recording the failure also failed: {compensation}")]
    Compensation {
        cause: Box<Error>,
        compensation: Box<Error>,
    },
}

impl Error {
    pub fn persistence(err: impl Into<BoxError>) -> Self {
        Error::Persistence(err.into())
    }

    pub fn upload(err: impl Into<BoxError>) -> Self {
        Error::Upload(err.into())
    }

    pub fn publish(err: impl Into<BoxError>) -> Self {
        Error::Publish(err.into())
    }

    pub fn queue(err: impl Into<BoxError>) -> Self {
        Error::Queue(err.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Persistence(Box::new(err))
    }
}
