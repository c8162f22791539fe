use thiserror::Error;

use crate::DirectoryError;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed permission, grantee, or resource input. Nothing was written.
    #[error("validation error: {0}")]
    Validation(#[from] policy::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// A gated lifecycle operation was refused. Plain decisions never
    /// produce this; they return `false`.
    #[error("permission denied: {0}")]
    Denied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] storage::Error),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

pub type Result<T> = std::result::Result<T, Error>;
