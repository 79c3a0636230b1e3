//! Domain error types
//!
//! This module defines the error vocabulary shared by every public
//! drivefs operation:
//! - [`FileError`] - the result kind every coordinator operation resolves with
//! - [`RemoteError`] - failures reported by the remote store collaborator
//! - [`DomainError`] - validation failures of domain newtypes

use thiserror::Error;

/// Errors that can occur while validating domain values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid drive path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid resource ID format
    #[error("Invalid resource ID: {0}")]
    InvalidResourceId(String),

    /// Invalid content hash format
    #[error("Invalid content hash: {0}")]
    InvalidHash(String),
}

/// The error kinds a file system operation can resolve with
///
/// Success is `Ok(..)`; every failure maps onto exactly one of these
/// kinds. The enum is `Clone` so that coalesced requests can hand the
/// same outcome to every waiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileError {
    /// Generic or internal failure, including local I/O errors
    #[error("operation failed: {0}")]
    Failed(String),

    /// The entry (or its content information) does not exist
    #[error("not found")]
    NotFound,

    /// An entry already exists at the target path
    #[error("already exists")]
    Exists,

    /// A directory was expected
    #[error("not a directory")]
    NotADirectory,

    /// The path is already open
    #[error("in use")]
    InUse,

    /// The operation is not supported for this kind of entry
    #[error("invalid operation")]
    InvalidOperation,

    /// The remote store refuses access to the content
    #[error("access denied")]
    AccessDenied,

    /// Not enough local disk space, even after eviction
    #[error("no space left")]
    NoSpace,

    /// The operation was cancelled
    #[error("cancelled")]
    Cancelled,
}

/// Convenience alias for results carrying a [`FileError`]
pub type FileResult<T> = Result<T, FileError>;

impl From<std::io::Error> for FileError {
    fn from(err: std::io::Error) -> Self {
        FileError::Failed(err.to_string())
    }
}

impl From<tokio::task::JoinError> for FileError {
    fn from(err: tokio::task::JoinError) -> Self {
        FileError::Failed(format!("blocking task failed: {err}"))
    }
}

impl From<DomainError> for FileError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidPath(_) => FileError::NotFound,
            other => FileError::Failed(other.to_string()),
        }
    }
}

/// Failures reported by the remote store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote resource not found")]
    NotFound,

    #[error("remote access forbidden")]
    Forbidden,

    #[error("remote conflict")]
    Conflict,

    #[error("remote quota exceeded")]
    NoSpace,

    #[error("request cancelled")]
    Cancelled,

    #[error("no connection")]
    NoConnection,

    #[error("server error (HTTP {0})")]
    Server(u16),

    #[error("remote error: {0}")]
    Other(String),
}

impl From<RemoteError> for FileError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound => FileError::NotFound,
            RemoteError::Forbidden => FileError::AccessDenied,
            RemoteError::Conflict => FileError::Exists,
            RemoteError::NoSpace => FileError::NoSpace,
            RemoteError::Cancelled => FileError::Cancelled,
            RemoteError::NoConnection | RemoteError::Server(_) | RemoteError::Other(_) => {
                FileError::Failed(err.to_string())
            }
        }
    }
}
