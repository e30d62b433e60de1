//! Filesystem error types.
//!
//! Every failing operation reports which operation failed, the path(s)
//! involved and, where one exists, the underlying cause.  Not-found is
//! interpreted per operation before an error is built, so callers only see
//! [`FsError::ReadNotFound`] or [`MetadataFailure::NotFound`] where the
//! absence of an object is actually an error.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type FsResult<T> = Result<T, FsError>;

/// Errors raised by [`crate::storage::backend::Filesystem`] implementations.
#[derive(Debug, Error)]
pub enum FsError {
    /// The account key could not be decoded or is missing.
    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// Configuration could not be loaded or is incomplete.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("unable to check existence of {path}")]
    ExistenceCheck {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// The object to read does not exist.
    #[error("unable to read {path}: file not found")]
    ReadNotFound { path: String },

    #[error("unable to read {path}")]
    Read {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unable to write {path}")]
    Write {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// Delete failed for a reason other than the object being absent.
    #[error("unable to delete {path}")]
    Delete {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unable to {operation} directory {path}")]
    Directory {
        operation: &'static str,
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unable to copy {source_path} to {destination}: {reason}")]
    Copy {
        source_path: String,
        destination: String,
        reason: CopyFailure,
    },

    /// A move failed. When the copy succeeded but deleting the source did
    /// not, both objects exist afterwards.
    #[error("unable to move {source_path} to {destination}")]
    Move {
        source_path: String,
        destination: String,
        #[source]
        source: Box<FsError>,
    },

    #[error("unable to retrieve the {attribute} of {path}: {reason}")]
    Metadata {
        path: String,
        attribute: &'static str,
        reason: MetadataFailure,
    },

    #[error("unable to list contents of {path}")]
    Listing {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// Capability the backing store does not have (visibility).
    #[error("{capability} is not supported by this adapter")]
    Unsupported { capability: &'static str },
}

/// Why a server-side copy did not reach the `success` state.
#[derive(Debug, Error)]
pub enum CopyFailure {
    #[error("copy failed: {description}")]
    Failed { description: String },

    #[error("copy aborted: {description}")]
    Aborted { description: String },

    #[error("copy still pending after {attempts} status checks")]
    TimedOut { attempts: u32 },

    #[error("unexpected response status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("{0:#}")]
    Transport(anyhow::Error),
}

/// Why an attribute lookup failed.
#[derive(Debug, Error)]
pub enum MetadataFailure {
    #[error("file not found")]
    NotFound,

    #[error("path is a directory")]
    IsDirectory,

    #[error("{0:#}")]
    Transport(anyhow::Error),
}

impl FsError {
    /// True when the error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FsError::ReadNotFound { .. }
                | FsError::Metadata {
                    reason: MetadataFailure::NotFound,
                    ..
                }
        )
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        FsError::Config {
            message: message.into(),
        }
    }
}
