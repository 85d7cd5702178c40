//! Errors surfaced by `CopyOrchestrator::copy`.

use crate::services::storage_service::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CopyError {
    /// The source is below the smallest size a multipart copy accepts.
    /// Raised before any remote call is made.
    #[error("source is {size} bytes; multipart copy requires at least {minimum} bytes")]
    SourceTooSmall { size: u64, minimum: u64 },

    #[error("invalid copy source: {0}")]
    InvalidCopySource(String),

    #[error("invalid copy options: {0}")]
    InvalidOptions(String),

    /// The client refused the request before any session was opened.
    #[error("copy request rejected: {0}")]
    Rejected(#[source] StorageError),

    /// The size lookup failed. No session was initiated.
    #[error("failed to look up source size: {0}")]
    SizeLookupFailed(#[source] StorageError),

    /// The session could not be initiated. Nothing to clean up.
    #[error("failed to initiate multipart copy: {0}")]
    InitiateFailed(#[source] StorageError),

    /// A part copy failed. The session has been aborted.
    #[error("failed to copy part {part_number}: {source}")]
    PartCopyFailed {
        part_number: u32,
        #[source]
        source: StorageError,
    },

    /// All parts were copied but assembling them failed.
    #[error("failed to complete multipart copy {upload_id}: {source}")]
    CompleteFailed {
        upload_id: String,
        #[source]
        source: StorageError,
    },

    /// Workers finished without error but fewer parts came back than were
    /// planned.
    #[error("copied {copied} of {expected} planned parts")]
    IncompleteCopy { expected: usize, copied: usize },

    /// A worker task, or the task driving an open session, panicked or was
    /// cancelled.
    #[error("copy worker failed: {0}")]
    Worker(String),
}

impl CopyError {
    /// The storage error underneath a remote-call failure, if any.
    pub fn storage_error(&self) -> Option<&StorageError> {
        match self {
            CopyError::Rejected(err)
            | CopyError::SizeLookupFailed(err)
            | CopyError::InitiateFailed(err) => Some(err),
            CopyError::PartCopyFailed { source, .. } | CopyError::CompleteFailed { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}
