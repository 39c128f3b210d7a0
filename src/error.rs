//! Error taxonomy for a sync invocation.
//!
//! Failures carry one of three blast radii. [`SyncError::MissingCredential`]
//! aborts the whole invocation before any I/O happens. `VcsOperationFailed`
//! and `RemoteQueryFailed` end one entity kind's segment while the remaining
//! kinds still run. Everything else is per-entity: the driver logs the skip
//! and keeps filling the current batch.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Credentials were never established on the driver. Raised before any
    /// network or process call is attempted.
    #[error("Azure DevOps credentials were never loaded")]
    MissingCredential,

    /// A source timestamp matched none of the supported formats.
    #[error("timestamp '{value}' does not match any known format")]
    MalformedTimestamp { value: String },

    /// A file in the working copy could not be read.
    #[error("failed to read '{}'", path.display())]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A batched work-item detail fetch failed; the ids in it are skipped.
    #[error("failed to fetch {count} work item(s): {detail}")]
    FailedItemFetch { count: usize, detail: String },

    /// A `git` invocation exited non-zero.
    #[error("git {operation} failed: {detail}")]
    VcsOperationFailed { operation: String, detail: String },

    /// A remote query or paged listing failed.
    #[error("remote query failed ({context}): {detail}")]
    RemoteQueryFailed { context: String, detail: String },
}

impl SyncError {
    pub(crate) fn remote(context: impl Into<String>, detail: impl Into<String>) -> Self {
        SyncError::RemoteQueryFailed {
            context: context.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn vcs(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        SyncError::VcsOperationFailed {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}
