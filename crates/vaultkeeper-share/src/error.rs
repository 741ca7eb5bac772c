//! Error types for the share module.

use thiserror::Error;

use vaultkeeper_core::{CoreError, ShareProcessId, ShareStatus};
use vaultkeeper_perms::PermsError;
use vaultkeeper_store::StoreError;

/// Errors that can occur while creating or running share processes.
#[derive(Debug, Error)]
pub enum ShareError {
    /// No process with this id.
    #[error("share process not found: {0}")]
    ProcessNotFound(ShareProcessId),

    /// The process already finished; the operation is a no-op.
    #[error("share process {id} is already {status}")]
    ProcessAlreadyTerminal { id: ShareProcessId, status: ShareStatus },

    /// Only pending processes can be canceled.
    #[error("share process {id} is {status} and cannot be canceled")]
    NotCancelable { id: ShareProcessId, status: ShareStatus },

    /// Failure of a single share item. Recorded on the item, never propagated.
    #[error("item processing failed: {0}")]
    ItemProcessing(String),

    /// No unlock proof is available to run the process.
    #[error("no unlock proof for share process {0}")]
    MissingProof(ShareProcessId),

    /// The job queue was closed.
    #[error("job queue closed")]
    QueueClosed,

    /// Key handling or permission computation failed.
    #[error(transparent)]
    Perms(#[from] PermsError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for share operations.
pub type Result<T> = std::result::Result<T, ShareError>;
