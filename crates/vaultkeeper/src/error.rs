//! Error types for the Keeper.

use thiserror::Error;

use vaultkeeper_core::{CoreError, ValidationError};
use vaultkeeper_perms::PermsError;
use vaultkeeper_share::ShareError;
use vaultkeeper_store::StoreError;

/// Errors that can occur during Keeper operations.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// Request rejected before anything was persisted.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Key handling or permission computation failed.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Share process error.
    #[error("share error: {0}")]
    Share(#[from] ShareError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification of a [`KeeperError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Corrupt or missing key material, or a wrong passphrase.
    DecryptionFailed,
    /// The actor lacks the required access.
    AuthorizationInsufficient,
    /// The change would break a tree invariant.
    InvariantViolation,
    /// The request itself is malformed.
    InvalidRequest,
    /// The share process already finished or cannot change state.
    ProcessAlreadyTerminal,
    /// A single share item failed.
    ItemProcessing,
    NotFound,
    Storage,
    Other,
}

impl KeeperError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeeperError::Validation(_) => ErrorKind::InvalidRequest,
            KeeperError::Permission(e) => perms_kind(e),
            KeeperError::Store(e) => store_kind(e),
            KeeperError::Share(e) => share_kind(e),
            KeeperError::Core(_) | KeeperError::Config(_) => ErrorKind::Other,
        }
    }
}

fn perms_kind(e: &PermsError) -> ErrorKind {
    match e {
        PermsError::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
        PermsError::AuthorizationInsufficient(_) | PermsError::NotAMember(_) => {
            ErrorKind::AuthorizationInsufficient
        }
        PermsError::InvariantViolation(_) => ErrorKind::InvariantViolation,
        PermsError::Validation(_) => ErrorKind::InvalidRequest,
        PermsError::NodeNotFound(_) => ErrorKind::NotFound,
        PermsError::EncryptionFailed(_) | PermsError::KeyDerivation(_) | PermsError::Core(_) => {
            ErrorKind::Other
        }
    }
}

fn store_kind(e: &StoreError) -> ErrorKind {
    match e {
        StoreError::NotFound { .. } => ErrorKind::NotFound,
        _ => ErrorKind::Storage,
    }
}

fn share_kind(e: &ShareError) -> ErrorKind {
    match e {
        ShareError::ProcessNotFound(_) => ErrorKind::NotFound,
        ShareError::ProcessAlreadyTerminal { .. } | ShareError::NotCancelable { .. } => {
            ErrorKind::ProcessAlreadyTerminal
        }
        ShareError::ItemProcessing(_) => ErrorKind::ItemProcessing,
        ShareError::MissingProof(_) => ErrorKind::DecryptionFailed,
        ShareError::Perms(e) => perms_kind(e),
        ShareError::Store(e) => store_kind(e),
        ShareError::QueueClosed | ShareError::Core(_) => ErrorKind::Other,
    }
}

/// Result type for Keeper operations.
pub type Result<T> = std::result::Result<T, KeeperError>;
