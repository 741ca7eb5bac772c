//! Error types for the permissions module.

use thiserror::Error;

use vaultkeeper_core::{CoreError, GroupId, NodeRef, ValidationError};

/// Errors that can occur during key handling and permission computation.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Corrupt or missing key material. Fatal to the item or request.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Encryption error.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Passphrase key derivation error.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The caller lacks the access the operation requires.
    #[error("authorization insufficient: {0}")]
    AuthorizationInsufficient(String),

    /// The change would break a grant invariant.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Node is absent from the access graph.
    #[error("node not found: {0}")]
    NodeNotFound(NodeRef),

    /// The key ring holds no membership for this group.
    #[error("not a member of group {0}")]
    NotAMember(GroupId),

    /// Invalid request.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
