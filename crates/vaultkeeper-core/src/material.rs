//! Encrypted key material as it is persisted.
//!
//! Nothing in this module is ever plaintext: these are the envelopes
//! produced by the key vault in `vaultkeeper-perms`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of an X25519 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// A secret (content key or group private key) sealed for one recipient.
///
/// Produced by an ephemeral X25519 agreement with the recipient's public
/// key; the ephemeral public half travels with the ciphertext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Encrypted key bytes, including the authentication tag.
    pub ciphertext: Vec<u8>,

    /// Ephemeral X25519 public key (sender side of the agreement).
    pub ephemeral_public: [u8; PUBLIC_KEY_LEN],

    /// AEAD nonce.
    pub nonce: [u8; 12],
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedKey")
            .field("ephemeral_public", &hex::encode(&self.ephemeral_public[..8]))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// A user's private key, locked with a passphrase-derived key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedKey {
    /// Key-derivation salt.
    pub salt: [u8; 16],

    /// AEAD nonce.
    pub nonce: [u8; 12],

    /// Encrypted private key bytes, including the authentication tag.
    pub ciphertext: Vec<u8>,
}

impl fmt::Debug for LockedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedKey")
            .field("salt", &hex::encode(self.salt))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// One encrypted payload block of a secret, sealed with its content key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlock {
    /// AEAD nonce, unique per block.
    pub nonce: [u8; 12],

    /// Encrypted block, including the authentication tag.
    pub ciphertext: Bytes,
}
