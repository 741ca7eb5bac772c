//! Cryptographic primitives for the key vault.
//!
//! Provides X25519 key agreement and ChaCha20-Poly1305 authenticated
//! encryption. Every private or symmetric key type in this module is
//! zeroized when dropped.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{PermsError, Result};
use crate::secret::SecretBytes;

/// Domain separation for keys derived from an X25519 agreement.
const WRAP_KEY_DOMAIN: &str = "vaultkeeper 2024-01 key wrapping";

/// An X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X25519PublicKey({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// An X25519 private key belonging to a user or a group.
///
/// Erased on drop.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::thread_rng()))
    }

    /// Create from secret bytes. The caller's copy is not erased.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Copy the secret bytes out, for wrapping. Erased on drop.
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_bytes())
    }

    /// Derive the public key.
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    /// Perform key agreement with a peer's public key.
    ///
    /// Fails on a low-order peer key, which would yield a predictable secret.
    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> Result<SharedKey> {
        let shared = self.0.diffie_hellman(&peer_public.to_dalek());
        if !shared.was_contributory() {
            return Err(PermsError::DecryptionFailed(
                "non-contributory key agreement".into(),
            ));
        }
        Ok(SharedKey(*shared.as_bytes()))
    }
}

impl fmt::Debug for X25519StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("X25519StaticSecret(<redacted>)")
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derive a wrapping key bound to `context`.
    pub fn derive_encryption_key(&self, context: &[u8]) -> EncryptionKey {
        let mut hasher = blake3::Hasher::new_derive_key(WRAP_KEY_DOMAIN);
        hasher.update(&self.0);
        hasher.update(context);
        EncryptionKey(*hasher.finalize().as_bytes())
    }
}

/// A 256-bit symmetric key for ChaCha20-Poly1305.
///
/// Used both as a secret's content key and as a derived wrapping key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

/// The per-secret key that seals its payload blocks.
pub type ContentKey = EncryptionKey;

impl EncryptionKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes. The caller's copy is not erased.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypt data with this key.
    pub fn encrypt(&self, plaintext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PermsError::EncryptionFailed(e.to_string()))?;

        cipher
            .encrypt(Nonce::from_slice(&nonce.0), plaintext)
            .map_err(|e| PermsError::EncryptionFailed(e.to_string()))
    }

    /// Decrypt data with this key.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &EncryptionNonce) -> Result<SecretBytes> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PermsError::DecryptionFailed(e.to_string()))?;

        cipher
            .decrypt(Nonce::from_slice(&nonce.0), ciphertext)
            .map(SecretBytes::new)
            .map_err(|_| PermsError::DecryptionFailed("authentication failed".into()))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(pub [u8; 12]);

impl EncryptionNonce {
    /// Generate a new random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

/// Ephemeral key pair for one-time key agreement.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new ephemeral key pair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Perform key agreement with a peer's public key.
    ///
    /// Consumes the ephemeral secret (can only be used once).
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> Result<SharedKey> {
        let shared = self.secret.diffie_hellman(&peer_public.to_dalek());
        if !shared.was_contributory() {
            return Err(PermsError::EncryptionFailed(
                "recipient public key is low-order".into(),
            ));
        }
        Ok(SharedKey(*shared.as_bytes()))
    }
}
