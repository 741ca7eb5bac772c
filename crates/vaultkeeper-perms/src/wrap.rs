//! Envelope key wrapping.
//!
//! A content key or a group private key is wrapped for one recipient by an
//! ephemeral X25519 agreement with the recipient's public key. The wrapping
//! key is derived from the shared secret, bound to a purpose context and to
//! both public keys, then used with ChaCha20-Poly1305.

use vaultkeeper_core::WrappedKey;

use crate::crypto::{
    ContentKey, EncryptionKey, EncryptionNonce, EphemeralKeyPair, X25519PublicKey,
    X25519StaticSecret,
};
use crate::error::{PermsError, Result};
use crate::secret::SecretBytes;

const GROUP_CONTEXT: &[u8] = b"vaultkeeper/wrap/group";
const USER_CONTEXT: &[u8] = b"vaultkeeper/wrap/user";

/// Stateless envelope operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyVault;

impl KeyVault {
    /// Generate a fresh content key for a secret.
    pub fn generate_content_key() -> ContentKey {
        EncryptionKey::generate()
    }

    /// Generate a key pair for a user or a group.
    pub fn generate_key_pair() -> (X25519StaticSecret, X25519PublicKey) {
        let secret = X25519StaticSecret::generate();
        let public = secret.public_key();
        (secret, public)
    }

    /// Wrap secret bytes for a group's public key.
    pub fn wrap_for_group(secret: &[u8], group_public: &X25519PublicKey) -> Result<WrappedKey> {
        wrap(GROUP_CONTEXT, secret, group_public)
    }

    /// Unwrap bytes wrapped for a group.
    pub fn unwrap_as_group(
        wrapped: &WrappedKey,
        group_secret: &X25519StaticSecret,
    ) -> Result<SecretBytes> {
        unwrap(GROUP_CONTEXT, wrapped, group_secret)
    }

    /// Wrap secret bytes for a user's public key.
    pub fn wrap_for_user(secret: &[u8], user_public: &X25519PublicKey) -> Result<WrappedKey> {
        wrap(USER_CONTEXT, secret, user_public)
    }

    /// Unwrap bytes wrapped for a user.
    pub fn unwrap_as_user(
        wrapped: &WrappedKey,
        user_secret: &X25519StaticSecret,
    ) -> Result<SecretBytes> {
        unwrap(USER_CONTEXT, wrapped, user_secret)
    }

    /// Unwrap a secret's content key held by a group.
    pub fn unwrap_content_key(
        wrapped: &WrappedKey,
        group_secret: &X25519StaticSecret,
    ) -> Result<ContentKey> {
        let bytes = Self::unwrap_as_group(wrapped, group_secret)?;
        let arr = bytes.to_array::<32>().ok_or_else(|| invalid_length(bytes.len()))?;
        Ok(EncryptionKey::from_bytes(*arr))
    }

    /// Unwrap a group private key held by one of its members.
    pub fn unwrap_group_key(
        wrapped: &WrappedKey,
        user_secret: &X25519StaticSecret,
    ) -> Result<X25519StaticSecret> {
        let bytes = Self::unwrap_as_user(wrapped, user_secret)?;
        let arr = bytes.to_array::<32>().ok_or_else(|| invalid_length(bytes.len()))?;
        Ok(X25519StaticSecret::from_bytes(*arr))
    }
}

fn invalid_length(len: usize) -> PermsError {
    PermsError::DecryptionFailed(format!("invalid key length: expected 32, got {len}"))
}

fn kdf_context(
    purpose: &[u8],
    ephemeral: &X25519PublicKey,
    recipient: &X25519PublicKey,
) -> Vec<u8> {
    let mut context = Vec::with_capacity(purpose.len() + 64);
    context.extend_from_slice(purpose);
    context.extend_from_slice(ephemeral.as_bytes());
    context.extend_from_slice(recipient.as_bytes());
    context
}

fn wrap(purpose: &[u8], secret: &[u8], recipient: &X25519PublicKey) -> Result<WrappedKey> {
    let ephemeral = EphemeralKeyPair::generate();
    let ephemeral_public = ephemeral.public_key();

    let shared = ephemeral.diffie_hellman(recipient)?;
    let context = kdf_context(purpose, &ephemeral_public, recipient);
    let wrap_key = shared.derive_encryption_key(&context);

    let nonce = EncryptionNonce::generate();
    let ciphertext = wrap_key.encrypt(secret, &nonce)?;

    Ok(WrappedKey {
        ciphertext,
        ephemeral_public: ephemeral_public.0,
        nonce: nonce.0,
    })
}

fn unwrap(
    purpose: &[u8],
    wrapped: &WrappedKey,
    recipient: &X25519StaticSecret,
) -> Result<SecretBytes> {
    let ephemeral_public = X25519PublicKey::from_bytes(wrapped.ephemeral_public);
    let recipient_public = recipient.public_key();

    let shared = recipient.diffie_hellman(&ephemeral_public)?;
    let context = kdf_context(purpose, &ephemeral_public, &recipient_public);
    let wrap_key = shared.derive_encryption_key(&context);

    wrap_key.decrypt(&wrapped.ciphertext, &EncryptionNonce::from_bytes(wrapped.nonce))
}
