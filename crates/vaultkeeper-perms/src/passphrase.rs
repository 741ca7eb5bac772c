//! Passphrase locking of user private keys.
//!
//! A user's private key is stored encrypted under a key derived from their
//! passphrase with Argon2id. The derived key is the [`UnlockProof`]: it is
//! computed once per request and handed to whatever needs the user's key,
//! so the passphrase itself never travels further than this module.

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use vaultkeeper_core::LockedKey;

use crate::crypto::{EncryptionKey, EncryptionNonce, X25519StaticSecret};
use crate::error::{PermsError, Result};

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal cost. For tests only.
    pub const fn fast_insecure() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// A passphrase-derived key able to unlock one user's private key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct UnlockProof([u8; 32]);

impl UnlockProof {
    fn as_key(&self) -> EncryptionKey {
        EncryptionKey::from_bytes(self.0)
    }
}

impl fmt::Debug for UnlockProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnlockProof(<redacted>)")
    }
}

/// Derive the unlock proof for a locked key from a passphrase.
pub fn derive_unlock_proof(
    passphrase: &[u8],
    locked: &LockedKey,
    params: &KdfParams,
) -> Result<UnlockProof> {
    derive(passphrase, &locked.salt, params)
}

fn derive(passphrase: &[u8], salt: &[u8; 16], params: &KdfParams) -> Result<UnlockProof> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| PermsError::KeyDerivation(format!("invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut proof = UnlockProof([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, &mut proof.0)
        .map_err(|e| PermsError::KeyDerivation(format!("Argon2 failed: {e}")))?;
    Ok(proof)
}

/// Lock a private key under a passphrase with a fresh salt.
pub fn lock_private_key(
    secret: &X25519StaticSecret,
    passphrase: &[u8],
    params: &KdfParams,
) -> Result<LockedKey> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    let proof = derive(passphrase, &salt, params)?;
    let nonce = EncryptionNonce::generate();
    let ciphertext = proof.as_key().encrypt(&secret.to_bytes()[..], &nonce)?;

    Ok(LockedKey {
        salt,
        nonce: nonce.0,
        ciphertext,
    })
}

/// Unlock a private key. Fails with `DecryptionFailed` on a wrong passphrase.
pub fn unlock_private_key(locked: &LockedKey, proof: &UnlockProof) -> Result<X25519StaticSecret> {
    let bytes = proof
        .as_key()
        .decrypt(&locked.ciphertext, &EncryptionNonce::from_bytes(locked.nonce))
        .map_err(|_| {
            PermsError::DecryptionFailed("wrong passphrase or corrupt private key".into())
        })?;
    let arr = bytes
        .to_array::<32>()
        .ok_or_else(|| PermsError::DecryptionFailed("locked key has the wrong length".into()))?;
    Ok(X25519StaticSecret::from_bytes(*arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_unlock_roundtrip() {
        let params = KdfParams::fast_insecure();
        let secret = X25519StaticSecret::generate();

        let locked = lock_private_key(&secret, b"correct horse", &params).unwrap();
        let proof = derive_unlock_proof(b"correct horse", &locked, &params).unwrap();
        let unlocked = unlock_private_key(&locked, &proof).unwrap();

        assert_eq!(unlocked.public_key(), secret.public_key());
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let params = KdfParams::fast_insecure();
        let secret = X25519StaticSecret::generate();

        let locked = lock_private_key(&secret, b"correct horse", &params).unwrap();
        let proof = derive_unlock_proof(b"battery staple", &locked, &params).unwrap();

        assert!(matches!(
            unlock_private_key(&locked, &proof),
            Err(PermsError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_salts_are_fresh() {
        let params = KdfParams::fast_insecure();
        let secret = X25519StaticSecret::generate();
        let a = lock_private_key(&secret, b"pw", &params).unwrap();
        let b = lock_private_key(&secret, b"pw", &params).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        };
        let secret = X25519StaticSecret::generate();
        assert!(matches!(
            lock_private_key(&secret, b"pw", &params),
            Err(PermsError::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_kdf_params_from_partial_json() {
        let params: KdfParams = serde_json::from_str(r#"{"iterations": 4}"#).unwrap();
        assert_eq!(params.iterations, 4);
        assert_eq!(params.memory_kib, KdfParams::default().memory_kib);
    }
}
