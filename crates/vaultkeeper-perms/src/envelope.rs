//! Secret payload envelopes.
//!
//! A secret's payload is one or more blocks, each sealed independently with
//! the secret's content key under its own random nonce.

use bytes::Bytes;

use vaultkeeper_core::SealedBlock;

use crate::crypto::{ContentKey, EncryptionNonce};
use crate::error::Result;
use crate::secret::SecretBytes;

/// Seal one plaintext block.
pub fn seal_block(key: &ContentKey, plaintext: &[u8]) -> Result<SealedBlock> {
    let nonce = EncryptionNonce::generate();
    let ciphertext = key.encrypt(plaintext, &nonce)?;
    Ok(SealedBlock {
        nonce: nonce.0,
        ciphertext: Bytes::from(ciphertext),
    })
}

/// Open one sealed block.
pub fn open_block(key: &ContentKey, block: &SealedBlock) -> Result<SecretBytes> {
    key.decrypt(&block.ciphertext, &EncryptionNonce::from_bytes(block.nonce))
}

/// Seal every block of a payload.
pub fn seal_payload<B: AsRef<[u8]>>(key: &ContentKey, blocks: &[B]) -> Result<Vec<SealedBlock>> {
    blocks.iter().map(|b| seal_block(key, b.as_ref())).collect()
}

/// Open every block of a payload. Fails as a whole if any block fails.
pub fn open_payload(key: &ContentKey, blocks: &[SealedBlock]) -> Result<Vec<SecretBytes>> {
    blocks.iter().map(|b| open_block(key, b)).collect()
}
