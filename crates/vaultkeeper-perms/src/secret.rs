//! Plaintext buffers that are erased when they go out of scope.
//!
//! Every decrypted key or payload leaves the key vault as a [`SecretBytes`].
//! Erasure happens in `Drop`, so it runs on every exit path, including early
//! returns through `?` and unwinding.

use std::fmt;

use zeroize::{Zeroize, Zeroizing};

/// Decrypted bytes, zeroed on drop.
#[derive(Clone)]
pub struct SecretBytes(Zeroizing<Vec<u8>>);

impl SecretBytes {
    /// Take ownership of a plaintext buffer.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Borrow the plaintext.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy into a fixed-size array that is itself erased on drop.
    ///
    /// Returns `None` if the length does not match.
    pub fn to_array<const N: usize>(&self) -> Option<Zeroizing<[u8; N]>> {
        if self.0.len() != N {
            return None;
        }
        let mut out = Zeroizing::new([0u8; N]);
        out.copy_from_slice(&self.0);
        Some(out)
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes(<{} bytes redacted>)", self.0.len())
    }
}

/// Zero a buffer in place.
///
/// For buffers the caller cannot wrap in [`SecretBytes`], e.g. a slice
/// borrowed from a larger allocation.
pub fn secure_erase(buffer: &mut [u8]) {
    buffer.zeroize();
}

/// Run `f` over a plaintext and erase it afterwards, whatever `f` returns.
pub fn with_secret<T>(secret: SecretBytes, f: impl FnOnce(&[u8]) -> T) -> T {
    let out = f(secret.as_bytes());
    drop(secret);
    out
}
