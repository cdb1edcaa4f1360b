//! Password-based key derivation.
//!
//! Every secret is encrypted under a key derived from the sharer's password
//! and a per-secret random salt with PBKDF2-HMAC-SHA256. The iteration count
//! makes each password guess against a leaked record cost one full
//! derivation.
//!
//! Salts for new records come only from [`Salt::generate`]. The only way to
//! build a salt from caller-provided bytes is [`Salt::from_stored`], which
//! exists to re-derive the key of an already persisted record.

use std::fmt;

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::KdfError;

/// PBKDF2 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// A per-secret random salt.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// Generate a fresh salt from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Rebuild the salt of a persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`KdfError::InvalidSaltLength`] if `bytes` is not exactly
    /// [`SALT_LEN`] bytes long.
    pub fn from_stored(bytes: &[u8]) -> Result<Self, KdfError> {
        let arr: [u8; SALT_LEN] = bytes.try_into().map_err(|_| KdfError::InvalidSaltLength {
            expected: SALT_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Borrow the raw salt bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Salt").field(&self.0.len()).finish()
    }
}

/// A 256-bit key derived from a password. Zeroized on drop.
///
/// The bytes never appear in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    /// Borrow the raw key bytes.
    ///
    /// The caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// SHA-256 of the key, stored alongside the record to recognise a wrong
    /// password without keeping the key.
    #[must_use]
    pub fn verification_hash(&self) -> [u8; 32] {
        Sha256::digest(self.0).into()
    }

    /// Compare this key's verification hash with a stored one in constant time.
    #[must_use]
    pub fn matches(&self, stored_hash: &[u8]) -> bool {
        self.verification_hash()[..].ct_eq(stored_hash).into()
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit key from `password` and `salt` with PBKDF2-HMAC-SHA256.
///
/// This is slow (see [`PBKDF2_ITERATIONS`]); async callers
/// should run it on the blocking pool.
///
/// # Errors
///
/// Returns [`KdfError::EmptyPassword`] if `password` is empty.
pub fn derive(password: &str, salt: &Salt) -> Result<DerivedKey, KdfError> {
    if password.is_empty() {
        return Err(KdfError::EmptyPassword);
    }
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut key,
    );
    let derived = DerivedKey(key);
    key.zeroize();
    Ok(derived)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_for_same_inputs() {
        let salt = Salt::generate();
        let k1 = derive("p@ss", &salt).unwrap();
        let k2 = derive("p@ss", &salt).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn different_salts_give_different_keys() {
        let k1 = derive("p@ss", &Salt::generate()).unwrap();
        let k2 = derive("p@ss", &Salt::generate()).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn generated_salts_are_unique() {
        assert_ne!(Salt::generate(), Salt::generate());
    }

    #[test]
    fn empty_password_is_rejected() {
        let result = derive("", &Salt::generate());
        assert!(matches!(result, Err(KdfError::EmptyPassword)));
    }

    #[test]
    fn stored_salt_of_wrong_length_is_rejected() {
        let result = Salt::from_stored(&[0u8; 15]);
        assert!(matches!(
            result,
            Err(KdfError::InvalidSaltLength {
                expected: 16,
                actual: 15
            })
        ));
    }

    #[test]
    fn verification_hash_matches_only_the_right_password() {
        let salt = Salt::generate();
        let right = derive("correct horse", &salt).unwrap();
        let wrong = derive("battery staple", &salt).unwrap();
        let stored = right.verification_hash();
        assert!(right.matches(&stored));
        assert!(!wrong.matches(&stored));
    }

    #[test]
    fn verification_hash_is_not_the_key() {
        let key = derive("p@ss", &Salt::generate()).unwrap();
        assert_ne!(&key.verification_hash(), key.as_bytes());
    }

    #[test]
    fn matches_rejects_truncated_hash() {
        let key = derive("p@ss", &Salt::generate()).unwrap();
        let hash = key.verification_hash();
        assert!(!key.matches(&hash[..31]));
    }

    #[test]
    fn derived_key_debug_redacts_bytes() {
        let key = derive("p@ss", &Salt::generate()).unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("[REDACTED]"));
    }
}
