//! Authenticated encryption for secret payloads.
//!
//! AES-256-GCM with a fresh 96-bit IV drawn from `OsRng` inside every
//! [`encrypt`] call; callers cannot supply an IV. Decryption fails closed: any tag mismatch yields
//! [`CipherError::AuthenticationFailure`] and no plaintext at all.
//!
//! The IV is returned beside the ciphertext, not prefixed to it. The stored
//! payload carries them as two separate fields.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::error::CipherError;
use crate::kdf::DerivedKey;

/// IV length for AES-256-GCM (96 bits).
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag length, appended to the ciphertext.
pub const TAG_LEN: usize = 16;

/// Output of [`encrypt`]: ciphertext (with tag) and the IV it was sealed under.
#[derive(Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Ciphertext followed by the 16-byte GCM tag.
    pub ciphertext: Vec<u8>,
    /// The IV generated for this encryption.
    pub iv: [u8; IV_LEN],
}

impl std::fmt::Debug for Sealed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sealed")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// Encrypt `plaintext` under `key` with a freshly generated IV.
///
/// # Errors
///
/// Returns [`CipherError::Encryption`] if the AEAD operation fails.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> Result<Sealed, CipherError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CipherError::Encryption {
            reason: e.to_string(),
        })?;

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&nonce);
    Ok(Sealed { ciphertext, iv })
}

/// Decrypt a ciphertext produced by [`encrypt`].
///
/// # Errors
///
/// - [`CipherError::InvalidIv`] if `iv` is not 12 bytes.
/// - [`CipherError::AuthenticationFailure`] if the tag does not verify. A
///   wrong key, a tampered ciphertext, a wrong IV and a ciphertext too short
///   to hold a tag all end up here.
pub fn decrypt(key: &DerivedKey, ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
    if iv.len() != IV_LEN {
        return Err(CipherError::InvalidIv {
            expected: IV_LEN,
            actual: iv.len(),
        });
    }
    if ciphertext.len() < TAG_LEN {
        return Err(CipherError::AuthenticationFailure);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CipherError::AuthenticationFailure)
}
