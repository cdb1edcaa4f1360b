//! Error types for `shroud-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material, passwords or
//! plaintext. They carry lengths, field names and secret identifiers.
//!
//! Policy denials and wrong passwords are *not* errors: they are ordinary
//! outcomes of a view and are returned as
//! [`ViewOutcome`](crate::coordinator::ViewOutcome) values.

use shroud_storage::StorageError;

/// Errors from password-based key derivation.
#[derive(Debug, thiserror::Error)]
pub enum KdfError {
    /// The supplied password was empty.
    #[error("password must not be empty")]
    EmptyPassword,

    /// A stored salt did not have the expected length.
    #[error("invalid salt length: expected {expected} bytes, got {actual}")]
    InvalidSaltLength { expected: usize, actual: usize },
}

/// Errors from the authenticated cipher.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// Tag verification failed (wrong key, tampered ciphertext, or wrong IV).
    #[error("authentication failed: ciphertext could not be verified")]
    AuthenticationFailure,

    /// A stored initialization vector did not have the expected length.
    #[error("invalid IV length: expected {expected} bytes, got {actual}")]
    InvalidIv { expected: usize, actual: usize },
}

/// Errors decoding the persisted wire payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// A field was not valid base64.
    #[error("field '{field}' is not valid base64: {reason}")]
    Encoding { field: &'static str, reason: String },

    /// A decoded field had the wrong length.
    #[error("field '{field}' has invalid length: expected {expected} bytes, got {actual}")]
    Length {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Errors from access log sinks.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// A specific sink failed to persist an entry.
    #[error("access log sink '{name}' failed: {reason}")]
    SinkFailure { name: String, reason: String },

    /// Serialization of the log entry failed.
    #[error("access log serialization failed: {reason}")]
    Serialization { reason: String },

    /// The underlying storage backend returned an error.
    #[error("access log storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the lifecycle engine (coordinator, store and sweeper).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The secret does not exist (or was already soft-deleted, for owner
    /// operations that require a live record).
    #[error("secret not found: {id}")]
    NotFound { id: String },

    /// The request was rejected before touching storage.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The stored ciphertext failed authentication even though the password
    /// verified. This indicates corruption, never a wrong password.
    #[error("integrity violation on secret {id}: {reason}")]
    Integrity { id: String, reason: String },

    /// The conditional write kept losing races past the retry bound.
    #[error("secret {id} is under contention: gave up after {attempts} attempts")]
    Contention { id: String, attempts: u32 },

    /// Key derivation failed.
    #[error("key derivation error: {0}")]
    Kdf(#[from] KdfError),

    /// Encryption failed while creating a secret.
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// A persisted payload could not be decoded.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// A record could not be (de)serialized.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// Internal engine error (e.g. a blocking task panicked).
    #[error("engine internal error: {reason}")]
    Internal { reason: String },

    /// The queryable access log could not be read.
    #[error("access log error: {0}")]
    Audit(#[from] AuditError),

    /// The underlying storage backend returned an error.
    #[error("engine storage error: {0}")]
    Storage(#[from] StorageError),
}
