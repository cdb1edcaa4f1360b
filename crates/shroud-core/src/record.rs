//! Persisted data model: secret records, their encrypted payload, and trash
//! entries.
//!
//! A [`SecretRecord`] is created once and its [`EncryptedPayload`] is never
//! rewritten afterwards. Only the disclosure state (`view_count`,
//! `deleted_at`) and the disclosure policy change over its lifetime.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cipher::{IV_LEN, Sealed};
use crate::error::PayloadError;
use crate::gate::{self, AccessDecision, Denial};
use crate::kdf::{DerivedKey, SALT_LEN, Salt};

/// Days a soft-deleted record stays restorable before permanent purge.
pub const TRASH_RETENTION_DAYS: i64 = 30;

/// Length of the key-verification hash (SHA-256).
pub const VERIFICATION_HASH_LEN: usize = 32;

/// Algorithm identifier stored with every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionVersion {
    /// PBKDF2-HMAC-SHA256 key, AES-256-GCM ciphertext.
    PasswordDerived,
}

/// The encrypted payload as persisted and transmitted.
///
/// Binary fields are standard base64. Lengths are checked on decode, not on
/// deserialization, so a corrupted record still loads and fails with a
/// precise [`PayloadError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub initialization_vector: String,
    pub salt: String,
    pub key_verification_hash: String,
    pub encryption_version: EncryptionVersion,
}

impl EncryptedPayload {
    /// Encode a fresh encryption result for storage.
    #[must_use]
    pub fn encode(sealed: &Sealed, salt: &Salt, key: &DerivedKey) -> Self {
        Self {
            ciphertext: STANDARD.encode(&sealed.ciphertext),
            initialization_vector: STANDARD.encode(sealed.iv),
            salt: STANDARD.encode(salt.as_bytes()),
            key_verification_hash: STANDARD.encode(key.verification_hash()),
            encryption_version: EncryptionVersion::PasswordDerived,
        }
    }

    /// Decoded ciphertext (including tag).
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Encoding`] if the field is not base64.
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        decode_field("ciphertext", &self.ciphertext)
    }

    /// Decoded initialization vector.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if the field is not base64 or not 12 bytes.
    pub fn iv_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        decode_exact("initializationVector", &self.initialization_vector, IV_LEN)
    }

    /// Decoded salt.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if the field is not base64 or not 16 bytes.
    pub fn salt(&self) -> Result<Salt, PayloadError> {
        let bytes = decode_exact("salt", &self.salt, SALT_LEN)?;
        Salt::from_stored(&bytes).map_err(|_| PayloadError::Length {
            field: "salt",
            expected: SALT_LEN,
            actual: bytes.len(),
        })
    }

    /// Decoded key-verification hash.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if the field is not base64 or not 32 bytes.
    pub fn verification_hash(&self) -> Result<Vec<u8>, PayloadError> {
        decode_exact(
            "keyVerificationHash",
            &self.key_verification_hash,
            VERIFICATION_HASH_LEN,
        )
    }
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, PayloadError> {
    STANDARD.decode(value).map_err(|e| PayloadError::Encoding {
        field,
        reason: e.to_string(),
    })
}

fn decode_exact(field: &'static str, value: &str, len: usize) -> Result<Vec<u8>, PayloadError> {
    let bytes = decode_field(field, value)?;
    if bytes.len() != len {
        return Err(PayloadError::Length {
            field,
            expected: len,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Who may see a secret and for how long.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisclosurePolicy {
    /// Hard ceiling on successful views; `None` is unlimited.
    pub max_views: Option<u32>,
    /// The first successful view is also the last.
    pub burn_on_read: bool,
    /// Views are refused strictly after this instant.
    pub expires_at: Option<DateTime<Utc>>,
}

/// The unit of protection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRecord {
    pub id: Uuid,
    pub organization_id: String,
    pub team_id: Option<String>,
    pub created_by: Option<String>,
    pub name: String,
    pub payload: EncryptedPayload,
    pub policy: DisclosurePolicy,
    /// Successful views so far. Never decreases.
    pub view_count: u32,
    /// Set when the record is logically gone (burned or soft-deleted).
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretRecord {
    /// Views left before the budget is exhausted, if the budget is finite.
    #[must_use]
    pub fn remaining_views(&self) -> Option<u32> {
        let from_max = self
            .policy
            .max_views
            .map(|max| max.saturating_sub(self.view_count));
        if self.policy.burn_on_read {
            let burn_left = u32::from(self.view_count == 0);
            Some(from_max.map_or(burn_left, |left| left.min(burn_left)))
        } else {
            from_max
        }
    }

    /// Whether the record was consumed by a burn-on-read view.
    #[must_use]
    pub fn is_burned(&self) -> bool {
        self.policy.burn_on_read && self.view_count >= 1
    }
}

/// Lifecycle status exposed in summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretStatus {
    Active,
    Expired,
    ViewLimitReached,
    AlreadyBurned,
    Deleted,
}

impl From<Denial> for SecretStatus {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::Expired => Self::Expired,
            Denial::ViewLimitReached => Self::ViewLimitReached,
            Denial::AlreadyBurned => Self::AlreadyBurned,
            Denial::Deleted => Self::Deleted,
        }
    }
}

/// Record metadata safe to hand back to callers: no ciphertext, no salt, no
/// verification hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSummary {
    pub id: Uuid,
    pub organization_id: String,
    pub team_id: Option<String>,
    pub created_by: Option<String>,
    pub name: String,
    pub max_views: Option<u32>,
    pub burn_on_read: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub view_count: u32,
    pub remaining_views: Option<u32>,
    pub status: SecretStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretSummary {
    /// Summarize a record as of `now`.
    #[must_use]
    pub fn of(record: &SecretRecord, now: DateTime<Utc>) -> Self {
        let status = match gate::evaluate(record, now) {
            AccessDecision::Permitted => SecretStatus::Active,
            AccessDecision::Denied(denial) => denial.into(),
        };
        Self {
            id: record.id,
            organization_id: record.organization_id.clone(),
            team_id: record.team_id.clone(),
            created_by: record.created_by.clone(),
            name: record.name.clone(),
            max_views: record.policy.max_views,
            burn_on_read: record.policy.burn_on_read,
            expires_at: record.policy.expires_at,
            view_count: record.view_count,
            remaining_views: record.remaining_views(),
            status,
            deleted_at: record.deleted_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// A soft-deleted record awaiting permanent purge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashEntry {
    pub secret_id: Uuid,
    pub organization_id: String,
    pub secret_name: String,
    pub deleted_by: Option<String>,
    pub deleted_at: DateTime<Utc>,
    pub purge_after: DateTime<Utc>,
}

impl TrashEntry {
    /// Trash entry for `record` deleted at `deleted_at`.
    #[must_use]
    pub fn new(
        record: &SecretRecord,
        deleted_by: Option<String>,
        deleted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            secret_id: record.id,
            organization_id: record.organization_id.clone(),
            secret_name: record.name.clone(),
            deleted_by,
            deleted_at,
            purge_after: purge_after(deleted_at),
        }
    }
}

/// The instant a record deleted at `deleted_at` becomes purge-eligible.
#[must_use]
pub fn purge_after(deleted_at: DateTime<Utc>) -> DateTime<Utc> {
    deleted_at + Duration::days(TRASH_RETENTION_DAYS)
}

/// Whether a record soft-deleted at `deleted_at` is past its retention window.
#[must_use]
pub fn retention_elapsed(deleted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= purge_after(deleted_at)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::cipher;
    use crate::kdf;

    /// A record with a real payload for `password` and the given policy.
    pub(crate) fn sample_record(password: &str, policy: DisclosurePolicy) -> SecretRecord {
        let salt = Salt::generate();
        let key = kdf::derive(password, &salt).unwrap();
        let sealed = cipher::encrypt(&key, b"hunter2").unwrap();
        let now = Utc::now();
        SecretRecord {
            id: Uuid::new_v4(),
            organization_id: "org-1".to_owned(),
            team_id: None,
            created_by: Some("alice".to_owned()),
            name: "db password".to_owned(),
            payload: EncryptedPayload::encode(&sealed, &salt, &key),
            policy,
            view_count: 0,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn payload_serializes_with_wire_field_names() {
        let record = sample_record("p@ss", DisclosurePolicy::default());
        let json = serde_json::to_value(&record.payload).unwrap();
        assert!(json.get("initializationVector").is_some());
        assert!(json.get("keyVerificationHash").is_some());
        assert_eq!(json["encryptionVersion"], "password_derived");
    }

    #[test]
    fn payload_fields_decode_to_expected_lengths() {
        let record = sample_record("p@ss", DisclosurePolicy::default());
        assert_eq!(record.payload.iv_bytes().unwrap().len(), 12);
        assert_eq!(record.payload.verification_hash().unwrap().len(), 32);
        assert!(record.payload.salt().is_ok());
        // 7 bytes of plaintext + 16-byte tag.
        assert_eq!(record.payload.ciphertext_bytes().unwrap().len(), 23);
    }

    #[test]
    fn corrupted_iv_reports_field_and_length() {
        let mut record = sample_record("p@ss", DisclosurePolicy::default());
        record.payload.initialization_vector = STANDARD.encode([0u8; 8]);
        let err = record.payload.iv_bytes().unwrap_err();
        assert!(matches!(
            err,
            PayloadError::Length {
                field: "initializationVector",
                expected: 12,
                actual: 8
            }
        ));
    }

    #[test]
    fn non_base64_salt_is_an_encoding_error() {
        let mut record = sample_record("p@ss", DisclosurePolicy::default());
        record.payload.salt = "***".to_owned();
        assert!(matches!(
            record.payload.salt(),
            Err(PayloadError::Encoding { field: "salt", .. })
        ));
    }

    #[test]
    fn unknown_encryption_version_does_not_deserialize() {
        let record = sample_record("p@ss", DisclosurePolicy::default());
        let mut json = serde_json::to_value(&record).unwrap();
        json["payload"]["encryptionVersion"] = "aes_cbc".into();
        assert!(serde_json::from_value::<SecretRecord>(json).is_err());
    }

    #[test]
    fn remaining_views_accounts_for_burn_and_max() {
        let mut record = sample_record(
            "p@ss",
            DisclosurePolicy {
                max_views: Some(3),
                ..DisclosurePolicy::default()
            },
        );
        assert_eq!(record.remaining_views(), Some(3));
        record.view_count = 2;
        assert_eq!(record.remaining_views(), Some(1));

        record.policy.burn_on_read = true;
        record.view_count = 0;
        assert_eq!(record.remaining_views(), Some(1));
        record.view_count = 1;
        assert_eq!(record.remaining_views(), Some(0));

        record.policy = DisclosurePolicy::default();
        assert_eq!(record.remaining_views(), None);
    }

    #[test]
    fn summary_never_carries_key_material() {
        let record = sample_record("p@ss", DisclosurePolicy::default());
        let json = serde_json::to_string(&SecretSummary::of(&record, Utc::now())).unwrap();
        assert!(!json.contains(&record.payload.ciphertext));
        assert!(!json.contains(&record.payload.salt));
        assert!(!json.contains(&record.payload.key_verification_hash));
    }

    #[test]
    fn trash_entry_purges_after_thirty_days() {
        let record = sample_record("p@ss", DisclosurePolicy::default());
        let deleted_at = Utc::now();
        let entry = TrashEntry::new(&record, Some("bob".to_owned()), deleted_at);
        assert_eq!(entry.purge_after - entry.deleted_at, Duration::days(30));
        assert!(!retention_elapsed(deleted_at, deleted_at + Duration::days(29)));
        assert!(retention_elapsed(deleted_at, deleted_at + Duration::days(30)));
    }
}
