//! AX4 Archive - Encrypted Envelope (.ax4zip)
//!
//! On-disk format, one JSON object:
//! ```text
//! {
//!   "formatVersion": 1,
//!   "exportedAt": "2025-01-01T09:30:00.123Z",
//!   "sourceSurveyId": "s1",
//!   "kdf": { "algorithm": "PBKDF2-SHA256", "iterations": 100000 },
//!   "cipher": "AES-256-GCM",
//!   "salt": "<base64, 16 bytes>",
//!   "nonce": "<base64, 12 bytes>",
//!   "ciphertext": "<base64, container + 16-byte tag>"
//! }
//! ```
//! Every header field is bound into the AEAD as associated data.

use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::crypto::{self, KdfParams, NONCE_LEN, SALT_LEN};
use crate::error::{ArchiveError, ArchiveResult};

/// Current envelope format version
pub const FORMAT_VERSION: u32 = 1;

/// Cipher label written into the envelope
pub const CIPHER_NAME: &str = "AES-256-GCM";

/// File extension of sealed archives
pub const ARCHIVE_EXTENSION: &str = "ax4zip";

/// Sealed archive as written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub source_survey_id: String,
    pub kdf: KdfParams,
    pub cipher: String,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

/// Plaintext header fields, readable without the passphrase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub source_survey_id: String,
}

#[derive(Deserialize)]
struct VersionProbe {
    #[serde(rename = "formatVersion")]
    format_version: u32,
}

impl EncryptedEnvelope {
    /// Serialize to the on-disk representation
    pub fn to_bytes(&self) -> ArchiveResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse the on-disk representation
    pub fn from_bytes(bytes: &[u8]) -> ArchiveResult<Self> {
        let probe: VersionProbe = serde_json::from_slice(bytes)?;
        if probe.format_version != FORMAT_VERSION {
            return Err(ArchiveError::UnsupportedFormatVersion(probe.format_version));
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Header fields of this envelope
    pub fn header(&self) -> EnvelopeHeader {
        EnvelopeHeader {
            format_version: self.format_version,
            exported_at: self.exported_at,
            source_survey_id: self.source_survey_id.clone(),
        }
    }

    /// Hex SHA-256 of the serialized envelope
    pub fn fingerprint(&self) -> ArchiveResult<String> {
        Ok(hex::encode(Sha256::digest(self.to_bytes()?)))
    }

    fn associated_data(&self) -> Vec<u8> {
        serde_json::json!([
            "ax4zip",
            self.format_version,
            self.exported_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.source_survey_id,
            self.kdf.algorithm,
            self.kdf.iterations,
            self.cipher,
        ])
        .to_string()
        .into_bytes()
    }
}

/// Read the plaintext header of an archive without decrypting it
pub fn peek_header(bytes: &[u8]) -> ArchiveResult<EnvelopeHeader> {
    Ok(EncryptedEnvelope::from_bytes(bytes)?.header())
}

/// Encrypt packed container bytes into a fresh envelope
pub async fn seal(
    packed: &[u8],
    passphrase: &SecretString,
    source_survey_id: &str,
) -> ArchiveResult<EncryptedEnvelope> {
    if passphrase.expose_secret().is_empty() {
        return Err(ArchiveError::MissingPassphrase);
    }

    let salt = crypto::generate_salt();
    let nonce = crypto::generate_nonce();
    let key = crypto::derive_key_async(passphrase, salt).await?;

    let mut envelope = EncryptedEnvelope {
        format_version: FORMAT_VERSION,
        exported_at: Utc::now(),
        source_survey_id: source_survey_id.to_string(),
        kdf: KdfParams::default(),
        cipher: CIPHER_NAME.to_string(),
        salt: salt.to_vec(),
        nonce: nonce.to_vec(),
        ciphertext: Vec::new(),
    };

    let aad = envelope.associated_data();
    envelope.ciphertext = crypto::encrypt(&key, &nonce, packed, &aad)?;
    Ok(envelope)
}

/// Decrypt an envelope back into packed container bytes.
///
/// Everything short of an unknown format version is reported as
/// `DecryptionAuthFailure`.
pub async fn open(envelope_bytes: &[u8], passphrase: &SecretString) -> ArchiveResult<Zeroizing<Vec<u8>>> {
    if passphrase.expose_secret().is_empty() {
        return Err(ArchiveError::MissingPassphrase);
    }

    let envelope = match EncryptedEnvelope::from_bytes(envelope_bytes) {
        Ok(envelope) => envelope,
        Err(e @ ArchiveError::UnsupportedFormatVersion(_)) => return Err(e),
        Err(_) => return Err(ArchiveError::DecryptionAuthFailure),
    };

    open_envelope(&envelope, passphrase).await
}

/// Decrypt an already parsed envelope
pub async fn open_envelope(
    envelope: &EncryptedEnvelope,
    passphrase: &SecretString,
) -> ArchiveResult<Zeroizing<Vec<u8>>> {
    if envelope.format_version != FORMAT_VERSION {
        return Err(ArchiveError::UnsupportedFormatVersion(envelope.format_version));
    }
    if envelope.cipher != CIPHER_NAME
        || envelope.kdf.ensure_supported().is_err()
        || envelope.nonce.len() != NONCE_LEN
    {
        return Err(ArchiveError::DecryptionAuthFailure);
    }

    let salt: [u8; SALT_LEN] = envelope
        .salt
        .as_slice()
        .try_into()
        .map_err(|_| ArchiveError::DecryptionAuthFailure)?;

    let key = match crypto::derive_key_async(passphrase, salt).await {
        Ok(key) => key,
        Err(ArchiveError::MissingPassphrase) => return Err(ArchiveError::MissingPassphrase),
        Err(_) => return Err(ArchiveError::DecryptionAuthFailure),
    };

    let aad = envelope.associated_data();
    let plaintext = crypto::decrypt(&key, &envelope.nonce, &envelope.ciphertext, &aad)?;
    Ok(Zeroizing::new(plaintext))
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    async fn sealed(data: &[u8], pass: &str) -> Vec<u8> {
        seal(data, &secret(pass), "s1").await.unwrap().to_bytes().unwrap()
    }

    #[tokio::test]
    async fn test_seal_open_roundtrip() {
        let document = br#"{"survey":{"surveyId":"s1"},"rooms":[],"items":[]}"#;
        let bytes = sealed(document, "Secret123!").await;

        let opened = open(&bytes, &secret("Secret123!")).await.unwrap();
        assert_eq!(opened.as_slice(), document.as_slice());
    }

    #[tokio::test]
    async fn test_wrong_passphrase_rejected() {
        let bytes = sealed(b"payload", "Secret123!").await;
        let result = open(&bytes, &secret("wrong")).await;
        assert!(matches!(result, Err(ArchiveError::DecryptionAuthFailure)));
    }

    #[tokio::test]
    async fn test_sealing_twice_differs() {
        let a = seal(b"payload", &secret("Secret123!"), "s1").await.unwrap();
        let b = seal(b"payload", &secret("Secret123!"), "s1").await.unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[tokio::test]
    async fn test_bit_flip_rejected() {
        let envelope = seal(b"payload", &secret("Secret123!"), "s1").await.unwrap();

        for position in [0, envelope.ciphertext.len() / 2, envelope.ciphertext.len() - 1] {
            let mut tampered = envelope.clone();
            tampered.ciphertext[position] ^= 0x01;
            let result = open_envelope(&tampered, &secret("Secret123!")).await;
            assert!(matches!(result, Err(ArchiveError::DecryptionAuthFailure)));
        }
    }

    #[tokio::test]
    async fn test_header_tampering_rejected() {
        let envelope = seal(b"payload", &secret("Secret123!"), "s1").await.unwrap();

        let mut renamed = envelope.clone();
        renamed.source_survey_id = "s2".into();
        assert!(matches!(
            open_envelope(&renamed, &secret("Secret123!")).await,
            Err(ArchiveError::DecryptionAuthFailure)
        ));

        let mut redated = envelope;
        redated.exported_at = redated.exported_at - chrono::Duration::days(1);
        assert!(matches!(
            open_envelope(&redated, &secret("Secret123!")).await,
            Err(ArchiveError::DecryptionAuthFailure)
        ));
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_auth_failure() {
        for bytes in [&b"not json"[..], &b"{\"formatVersion\":1}"[..], &b""[..]] {
            let result = open(bytes, &secret("Secret123!")).await;
            assert!(matches!(result, Err(ArchiveError::DecryptionAuthFailure)));
        }
    }

    #[tokio::test]
    async fn test_unknown_version_reported() {
        let result = open(br#"{"formatVersion":2,"zipData":"..."}"#, &secret("Secret123!")).await;
        assert!(matches!(result, Err(ArchiveError::UnsupportedFormatVersion(2))));
    }

    #[tokio::test]
    async fn test_empty_passphrase_rejected() {
        assert!(matches!(
            seal(b"payload", &secret(""), "s1").await,
            Err(ArchiveError::MissingPassphrase)
        ));
        assert!(matches!(
            open(b"{}", &secret("")).await,
            Err(ArchiveError::MissingPassphrase)
        ));
    }

    #[tokio::test]
    async fn test_envelope_wire_format() {
        let bytes = sealed(b"payload", "Secret123!").await;
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["formatVersion"], 1);
        assert_eq!(json["sourceSurveyId"], "s1");
        assert_eq!(json["kdf"]["iterations"], 100_000);
        assert_eq!(json["cipher"], "AES-256-GCM");
        assert!(json.get("passphrase").is_none());
        assert!(json.get("key").is_none());

        let header = peek_header(&bytes).unwrap();
        assert_eq!(header.source_survey_id, "s1");
        assert_eq!(header.format_version, FORMAT_VERSION);
    }

    #[tokio::test]
    async fn test_fingerprint_is_stable() {
        let envelope = seal(b"payload", &secret("Secret123!"), "s1").await.unwrap();
        let reparsed = EncryptedEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(envelope.fingerprint().unwrap(), reparsed.fingerprint().unwrap());
        assert_eq!(envelope.fingerprint().unwrap().len(), 64);
    }
}
