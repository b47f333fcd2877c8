use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64ct::{Base64, Encoding};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

use crate::crypto::keys::DerivedKey;

const IV_BYTES: usize = 12;
const TAG_BYTES: usize = 16;

/// Envelope key material.
///
/// `Raw` is the pre-versioning configuration: the base64-encoded key string
/// itself, producing and consuming the unversioned `iv:ct:tag` format.
/// `Derived` is validated key material that writes the current
/// `v{N}:iv:ct:tag` format. The split is a tagged union so the
/// key-type × envelope-format matrix in [`decrypt`] is checked exhaustively.
#[derive(Clone)]
pub enum CipherKey {
    Raw(String),
    Derived(DerivedKey),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption key must be 32 bytes (base64 encoded)")]
    InvalidKey,
    #[error("unsupported key version: v{0}")]
    UnsupportedKeyVersion(u32),
    #[error("versioned ciphertext requires a derived key")]
    UnsupportedKeyMaterial,
    #[error("legacy ciphertext requires a legacy key fallback")]
    MissingLegacyKey,
    #[error("invalid encrypted payload format")]
    InvalidEnvelopeFormat,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed")]
    DecryptFailed,
}

pub(crate) fn decode_key_material(base64_key: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = Base64::decode_vec(base64_key).map_err(|_| CryptoError::InvalidKey)?;
    bytes.try_into().map_err(|_| CryptoError::InvalidKey)
}

/// Encrypts `plaintext` under `key`.
///
/// A derived key yields `v{N}:iv:ct:tag`; a raw key yields the legacy
/// `iv:ct:tag`. The dual output keeps already-encrypted legacy data
/// decryptable while new writes adopt the versioned format without a
/// flag-day migration. The IV is 12 fresh bytes from the OS RNG per call;
/// the GCM tag is always 16 bytes.
///
/// # Errors
/// Returns [`CryptoError::InvalidKey`] for malformed raw key material and
/// [`CryptoError::EncryptFailed`] when the AEAD rejects the input.
pub fn encrypt(key: &CipherKey, plaintext: &str) -> Result<String, CryptoError> {
    let (key_bytes, version) = match key {
        CipherKey::Raw(base64_key) => (decode_key_material(base64_key)?, None),
        CipherKey::Derived(derived) => (derived.key, Some(derived.version)),
    };

    let mut iv = [0u8; IV_BYTES];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| CryptoError::InvalidKey)?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
        .map_err(|_| CryptoError::EncryptFailed)?;

    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_BYTES);
    let payload = format!(
        "{}:{}:{}",
        Base64::encode_string(&iv),
        Base64::encode_string(ciphertext),
        Base64::encode_string(tag),
    );

    Ok(match version {
        Some(version) => format!("v{version}:{payload}"),
        None => payload,
    })
}

/// Decrypts an envelope, auto-detecting the versioned vs. legacy format.
///
/// The four failure paths are part of the contract; callers decide whether
/// to fall back to a secondary key based on which one they get:
/// - versioned envelope + raw key → [`CryptoError::UnsupportedKeyMaterial`]
/// - versioned envelope, version ≠ current → [`CryptoError::UnsupportedKeyVersion`]
/// - legacy envelope + derived key, no `legacy_key` → [`CryptoError::MissingLegacyKey`]
/// - wrong segment count → [`CryptoError::InvalidEnvelopeFormat`]
///
/// # Errors
/// See above; an authentication failure surfaces as
/// [`CryptoError::DecryptFailed`].
pub fn decrypt(
    key: &CipherKey,
    envelope: &str,
    legacy_key: Option<&str>,
) -> Result<String, CryptoError> {
    let (key_bytes, payload) = match split_version(envelope) {
        Some((version, payload)) => {
            let CipherKey::Derived(derived) = key else {
                return Err(CryptoError::UnsupportedKeyMaterial);
            };
            if version != derived.version {
                return Err(CryptoError::UnsupportedKeyVersion(version));
            }
            (derived.key, payload)
        }
        None => {
            let key_bytes = match key {
                CipherKey::Raw(base64_key) => decode_key_material(base64_key)?,
                CipherKey::Derived(_) => {
                    let fallback = legacy_key.ok_or(CryptoError::MissingLegacyKey)?;
                    decode_key_material(fallback)?
                }
            };
            (key_bytes, envelope)
        }
    };

    let mut segments = payload.split(':');
    let (Some(iv), Some(ciphertext), Some(tag), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(CryptoError::InvalidEnvelopeFormat);
    };
    if iv.is_empty() || ciphertext.is_empty() || tag.is_empty() {
        return Err(CryptoError::InvalidEnvelopeFormat);
    }

    let iv = Base64::decode_vec(iv).map_err(|_| CryptoError::InvalidEnvelopeFormat)?;
    let ciphertext = Base64::decode_vec(ciphertext).map_err(|_| CryptoError::InvalidEnvelopeFormat)?;
    let tag = Base64::decode_vec(tag).map_err(|_| CryptoError::InvalidEnvelopeFormat)?;
    if iv.len() != IV_BYTES || tag.len() != TAG_BYTES {
        return Err(CryptoError::InvalidEnvelopeFormat);
    }

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| CryptoError::InvalidKey)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
        .map_err(|_| CryptoError::DecryptFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
}

/// `v{N}:` prefix detection. Returns the parsed version and the remaining
/// payload, or `None` for the legacy format.
fn split_version(envelope: &str) -> Option<(u32, &str)> {
    let rest = envelope.strip_prefix('v')?;
    let colon = rest.find(':')?;
    let version = rest.get(..colon)?.parse::<u32>().ok()?;
    Some((version, rest.get(colon + 1..)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KEY_VERSION;

    fn raw_key() -> CipherKey {
        CipherKey::Raw(Base64::encode_string(&[42u8; 32]))
    }

    fn derived_key() -> CipherKey {
        CipherKey::Derived(DerivedKey::import(&Base64::encode_string(&[42u8; 32])).unwrap())
    }

    #[test]
    fn test_round_trip_raw_key() {
        let key = raw_key();
        let envelope = encrypt(&key, "010-1234-5678").unwrap();

        assert_eq!(envelope.split(':').count(), 3);
        assert_eq!(decrypt(&key, &envelope, None).unwrap(), "010-1234-5678");
    }

    #[test]
    fn test_round_trip_derived_key() {
        let key = derived_key();
        let envelope = encrypt(&key, "19900101").unwrap();

        assert!(envelope.starts_with(&format!("v{KEY_VERSION}:")));
        assert_eq!(envelope.split(':').count(), 4);
        assert_eq!(decrypt(&key, &envelope, None).unwrap(), "19900101");
    }

    #[test]
    fn test_raw_key_never_writes_version_prefix() {
        let envelope = encrypt(&raw_key(), "plaintext").unwrap();
        assert!(split_version(&envelope).is_none());
    }

    #[test]
    fn test_versioned_envelope_rejects_raw_key() {
        let envelope = encrypt(&derived_key(), "secret").unwrap();
        assert_eq!(
            decrypt(&raw_key(), &envelope, None),
            Err(CryptoError::UnsupportedKeyMaterial)
        );
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let envelope = encrypt(&derived_key(), "secret").unwrap();
        let future = envelope.replacen(&format!("v{KEY_VERSION}:"), "v9:", 1);
        assert_eq!(
            decrypt(&derived_key(), &future, None),
            Err(CryptoError::UnsupportedKeyVersion(9))
        );
    }

    #[test]
    fn test_legacy_envelope_requires_fallback_for_derived_key() {
        let raw = Base64::encode_string(&[42u8; 32]);
        let legacy = encrypt(&CipherKey::Raw(raw.clone()), "secret").unwrap();

        assert_eq!(
            decrypt(&derived_key(), &legacy, None),
            Err(CryptoError::MissingLegacyKey)
        );
        assert_eq!(
            decrypt(&derived_key(), &legacy, Some(&raw)).unwrap(),
            "secret"
        );
    }

    #[test]
    fn test_malformed_envelope_segment_count() {
        assert_eq!(
            decrypt(&raw_key(), "only:two", None),
            Err(CryptoError::InvalidEnvelopeFormat)
        );
        assert_eq!(
            decrypt(&raw_key(), "a:b:c:d", None),
            Err(CryptoError::InvalidEnvelopeFormat)
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let key = derived_key();
        let envelope = encrypt(&key, "secret").unwrap();

        let mut parts: Vec<String> = envelope.split(':').map(str::to_string).collect();
        let ct = Base64::decode_vec(&parts[2]).unwrap();
        let mut flipped = ct;
        if let Some(byte) = flipped.first_mut() {
            *byte ^= 0xFF;
        }
        parts[2] = Base64::encode_string(&flipped);

        assert_eq!(
            decrypt(&key, &parts.join(":"), None),
            Err(CryptoError::DecryptFailed)
        );
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let envelope = encrypt(&derived_key(), "secret").unwrap();
        let other =
            CipherKey::Derived(DerivedKey::import(&Base64::encode_string(&[9u8; 32])).unwrap());

        assert_eq!(
            decrypt(&other, &envelope, None),
            Err(CryptoError::DecryptFailed)
        );
    }
}
