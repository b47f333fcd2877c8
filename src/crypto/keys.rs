use hmac::{Hmac, Mac};
use secrecy::SecretString;
use sha2::Sha256;

use crate::crypto::envelope::{decode_key_material, CipherKey, CryptoError};

type HmacSha256 = Hmac<Sha256>;

/// Version tag written into new envelopes. Bump when the PII key rotates;
/// decryption only accepts the current version, older ciphertext must be
/// re-encrypted by a migration.
pub const KEY_VERSION: u32 = 1;

/// Key material validated at startup and tagged with the envelope version
/// it produces.
#[derive(Clone)]
pub struct DerivedKey {
    pub(crate) key: [u8; 32],
    pub(crate) version: u32,
}

impl DerivedKey {
    /// Imports a base64-encoded 32-byte key.
    ///
    /// # Errors
    /// Returns [`CryptoError::InvalidKey`] when the input is not valid
    /// base64 or does not decode to exactly 32 bytes.
    pub fn import(base64_key: &str) -> Result<Self, CryptoError> {
        let key = decode_key_material(base64_key)?;
        Ok(Self {
            key,
            version: KEY_VERSION,
        })
    }
}

/// Keyed-hash secret: either the shared-secret string as configured, or
/// pre-derived raw key bytes. Both sign with HMAC-SHA256; the split mirrors
/// the two key-handle shapes accepted by [`keyed_hash`].
#[derive(Clone)]
pub enum MacKey {
    Raw(String),
    Derived(Vec<u8>),
}

/// HMAC-SHA256 hex digest. Deterministic for equal inputs; used as a
/// non-reversible lookup and lockout key for phone numbers and usernames,
/// never for confidentiality.
#[must_use]
pub fn keyed_hash(secret: &MacKey, data: &str) -> String {
    let key_bytes = match secret {
        MacKey::Raw(secret) => secret.as_bytes(),
        MacKey::Derived(bytes) => bytes.as_slice(),
    };
    let mut mac = HmacSha256::new_from_slice(key_bytes).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    format!("{:x}", mac.finalize().into_bytes())
}

/// All key material the verifier needs, validated once at startup.
///
/// New writes always use the derived (versioned) key; the raw base64 key is
/// kept only as the decrypt fallback for envelopes written before
/// versioning was introduced.
#[derive(Clone)]
pub struct KeyRing {
    cipher: CipherKey,
    legacy_key: String,
    mac: MacKey,
    jwt_secret: SecretString,
}

impl KeyRing {
    /// # Errors
    /// Returns an error when the encryption key is not a base64-encoded
    /// 32-byte value.
    pub fn new(
        encryption_key_base64: &str,
        hmac_secret: &str,
        jwt_secret: SecretString,
    ) -> Result<Self, CryptoError> {
        let derived = DerivedKey::import(encryption_key_base64)?;
        Ok(Self {
            cipher: CipherKey::Derived(derived),
            legacy_key: encryption_key_base64.to_string(),
            mac: MacKey::Raw(hmac_secret.to_string()),
            jwt_secret,
        })
    }

    #[must_use]
    pub fn cipher(&self) -> &CipherKey {
        &self.cipher
    }

    #[must_use]
    pub fn mac(&self) -> &MacKey {
        &self.mac
    }

    #[must_use]
    pub fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    /// Identity hash over an already-normalized value (digits-only phone,
    /// trimmed username).
    #[must_use]
    pub fn identity_hash(&self, normalized: &str) -> String {
        keyed_hash(&self.mac, normalized)
    }

    /// Encrypts PII with the current derived key; output is versioned.
    ///
    /// # Errors
    /// Propagates envelope encryption failures.
    pub fn encrypt_pii(&self, plaintext: &str) -> Result<String, CryptoError> {
        super::envelope::encrypt(&self.cipher, plaintext)
    }

    /// Decrypts PII written under either the versioned or the legacy
    /// format, supplying the raw key as the legacy fallback.
    ///
    /// # Errors
    /// Propagates envelope decryption failures; an unsupported version or a
    /// malformed envelope is data corruption and stays a hard error.
    pub fn decrypt_pii(&self, envelope: &str) -> Result<String, CryptoError> {
        super::envelope::decrypt(&self.cipher, envelope, Some(&self.legacy_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64ct::{Base64, Encoding};

    fn test_key_base64() -> String {
        Base64::encode_string(&[7u8; 32])
    }

    #[test]
    fn test_keyed_hash_is_deterministic_hex() {
        let mac = MacKey::Raw("shared-secret".to_string());
        let a = keyed_hash(&mac, "01012345678");
        let b = keyed_hash(&mac, "01012345678");

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_keyed_hash_derived_matches_raw_bytes() {
        let raw = MacKey::Raw("shared-secret".to_string());
        let derived = MacKey::Derived(b"shared-secret".to_vec());

        assert_eq!(keyed_hash(&raw, "data"), keyed_hash(&derived, "data"));
    }

    #[test]
    fn test_derived_key_rejects_short_material() {
        let short = Base64::encode_string(b"short");
        assert!(DerivedKey::import(&short).is_err());
    }

    #[test]
    fn test_key_ring_round_trip() {
        let ring = KeyRing::new(
            &test_key_base64(),
            "hmac-secret",
            SecretString::from("jwt-secret"),
        )
        .unwrap();

        let envelope = ring.encrypt_pii("01012345678").unwrap();
        assert!(envelope.starts_with(&format!("v{KEY_VERSION}:")));
        assert_eq!(ring.decrypt_pii(&envelope).unwrap(), "01012345678");
    }

    #[test]
    fn test_key_ring_decrypts_legacy_envelope() {
        let key = test_key_base64();
        let ring =
            KeyRing::new(&key, "hmac-secret", SecretString::from("jwt-secret")).unwrap();

        let legacy = super::super::envelope::encrypt(&CipherKey::Raw(key), "19900101").unwrap();
        assert_eq!(legacy.split(':').count(), 3);
        assert_eq!(ring.decrypt_pii(&legacy).unwrap(), "19900101");
    }
}
