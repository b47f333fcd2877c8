//! Cryptographic primitives shared by the identity subsystem: the versioned
//! AES-256-GCM envelope for PII at rest, keyed HMAC identity hashes, and the
//! self-describing PBKDF2 password record.
//!
//! The envelope and password string formats are durable on-disk formats
//! shared with other deployments; they must stay byte-compatible.

pub mod envelope;
pub mod keys;
pub mod password;

pub use envelope::{decrypt, encrypt, CipherKey, CryptoError};
pub use keys::{keyed_hash, DerivedKey, KeyRing, MacKey, KEY_VERSION};
pub use password::{hash_password, verify_password};
