use base64ct::{Base64, Encoding};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_BYTES: usize = 16;
const KEY_BYTES: usize = 32;

/// Hashes a password into the self-describing record
/// `pbkdf2:<iterations>:<saltB64>:<hashB64>`.
///
/// The record carries everything verification needs, so the iteration count
/// can be raised later without invalidating stored hashes.
#[must_use]
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut salt);

    let mut derived = [0u8; KEY_BYTES];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut derived);

    format!(
        "pbkdf2:{PBKDF2_ITERATIONS}:{}:{}",
        Base64::encode_string(&salt),
        Base64::encode_string(&derived),
    )
}

/// Verifies a password against a stored record, recomputing with the
/// *stored* iteration count and comparing in constant time.
///
/// Malformed records verify to `false`, never panic or error.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    let parts: Vec<&str> = stored.split(':').collect();
    if parts.len() != 4 || parts[0] != "pbkdf2" {
        return false;
    }
    let Ok(iterations) = parts[1].parse::<u32>() else {
        return false;
    };
    if iterations == 0 {
        return false;
    }
    let Ok(salt) = Base64::decode_vec(parts[2]) else {
        return false;
    };
    let Ok(expected) = Base64::decode_vec(parts[3]) else {
        return false;
    };
    if expected.is_empty() {
        return false;
    }

    let mut derived = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut derived);

    derived.ct_eq(&expected).into()
}
