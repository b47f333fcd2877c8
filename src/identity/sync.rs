//! Roster synchronization: turning a FAS employee record into a local
//! account with hashed and encrypted identity fields.

use anyhow::{anyhow, Result};
use sqlx::PgPool;

use crate::crypto::KeyRing;
use crate::fas::FasEmployee;
use crate::identity::users::{ExternalEmployee, User, UserRepo};

/// Derives the full `YYYYMMDD` birth date from a resident registration
/// number. The 7th digit encodes the century: 1, 2, 5, 6 are 1900s and
/// 3, 4, 7, 8 are 2000s.
pub fn social_no_to_dob(social_no: &str) -> Option<String> {
    let digits: String = social_no.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 7 {
        return None;
    }

    let century = match &digits[6..7] {
        "1" | "2" | "5" | "6" => "19",
        "3" | "4" | "7" | "8" => "20",
        _ => return None,
    };
    Some(format!("{century}{}", &digits[..6]))
}

/// Does a submitted birth date match the roster's? Workers type either the
/// full `YYYYMMDD` or the short `YYMMDD`.
#[must_use]
pub fn dob_matches(submitted: &str, full_dob: &str) -> bool {
    match submitted.len() {
        8 => submitted == full_dob,
        6 => full_dob.len() == 8 && submitted == &full_dob[2..],
        _ => false,
    }
}

/// Display masking for names: first character kept, middle masked, last
/// kept for names of three or more characters.
#[must_use]
pub fn mask_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    match chars.len() {
        0 => String::new(),
        1 => "*".to_string(),
        2 => format!("{}*", chars[0]),
        len => {
            let middle = "*".repeat(len - 2);
            format!("{}{middle}{}", chars[0], chars[len - 1])
        }
    }
}

/// Creates or refreshes the local account for a FAS employee: identity
/// hashes for lookup, envelope-encrypted phone and birth date for display.
///
/// # Errors
/// Fails when the roster record has no usable birth date, on envelope
/// encryption failure, or on a database error.
pub async fn sync_fas_employee(
    pool: &PgPool,
    keys: &KeyRing,
    employee: &FasEmployee,
) -> Result<User> {
    let phone: String = employee.phone.chars().filter(char::is_ascii_digit).collect();
    if phone.is_empty() {
        return Err(anyhow!("roster record has no phone number"));
    }
    let dob = social_no_to_dob(&employee.social_no)
        .ok_or_else(|| anyhow!("roster record has no usable birth date"))?;

    let record = ExternalEmployee {
        name: employee.name.trim().to_string(),
        name_masked: mask_name(employee.name.trim()),
        phone_hash: keys.identity_hash(&phone),
        dob_hash: keys.identity_hash(&dob),
        phone_encrypted: keys.encrypt_pii(&phone)?,
        dob_encrypted: keys.encrypt_pii(&dob)?,
        external_worker_id: employee.empl_cd.clone(),
    };

    UserRepo::upsert_external_employee(pool, &record).await
}
