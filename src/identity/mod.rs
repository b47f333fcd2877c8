//! Identity verification: worker and admin login, session refresh and
//! revocation, with the rate-limit, lockout and attendance policies that
//! surround them.

pub mod audit;
pub mod error;
pub mod ratelimit;
pub mod sync;
pub mod token;
pub mod users;
pub mod verifier;

pub use error::LoginError;
pub use token::{decode_access_token, issue_access_token, Claims, ACCESS_TOKEN_TTL_SECS};
pub use users::{User, UserRepo};
pub use verifier::{AdminLogin, AuthConfig, IdentityVerifier, Session, WorkerLogin};
