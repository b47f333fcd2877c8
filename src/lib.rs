// Library exports for integration tests and external use

pub mod cli;
pub mod crypto;
pub mod fas;
pub mod gateman;
pub mod identity;
pub mod kv;
pub mod lockout;
