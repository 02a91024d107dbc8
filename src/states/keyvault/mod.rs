//! Key Vault states.

pub mod secret;
pub mod vault;
