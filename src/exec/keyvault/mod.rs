//! Key Vault management and data plane.

pub mod secret;
pub mod vault;
