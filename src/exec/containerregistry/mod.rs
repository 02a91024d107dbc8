//! Azure Container Registry.

pub mod registry;
pub mod replication;
