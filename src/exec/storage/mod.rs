//! Storage accounts and blob containers.

pub mod account;
pub mod container;
pub mod sas;
