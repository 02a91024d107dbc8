//! Storage states.

pub mod account;
pub mod container;
