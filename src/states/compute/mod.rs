//! Compute states.

pub mod availability_set;
pub mod disk;
pub mod virtual_machine;
