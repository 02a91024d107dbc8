//! Redis cache states.

pub mod operations;
