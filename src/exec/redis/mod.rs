//! Azure Cache for Redis.

pub mod operations;
