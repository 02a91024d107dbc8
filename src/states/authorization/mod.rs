//! Role-based access control.

pub mod role;
