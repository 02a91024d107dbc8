//! Resource manager modules: resource groups, management locks, policy.

pub mod group;
pub mod management_lock;
pub mod policy;
