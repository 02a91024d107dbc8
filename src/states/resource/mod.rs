//! States for resource groups, management locks and policy.

pub mod group;
pub mod management_lock;
pub mod policy;
