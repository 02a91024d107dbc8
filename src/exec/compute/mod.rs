//! Availability sets, managed disks and virtual machines.

pub mod availability_set;
pub mod disk;
pub mod virtual_machine;
