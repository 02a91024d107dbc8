//! Network states.

pub mod network_security_group;
pub mod public_ip_address;
pub mod virtual_network;
