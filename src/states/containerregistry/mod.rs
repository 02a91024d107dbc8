//! Container registry states.

pub mod registry;
