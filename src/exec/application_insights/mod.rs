//! Application Insights.

pub mod component;
