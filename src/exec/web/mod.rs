//! App Service: plans and the apps hosted on them.

pub mod app;
pub mod app_service_plan;
