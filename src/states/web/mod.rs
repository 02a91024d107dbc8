//! App Service states.

pub mod function_app;
