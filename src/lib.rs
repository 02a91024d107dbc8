//! # azrm - Azure Resource Manager execution and state modules
//!
//! azrm talks to Azure Resource Manager (ARM) over HTTPS and exposes two
//! layers on top of it:
//!
//! - **Execution modules** ([`exec`]): one async function per ARM operation
//!   (`get`, `create_or_update`, `delete`, `list`, ...), returning plain JSON
//!   with snake_case keys.
//! - **State modules** ([`states`]): idempotent `present`/`absent` functions
//!   that compare a resource against the desired parameters and only call
//!   ARM when something differs. Test mode reports the pending changes
//!   without making them.
//!
//! ## Core Concepts
//!
//! - **Profiles** ([`acct`]): credentials and subscription for one connection
//! - **Cloud environments** ([`auth`]): public, China, US Government, German,
//!   or a custom metadata endpoint
//! - **Client** ([`client`]): request/response seam, long-running operation
//!   polling and paging
//! - **State files** ([`sls`]): YAML documents of states run in order
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                             │
//! │              (azrm exec / state / modules / acct)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │   State files   │   │   State Registry    │   │   Exec Registry     │
//! │   (sls)         │──▶│   (present/absent)  │──▶│   (ARM operations)  │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!                                                              │
//!                                                              ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    ArmClient (HTTPS, retry, auth)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use azrm::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load(None)?;
//!     let profile = config.profile(None)?;
//!     let ctx = session::connect(&profile, &config).await?.with_test(true);
//!
//!     let file = StateFile::from_file("site.yml").await?;
//!     let registry = StateRegistry::with_builtins();
//!     let runs = StateRunner::new(&registry)
//!         .with_acct(Some(profile))
//!         .run(&file, |_| { let ctx = ctx.clone(); async move { Ok(ctx) } })
//!         .await;
//!     println!("{:?}", RunSummary::from_runs(&runs));
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::acct::Profile;
    pub use crate::auth::CloudEnvironment;
    pub use crate::client::{ArmClient, AzureError, AzureResult, HttpArmClient, PollerConfig};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorContext, Result};
    pub use crate::exec::{ExecContext, ExecModule, ExecRegistry, ModuleParams, ParamExt};
    pub use crate::session;
    pub use crate::sls::{RunSummary, StateFile, StateRun, StateRunner};
    pub use crate::states::{StateModule, StateRegistry, StateReturn, StateStatus};
}

/// Account profiles and the Key Vault profile backend
pub mod acct;

/// Credential flows and cloud environments
pub mod auth;

/// ARM client seam, long-running operations and paging
pub mod client;

/// Configuration loading
pub mod config;

/// Crate error types
pub mod error;

/// Execution modules
pub mod exec;

/// snake_case/camelCase conversion of ARM payloads
pub mod normalize;

/// ARM resource id parsing
pub mod resource_id;

/// Retry policy for throttled and failing requests
pub mod retry;

pub mod session;

/// State files
pub mod sls;

/// State modules
pub mod states;

/// Version of azrm
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
