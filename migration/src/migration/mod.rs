//! Policy migration
//!
//! Streams policies from the store, applies the configured steps to each one
//! and writes changed policies back.
//!
//! # Architecture
//!
//! - **Types**: the policy document model and step configuration
//! - **Steps**: pure, idempotent edits on a single policy
//! - **Progress**: per-document state and the run summary
//! - **Orchestrator**: connects, drives the search, bounds in-flight writes and
//!   matches responses to writes by correlation id
//!
//! # Usage
//!
//! ```ignore
//! use policy_migration::{MigrationConfig, PolicyMigration};
//!
//! let config = MigrationConfig::load_from_file("config.yml")?;
//! let summary = PolicyMigration::from_config(config)?.run().await?;
//! std::process::exit(summary.exit_code());
//! ```

pub mod orchestrator;
pub mod progress;
pub mod steps;
pub mod types;

pub use orchestrator::PolicyMigration;
pub use progress::*;
pub use types::*;
