//! Bulk migration of Eclipse Ditto policies.

pub mod migration;
pub mod services;

pub use migration::{MigrationSummary, PolicyMigration};
pub use services::config::MigrationConfig;
pub use services::errors::{MigrationError, MigrationResult};
