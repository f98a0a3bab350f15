pub mod cache;
pub mod config;
pub mod error;
#[cfg(test)]
mod http_fixture;
pub mod pagination;
pub mod reconcile;
pub mod wordpress;
pub mod zendesk;

pub use error::MigrateError;
pub use reconcile::{ArticleOutcome, MigrationOptions, MigrationReport, Migrator, migrate};
