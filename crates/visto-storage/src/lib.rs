// Postgres storage layer with sqlx
//
// This crate provides database implementations for the core store traits:
// - Database implements DefinitionStore, InstanceStore and HistoryStore
//
// Invariants enforced at the storage layer (see migrations/):
// - at most one published definition per (organization, entity_type)
// - at most one non-terminal instance per (organization, entity_type, entity_id)

pub mod models;
pub mod repositories;

pub use models::*;
pub use repositories::Database;

/// Embedded migrations, applied at startup by the api and worker binaries.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
