//! Keel Store - SQLite storage, migrations and schema files
//!
//! Provides:
//! - `SqliteStorage`, the storage port over a `rusqlite` connection
//! - Store configuration loadable from TOML
//! - DDL rendering and checksummed schema application
//! - The YAML schema file format v0

pub mod config;
pub mod db;
pub mod errors;
pub mod migrations;
pub mod schema_file;
pub mod sqlite;

// Re-export key types
pub use config::{JournalMode, StoreConfig};
pub use errors::Result;
pub use sqlite::SqliteStorage;
