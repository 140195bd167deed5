//! Migration collaborator
//!
//! Provides:
//! - DDL rendering from registry descriptors
//! - Checksummed, idempotent application recorded in `keel_schema_version`
//! - Drift detection for already-applied tables

pub mod checksums;
pub mod ddl;
mod runner;

pub use ddl::{render_association, render_schema, render_script, render_table, TableDdl};
pub use runner::{applied_tables, apply_schema, MigrationReport, SCHEMA_VERSION_TABLE};
