//! Migrate command
//!
//! Usage: keel migrate <FILE> --db <PATH>

use super::load_registry;
use clap::Args;
use keel_store::migrations::apply_schema;
use keel_store::{db, StoreConfig};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Path to schema YAML file
    pub file: PathBuf,

    /// Database file to create or update
    #[arg(long)]
    pub db: PathBuf,
}

/// Execute migrate command
pub fn execute(args: MigrateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(&args.file)?;

    if let Some(parent) = args.db.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut conn = db::open_with(&StoreConfig::file(&args.db))?;
    let report = apply_schema(&mut conn, &registry)?;

    for table in &report.applied {
        println!("✓ Created {}", table);
    }
    if !report.skipped.is_empty() {
        println!("{} table(s) already up to date", report.skipped.len());
    }
    Ok(())
}
