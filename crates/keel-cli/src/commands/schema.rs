//! Schema file commands
//!
//! Usage:
//!   keel schema check <FILE>
//!   keel schema ddl <FILE>

use super::load_registry;
use clap::{Args, Subcommand};
use keel_store::migrations::render_script;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct SchemaArgs {
    #[command(subcommand)]
    pub command: SchemaCommand,
}

#[derive(Debug, Subcommand)]
pub enum SchemaCommand {
    /// Parse and register a schema file, listing its tables
    Check(FileArgs),
    /// Print the DDL script for a schema file
    Ddl(FileArgs),
}

#[derive(Debug, Args)]
pub struct FileArgs {
    /// Path to schema YAML file
    pub file: PathBuf,
}

/// Execute schema command
pub fn execute(args: SchemaArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        SchemaCommand::Check(file_args) => execute_check(file_args),
        SchemaCommand::Ddl(file_args) => execute_ddl(file_args),
    }
}

fn execute_check(args: FileArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(&args.file)?;

    // Parents first, so the listing doubles as creation order
    for table in registry.dependency_order() {
        println!("{} -> {}", table.model, table.table);
    }
    for link in registry.associations() {
        println!("(link) {}", link.table);
    }
    println!("✓ Schema OK");
    Ok(())
}

fn execute_ddl(args: FileArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(&args.file)?;
    print!("{}", render_script(&registry));
    Ok(())
}
