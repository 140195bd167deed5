//! Keel CLI
//!
//! Command-line interface for Keel schema files

use clap::{Parser, Subcommand};
use keel_core::logging_facility::{self, Profile};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "keel")]
#[command(about = "Keel - Lightweight ORM schema tooling", long_about = None)]
struct Cli {
    /// Logging profile (development, production); silent when omitted
    #[arg(long, global = true)]
    log: Option<Profile>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Schema file operations (check, ddl)
    Schema(commands::schema::SchemaArgs),
    /// Apply a schema file to a database
    Migrate(commands::migrate::MigrateArgs),
}

fn main() {
    let cli = Cli::parse();
    if let Some(profile) = cli.log {
        logging_facility::init(profile);
    }

    let result = match cli.command {
        Commands::Schema(args) => commands::schema::execute(args),
        Commands::Migrate(args) => commands::migrate::execute(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
