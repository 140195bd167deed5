//! Database connection management
//!
//! Provides utilities for opening and configuring SQLite connections

use crate::config::StoreConfig;
use crate::errors::{config_error, from_rusqlite, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Open a SQLite database at the given path
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    Connection::open(path).map_err(from_rusqlite)
}

/// Open an in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(from_rusqlite)
}

/// Open and configure the database a config points at
pub fn open_with(config: &StoreConfig) -> Result<Connection> {
    config.validate()?;
    let conn = if config.in_memory {
        open_in_memory()?
    } else {
        let path = config
            .path
            .as_ref()
            .ok_or_else(|| config_error("no database path configured"))?;
        open(path)?
    };
    configure(&conn, config)?;
    Ok(conn)
}

/// Apply connection settings
pub fn configure(conn: &Connection, config: &StoreConfig) -> Result<()> {
    let foreign_keys = if config.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {};", foreign_keys))
        .map_err(from_rusqlite)?;

    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(from_rusqlite)?;

    // In-memory databases only support MEMORY journaling
    if !config.in_memory {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};",
            config.journal_mode.as_str()
        ))
        .map_err(from_rusqlite)?;
    }

    Ok(())
}
