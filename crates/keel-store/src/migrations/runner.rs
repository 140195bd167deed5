//! Schema application
//!
//! Creates every registered table that has not been applied yet and records
//! its checksum in `keel_schema_version`. A table whose recorded checksum no
//! longer matches its rendered DDL is reported, never altered.

use crate::errors::{checksum_mismatch, from_rusqlite, migration_error, Result};
use crate::migrations::ddl::{render_schema, TableDdl};
use keel_core::{log_op_end, log_op_error, log_op_start, SchemaRegistry};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::time::Instant;

/// Bookkeeping table holding one row per applied table
pub const SCHEMA_VERSION_TABLE: &str = "keel_schema_version";

/// Outcome of [`apply_schema`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Tables created by this run, in application order
    pub applied: Vec<String>,
    /// Tables already present with a matching checksum
    pub skipped: Vec<String>,
}

/// Apply every table of the registry
///
/// Runs in one transaction: on error nothing is created or recorded.
///
/// # Errors
///
/// `ChecksumMismatch` if an applied table drifted, `Persistence` if a
/// statement fails.
pub fn apply_schema(conn: &mut Connection, registry: &SchemaRegistry) -> Result<MigrationReport> {
    let start = Instant::now();
    let tables = render_schema(registry);
    log_op_start!("migrate", tables = tables.len());

    let result = apply_tables(conn, &tables);
    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(report) => {
            log_op_end!(
                "migrate",
                duration_ms = duration_ms,
                applied = report.applied.len(),
                skipped = report.skipped.len()
            );
        }
        Err(err) => {
            log_op_error!("migrate", err.clone(), duration_ms = duration_ms);
        }
    }
    result
}

fn apply_tables(conn: &mut Connection, tables: &[TableDdl]) -> Result<MigrationReport> {
    create_schema_version_table(conn)?;

    let tx = conn.transaction().map_err(from_rusqlite)?;
    let mut report = MigrationReport::default();
    for table in tables {
        match recorded_checksum(&tx, &table.table)? {
            Some(recorded) if recorded == table.checksum => {
                report.skipped.push(table.table.clone());
            }
            Some(recorded) => {
                return Err(checksum_mismatch(&table.table, &recorded, &table.checksum));
            }
            None => {
                apply_table(&tx, table)?;
                report.applied.push(table.table.clone());
            }
        }
    }
    tx.commit().map_err(from_rusqlite)?;
    Ok(report)
}

fn create_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                table_name TEXT PRIMARY KEY,
                checksum TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
            SCHEMA_VERSION_TABLE
        ),
        [],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

fn recorded_checksum(tx: &Transaction<'_>, table: &str) -> Result<Option<String>> {
    tx.query_row(
        &format!(
            "SELECT checksum FROM {} WHERE table_name = ?",
            SCHEMA_VERSION_TABLE
        ),
        [table],
        |row| row.get(0),
    )
    .optional()
    .map_err(from_rusqlite)
}

fn apply_table(tx: &Transaction<'_>, table: &TableDdl) -> Result<()> {
    for statement in &table.statements {
        tracing::debug!(
            component = module_path!(),
            op = "migrate",
            event = keel_core_types::schema::EVENT_STATEMENT,
            table = %table.table,
            sql = %statement,
        );
        tx.execute_batch(statement)
            .map_err(|e| migration_error(&table.table, &e.to_string()))?;
    }

    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        &format!(
            "INSERT INTO {} (table_name, checksum, applied_at) VALUES (?, ?, ?)",
            SCHEMA_VERSION_TABLE
        ),
        rusqlite::params![table.table, table.checksum, now],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

/// Recorded (table, checksum) pairs, by table name
pub fn applied_tables(conn: &Connection) -> Result<Vec<(String, String)>> {
    create_schema_version_table(conn)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT table_name, checksum FROM {} ORDER BY table_name",
            SCHEMA_VERSION_TABLE
        ))
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::model::{FieldDef, ModelDefinition};

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                ModelDefinition::new("Note")
                    .field(FieldDef::integer("id").primary_key())
                    .field(FieldDef::text("body")),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_apply_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        let report = apply_schema(&mut conn, &registry()).unwrap();
        assert_eq!(report.applied, vec!["note".to_string()]);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_idempotency() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_schema(&mut conn, &registry()).unwrap();
        let report = apply_schema(&mut conn, &registry()).unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped, vec!["note".to_string()]);
        assert_eq!(applied_tables(&conn).unwrap().len(), 1);
    }
}
