//! SQLite implementation of the storage port

use crate::config::StoreConfig;
use crate::db;
use crate::errors::{from_rusqlite, Result};
use keel_core::errors::{ExError, ExErrorKind};
use keel_core::model::Value;
use keel_core::sql::{quote_ident, Statement};
use keel_core::storage::{ExecOutcome, Row, Storage};
use keel_core_types::schema::EVENT_STATEMENT;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};

/// `Storage` over one `rusqlite` connection
///
/// Transactions are driven with plain `BEGIN`/`COMMIT`/`ROLLBACK` and named
/// savepoints, so the connection can be handed to a session as-is.
pub struct SqliteStorage {
    conn: Option<Connection>,
    log_parameters: bool,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("open", &self.conn.is_some())
            .field("log_parameters", &self.log_parameters)
            .finish()
    }
}

impl SqliteStorage {
    /// Open the database described by `config`
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = db::open_with(config)?;
        Ok(Self {
            conn: Some(conn),
            log_parameters: config.log_parameters,
        })
    }

    /// Fresh in-memory database with default settings
    pub fn in_memory() -> Result<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    /// Wrap an already configured connection
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Some(conn),
            log_parameters: false,
        }
    }

    pub fn with_parameter_logging(mut self, enabled: bool) -> Self {
        self.log_parameters = enabled;
        self
    }

    /// Underlying connection, e.g. to apply a schema before opening a session
    pub fn connection(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or_else(closed)
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(closed)
    }

    fn log_statement(&self, statement: &Statement) {
        if self.log_parameters {
            let params: Vec<String> = statement.params.iter().map(|p| p.to_string()).collect();
            tracing::debug!(
                component = module_path!(),
                op = "sqlite",
                event = EVENT_STATEMENT,
                sql = %statement.sql,
                params = ?params,
            );
        } else {
            tracing::debug!(
                component = module_path!(),
                op = "sqlite",
                event = EVENT_STATEMENT,
                sql = %statement.sql,
            );
        }
    }

    fn batch(&mut self, sql: &str) -> Result<()> {
        self.log_statement(&Statement::raw(sql));
        self.conn()?.execute_batch(sql).map_err(from_rusqlite)
    }
}

fn closed() -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("sqlite")
        .with_message("connection is closed")
}

fn to_sql(value: &Value) -> Result<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Integer(v) => Ok(SqlValue::Integer(*v)),
        Value::Float(v) => Ok(SqlValue::Real(*v)),
        Value::Text(s) => Ok(SqlValue::Text(s.clone())),
        Value::Bytes(b) => Ok(SqlValue::Blob(b.clone())),
        other => Err(ExError::new(ExErrorKind::Internal)
            .with_op("sqlite")
            .with_message(format!(
                "storage only binds raw values, got {}",
                other.type_name()
            ))),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(v),
        SqlValue::Real(v) => Value::Float(v),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Blob(b) => Value::Bytes(b),
    }
}

fn bind(statement: &Statement) -> Result<Vec<SqlValue>> {
    statement.params.iter().map(to_sql).collect()
}

impl Storage for SqliteStorage {
    fn begin(&mut self) -> Result<()> {
        self.batch("BEGIN")
    }

    fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome> {
        self.log_statement(statement);
        let params = bind(statement)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&statement.sql).map_err(from_rusqlite)?;
        let rows_affected = stmt
            .execute(params_from_iter(params))
            .map_err(from_rusqlite)?;
        let is_insert = statement
            .sql
            .trim_start()
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("INSERT"));
        Ok(ExecOutcome {
            rows_affected: rows_affected as u64,
            last_insert_id: is_insert.then(|| conn.last_insert_rowid()),
        })
    }

    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        self.log_statement(statement);
        let params = bind(statement)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&statement.sql).map_err(from_rusqlite)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let mut rows = stmt.query(params_from_iter(params)).map_err(from_rusqlite)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(from_rusqlite)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let value: SqlValue = row.get(i).map_err(from_rusqlite)?;
                values.push(from_sql(value));
            }
            out.push(Row::new(columns.clone(), values));
        }
        Ok(out)
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        self.batch(&format!("SAVEPOINT {}", quote_ident(name)))
    }

    fn release(&mut self, name: &str) -> Result<()> {
        self.batch(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
    }

    fn rollback_to(&mut self, name: &str) -> Result<()> {
        let sql = format!(
            "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}",
            name = quote_ident(name)
        );
        self.batch(&sql)
    }

    fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.batch("ROLLBACK")
    }

    fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| !c.is_autocommit())
    }

    fn close(&mut self) -> Result<()> {
        if self.in_transaction() {
            self.rollback()?;
        }
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| from_rusqlite(e)),
            None => Ok(()),
        }
    }
}
