//! Storage port
//!
//! The engine talks to a relational store only through [`Storage`]. Values
//! crossing the port are raw storage values (see [`Value::is_raw`]).

use crate::errors::ExError;
use crate::model::Value;
use crate::sql::Statement;

/// Result of a data-changing statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Rowid of the last inserted row, for generated integer keys
    pub last_insert_id: Option<i64>,
}

/// One result row, columns in select-list order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Blocking connection to a relational store
///
/// Implementations map their native failures onto [`ExError`] kinds:
/// constraint failures to `ConstraintViolation` with the store's message
/// verbatim, lock waits past the configured timeout to `Timeout`, anything
/// else to `Persistence`.
pub trait Storage: Send {
    fn begin(&mut self) -> Result<(), ExError>;

    fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome, ExError>;

    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, ExError>;

    fn savepoint(&mut self, name: &str) -> Result<(), ExError>;

    fn release(&mut self, name: &str) -> Result<(), ExError>;

    /// Undo everything since the savepoint and drop it
    fn rollback_to(&mut self, name: &str) -> Result<(), ExError>;

    fn commit(&mut self) -> Result<(), ExError>;

    fn rollback(&mut self) -> Result<(), ExError>;

    fn in_transaction(&self) -> bool;

    /// Release the connection; rolls back an open transaction first
    fn close(&mut self) -> Result<(), ExError>;
}
