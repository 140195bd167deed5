//! Parameterized statement rendering
//!
//! Identifiers are always double-quoted and values always bound through `?`
//! placeholders, so nothing user-supplied is spliced into SQL text.

use crate::model::Value;
use std::fmt;

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Statement without parameters
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"alias"."column"`
pub fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(alias), quote_ident(column))
}

pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

pub fn insert(table: &str, columns: &[String], values: Vec<Value>) -> Statement {
    if columns.is_empty() {
        return Statement::raw(format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table)));
    }
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    Statement::new(
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            cols.join(", "),
            placeholders(columns.len())
        ),
        values,
    )
}

/// `UPDATE` by primary key, optionally guarded by the expected row version
pub fn update(
    table: &str,
    assignments: Vec<(String, Value)>,
    pk: &str,
    key: Value,
    version: Option<(&str, i64)>,
) -> Statement {
    let mut sets = Vec::with_capacity(assignments.len());
    let mut params = Vec::with_capacity(assignments.len() + 2);
    for (column, value) in assignments {
        sets.push(format!("{} = ?", quote_ident(&column)));
        params.push(value);
    }
    let mut sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(table),
        sets.join(", "),
        quote_ident(pk)
    );
    params.push(key);
    if let Some((column, expected)) = version {
        sql.push_str(&format!(" AND {} = ?", quote_ident(column)));
        params.push(Value::Integer(expected));
    }
    Statement::new(sql, params)
}

pub fn delete(table: &str, pk: &str, key: Value, version: Option<(&str, i64)>) -> Statement {
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = ?",
        quote_ident(table),
        quote_ident(pk)
    );
    let mut params = vec![key];
    if let Some((column, expected)) = version {
        sql.push_str(&format!(" AND {} = ?", quote_ident(column)));
        params.push(Value::Integer(expected));
    }
    Statement::new(sql, params)
}

pub fn delete_in(table: &str, pk: &str, keys: Vec<Value>) -> Statement {
    Statement::new(
        format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote_ident(table),
            quote_ident(pk),
            placeholders(keys.len())
        ),
        keys,
    )
}

/// Insert one association row
pub fn link(table: &str, left: &str, right: &str, l: Value, r: Value) -> Statement {
    Statement::new(
        format!(
            "INSERT INTO {} ({}, {}) VALUES (?, ?)",
            quote_ident(table),
            quote_ident(left),
            quote_ident(right)
        ),
        vec![l, r],
    )
}

pub fn unlink(table: &str, left: &str, right: &str, l: Value, r: Value) -> Statement {
    Statement::new(
        format!(
            "DELETE FROM {} WHERE {} = ? AND {} = ?",
            quote_ident(table),
            quote_ident(left),
            quote_ident(right)
        ),
        vec![l, r],
    )
}
