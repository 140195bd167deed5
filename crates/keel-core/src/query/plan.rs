//! Compiled query plans

use crate::sql::Statement;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedColumn {
    pub column: String,
    /// Result-set label, `{alias}__{column}`
    pub label: String,
}

/// Columns of one table instance in the select list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub alias: String,
    pub model: String,
    /// Relationship of the root this table was joined through
    pub relationship: Option<String>,
    pub columns: Vec<ProjectedColumn>,
}

impl Projection {
    pub fn label_of(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.label.as_str())
    }
}

/// Result of compiling a [`Query`](super::Query)
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub model: String,
    pub statement: Statement,
    pub root: Projection,
    /// Eagerly joined many-to-one targets
    pub joined: Vec<Projection>,
    /// Relationships loaded with one batched follow-up query: collections
    /// and the back side of one-to-one
    pub eager_collections: Vec<String>,
    /// SHA-256 over the statement text and parameters, hex encoded
    pub fingerprint: String,
}

/// Batched load of one collection relationship for a set of owners
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionLoad {
    pub statement: Statement,
    pub target: Projection,
    /// Label of the column holding the owner's key in each row
    pub owner_label: String,
}
