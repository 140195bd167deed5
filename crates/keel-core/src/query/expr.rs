//! Query expression tree
//!
//! Expressions are plain immutable values. Building never fails; every
//! check against the schema happens in [`compile`](super::compile).

use crate::model::Value;
use std::ops::{BitAnd, BitOr, Not};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Operators that need an ordered type
    pub fn is_range(&self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Ne)
    }
}

/// Boolean condition over a model's fields
///
/// Paths are field names, optionally prefixed by many-to-one relationship
/// names (`author.email`).
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        path: String,
        op: CompareOp,
        value: Value,
    },
    Between {
        path: String,
        low: Value,
        high: Value,
    },
    In {
        path: String,
        values: Vec<Value>,
        negated: bool,
    },
    IsNull {
        path: String,
        negated: bool,
    },
    /// All named flags set, or with `negated` none of them set
    HasFlags {
        path: String,
        flags: Vec<String>,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// At least one related row through a collection relationship
    Exists {
        relationship: String,
        filter: Option<Box<Predicate>>,
    },
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

impl BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Predicate) -> Predicate {
        self.and(rhs)
    }
}

impl BitOr for Predicate {
    type Output = Predicate;

    fn bitor(self, rhs: Predicate) -> Predicate {
        self.or(rhs)
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        self.negate()
    }
}

/// Field reference used to build predicates and orderings
#[derive(Debug, Clone)]
pub struct Column {
    path: String,
}

pub fn col(path: impl Into<String>) -> Column {
    Column { path: path.into() }
}

/// Rows with at least one related row through `relationship`
pub fn exists(relationship: impl Into<String>) -> Predicate {
    Predicate::Exists {
        relationship: relationship.into(),
        filter: None,
    }
}

/// Rows with at least one related row matching `filter`
pub fn exists_where(relationship: impl Into<String>, filter: Predicate) -> Predicate {
    Predicate::Exists {
        relationship: relationship.into(),
        filter: Some(Box::new(filter)),
    }
}

impl Column {
    pub fn path(&self) -> &str {
        &self.path
    }

    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            path: self.path,
            op,
            value: value.into(),
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ge, value)
    }

    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Predicate {
        Predicate::Between {
            path: self.path,
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn is_in<I, V>(self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            path: self.path,
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in<I, V>(self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            path: self.path,
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn is_null(self) -> Predicate {
        Predicate::IsNull {
            path: self.path,
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Predicate {
        Predicate::IsNull {
            path: self.path,
            negated: true,
        }
    }

    pub fn has(self, flag: impl Into<String>) -> Predicate {
        Predicate::HasFlags {
            path: self.path,
            flags: vec![flag.into()],
            negated: false,
        }
    }

    pub fn has_all<I, S>(self, flags: I) -> Predicate
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::HasFlags {
            path: self.path,
            flags: flags.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn has_not(self, flag: impl Into<String>) -> Predicate {
        Predicate::HasFlags {
            path: self.path,
            flags: vec![flag.into()],
            negated: true,
        }
    }

    pub fn asc(self) -> OrderBy {
        OrderBy {
            path: self.path,
            direction: Direction::Asc,
        }
    }

    pub fn desc(self) -> OrderBy {
        OrderBy {
            path: self.path,
            direction: Direction::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub path: String,
    pub direction: Direction,
}

/// Immutable description of a select over one model
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    model: String,
    filter: Option<Predicate>,
    joins: Vec<String>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Query {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            filter: None,
            joins: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Add a condition; repeated calls are combined with AND
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Load a relationship together with the result rows
    pub fn join(mut self, relationship: impl Into<String>) -> Self {
        let relationship = relationship.into();
        if !self.joins.contains(&relationship) {
            self.joins.push(relationship);
        }
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.filter.as_ref()
    }

    pub fn joins(&self) -> &[String] {
        &self.joins
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn is_paginated(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_accumulate_with_and() {
        let q = Query::new("User")
            .filter(col("active").eq(true))
            .filter(col("age").gt(18i64));
        match q.predicate() {
            Some(Predicate::And(parts)) => assert_eq!(parts.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_operators_build_trees() {
        let p = (col("a").eq(1i64) | col("b").eq(2i64)) & !col("c").is_null();
        match p {
            Predicate::And(parts) => {
                assert!(matches!(parts[0], Predicate::Or(_)));
                assert!(matches!(parts[1], Predicate::Not(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_builders_leave_original_untouched() {
        let base = Query::new("Post");
        let paged = base.clone().limit(10);
        assert_eq!(base.limit_value(), None);
        assert_eq!(paged.limit_value(), Some(10));
        assert!(paged.is_paginated());
    }

    #[test]
    fn test_join_deduplicates() {
        let q = Query::new("Post").join("author").join("author");
        assert_eq!(q.joins(), &["author".to_string()]);
    }
}
