//! Query compilation
//!
//! Turns a [`Query`] into a parameterized statement plus the projections
//! needed to hydrate its rows. Compilation reads only the registry, so the
//! same query always yields the same plan and fingerprint.

use crate::errors::{KeelError, Result};
use crate::model::{convert, SemanticType, Value};
use crate::query::expr::{CompareOp, Direction, Predicate, Query};
use crate::query::plan::{CollectionLoad, ProjectedColumn, Projection, QueryPlan};
use crate::registry::descriptor::{ColumnDescriptor, RelationshipShape, TableDescriptor};
use crate::registry::SchemaRegistry;
use crate::sql::{placeholders, qualified, quote_ident, Statement};
use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

struct Join<'r> {
    path: String,
    alias: String,
    descriptor: &'r TableDescriptor,
    sql: String,
}

/// Table a predicate is evaluated against, plus the joins it pulled in
struct Scope<'r> {
    descriptor: &'r TableDescriptor,
    alias: String,
    joins: Vec<Join<'r>>,
}

impl<'r> Scope<'r> {
    fn join_sql(&self) -> String {
        self.joins.iter().map(|j| format!(" {}", j.sql)).collect()
    }
}

struct Compiler<'r> {
    registry: &'r SchemaRegistry,
    root_model: String,
    params: Vec<Value>,
    next_alias: usize,
}

impl<'r> Compiler<'r> {
    fn new(registry: &'r SchemaRegistry, root_model: &str) -> Self {
        Self {
            registry,
            root_model: root_model.to_string(),
            params: Vec::new(),
            next_alias: 0,
        }
    }

    fn alias(&mut self) -> String {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn scope(&mut self, descriptor: &'r TableDescriptor) -> Scope<'r> {
        Scope {
            descriptor,
            alias: self.alias(),
            joins: Vec::new(),
        }
    }

    fn unresolved(&self, path: &str) -> KeelError {
        KeelError::UnresolvedField {
            model: self.root_model.clone(),
            path: path.to_string(),
        }
    }

    /// Join a chain of single-valued relationships, reusing earlier joins
    fn join_path(
        &mut self,
        scope: &mut Scope<'r>,
        segments: &[&str],
        full_path: &str,
    ) -> Result<(String, &'r TableDescriptor)> {
        let mut descriptor = scope.descriptor;
        let mut alias = scope.alias.clone();
        let mut prefix = String::new();
        for segment in segments {
            let rel = descriptor
                .relationship(segment)
                .ok_or_else(|| self.unresolved(full_path))?;
            // (column on the joined table, column on the current one)
            let (target_column, local_column) = match &rel.shape {
                RelationshipShape::ManyToOne {
                    local_column,
                    target_column,
                }
                | RelationshipShape::OneToOne {
                    local_column,
                    target_column,
                } => (target_column.as_str(), local_column.as_str()),
                RelationshipShape::OneToOneBack { remote_column } => {
                    (remote_column.as_str(), descriptor.primary_key.as_str())
                }
                _ => {
                    return Err(KeelError::InvalidQuery {
                        model: self.root_model.clone(),
                        reason: format!(
                            "'{}' in '{}' is a collection; filter it with exists",
                            segment, full_path
                        ),
                    })
                }
            };
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(segment);

            if let Some(existing) = scope.joins.iter().find(|j| j.path == prefix) {
                descriptor = existing.descriptor;
                alias = existing.alias.clone();
                continue;
            }
            let target = self.registry.resolve(&rel.target_model)?;
            let target_alias = self.alias();
            let sql = format!(
                "LEFT JOIN {} AS {} ON {} = {}",
                quote_ident(&target.table),
                quote_ident(&target_alias),
                qualified(&target_alias, target_column),
                qualified(&alias, local_column)
            );
            scope.joins.push(Join {
                path: prefix.clone(),
                alias: target_alias.clone(),
                descriptor: target,
                sql,
            });
            descriptor = target;
            alias = target_alias;
        }
        Ok((alias, descriptor))
    }

    fn resolve_column(
        &mut self,
        scope: &mut Scope<'r>,
        path: &str,
    ) -> Result<(String, &'r TableDescriptor, &'r ColumnDescriptor)> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(self.unresolved(path));
        }
        let (last, relationships) = match segments.split_last() {
            Some(split) => split,
            None => return Err(self.unresolved(path)),
        };
        let (alias, descriptor) = self.join_path(scope, relationships, path)?;
        let column = descriptor
            .column(last)
            .ok_or_else(|| self.unresolved(path))?;
        Ok((qualified(&alias, &column.name), descriptor, column))
    }

    /// Check a literal against the column type and encode it for storage
    fn literal(
        &self,
        descriptor: &TableDescriptor,
        column: &ColumnDescriptor,
        value: &Value,
    ) -> Result<Value> {
        let mismatch = || KeelError::TypeMismatch {
            model: descriptor.model.clone(),
            field: column.name.clone(),
            expected: column.ty.name(),
            found: value.type_name().to_string(),
        };
        let normalized = coerce_literal(&column.ty, value).ok_or_else(|| mismatch())?;
        convert::to_storage(&column.ty, &normalized, self.registry.codec_for(&column.ty))
            .map_err(|_| mismatch())
    }

    fn require_orderable(
        &self,
        descriptor: &TableDescriptor,
        column: &ColumnDescriptor,
    ) -> Result<()> {
        if column.ty.is_orderable() {
            Ok(())
        } else {
            Err(KeelError::TypeMismatch {
                model: descriptor.model.clone(),
                field: column.name.clone(),
                expected: "orderable type".to_string(),
                found: column.ty.name(),
            })
        }
    }

    fn render(&mut self, scope: &mut Scope<'r>, predicate: &Predicate) -> Result<String> {
        match predicate {
            Predicate::Compare { path, op, value } => {
                let (target, descriptor, column) = self.resolve_column(scope, path)?;
                if value.is_null() {
                    return match op {
                        CompareOp::Eq => Ok(format!("{} IS NULL", target)),
                        CompareOp::Ne => Ok(format!("{} IS NOT NULL", target)),
                        _ => Err(KeelError::TypeMismatch {
                            model: descriptor.model.clone(),
                            field: column.name.clone(),
                            expected: column.ty.name(),
                            found: value.type_name().to_string(),
                        }),
                    };
                }
                if op.is_range() {
                    self.require_orderable(descriptor, column)?;
                }
                let param = self.literal(descriptor, column, value)?;
                self.params.push(param);
                Ok(format!("{} {} ?", target, op.sql()))
            }
            Predicate::Between { path, low, high } => {
                let (target, descriptor, column) = self.resolve_column(scope, path)?;
                self.require_orderable(descriptor, column)?;
                let low = self.literal(descriptor, column, low)?;
                let high = self.literal(descriptor, column, high)?;
                self.params.push(low);
                self.params.push(high);
                Ok(format!("{} BETWEEN ? AND ?", target))
            }
            Predicate::In {
                path,
                values,
                negated,
            } => {
                let (target, descriptor, column) = self.resolve_column(scope, path)?;
                if values.is_empty() {
                    return Ok(if *negated { "1 = 1" } else { "0 = 1" }.to_string());
                }
                for value in values {
                    let param = self.literal(descriptor, column, value)?;
                    self.params.push(param);
                }
                Ok(format!(
                    "{} {}IN ({})",
                    target,
                    if *negated { "NOT " } else { "" },
                    placeholders(values.len())
                ))
            }
            Predicate::IsNull { path, negated } => {
                let (target, _, _) = self.resolve_column(scope, path)?;
                Ok(format!(
                    "{} IS {}NULL",
                    target,
                    if *negated { "NOT " } else { "" }
                ))
            }
            Predicate::HasFlags {
                path,
                flags,
                negated,
            } => {
                let (target, descriptor, column) = self.resolve_column(scope, path)?;
                let def = match &column.ty {
                    SemanticType::Flags(def) => def,
                    other => {
                        return Err(KeelError::TypeMismatch {
                            model: descriptor.model.clone(),
                            field: column.name.clone(),
                            expected: "flags".to_string(),
                            found: other.name(),
                        })
                    }
                };
                if flags.is_empty() {
                    return Err(KeelError::InvalidQuery {
                        model: self.root_model.clone(),
                        reason: format!("flag test on '{}' names no flags", path),
                    });
                }
                let mut bits = 0;
                for flag in flags {
                    bits |= def.bit(flag).ok_or_else(|| KeelError::TypeMismatch {
                        model: descriptor.model.clone(),
                        field: column.name.clone(),
                        expected: format!("member of {}", def.name),
                        found: flag.clone(),
                    })?;
                }
                if *negated {
                    self.params.push(Value::Integer(bits));
                    Ok(format!("({} & ?) = 0", target))
                } else {
                    self.params.push(Value::Integer(bits));
                    self.params.push(Value::Integer(bits));
                    Ok(format!("({} & ?) = ?", target))
                }
            }
            Predicate::And(parts) => self.render_group(scope, parts, "AND", "1 = 1"),
            Predicate::Or(parts) => self.render_group(scope, parts, "OR", "0 = 1"),
            Predicate::Not(inner) => Ok(format!("NOT ({})", self.render(scope, inner)?)),
            Predicate::Exists {
                relationship,
                filter,
            } => self.render_exists(scope, relationship, filter.as_deref()),
        }
    }

    fn render_group(
        &mut self,
        scope: &mut Scope<'r>,
        parts: &[Predicate],
        joiner: &str,
        empty: &str,
    ) -> Result<String> {
        if parts.is_empty() {
            return Ok(empty.to_string());
        }
        let mut rendered = Vec::with_capacity(parts.len());
        for part in parts {
            rendered.push(self.render(scope, part)?);
        }
        if rendered.len() == 1 {
            return Ok(rendered.remove(0));
        }
        Ok(format!("({})", rendered.join(&format!(" {} ", joiner))))
    }

    fn render_exists(
        &mut self,
        scope: &mut Scope<'r>,
        relationship: &str,
        filter: Option<&Predicate>,
    ) -> Result<String> {
        let rel = scope
            .descriptor
            .relationship(relationship)
            .ok_or_else(|| self.unresolved(relationship))?;
        let owner_pk = qualified(&scope.alias, &scope.descriptor.primary_key);
        let target = self.registry.resolve(&rel.target_model)?;

        match &rel.shape {
            RelationshipShape::OneToMany { remote_column }
            | RelationshipShape::OneToOneBack { remote_column } => {
                let mut inner = self.scope(target);
                let condition = match filter {
                    Some(f) => format!(" AND {}", self.render(&mut inner, f)?),
                    None => String::new(),
                };
                Ok(format!(
                    "EXISTS (SELECT 1 FROM {} AS {}{} WHERE {} = {}{})",
                    quote_ident(&target.table),
                    quote_ident(&inner.alias),
                    inner.join_sql(),
                    qualified(&inner.alias, remote_column),
                    owner_pk,
                    condition
                ))
            }
            RelationshipShape::ManyToMany {
                table,
                local_column,
                remote_column,
                ..
            } => {
                let link_alias = self.alias();
                let mut inner = self.scope(target);
                let condition = match filter {
                    Some(f) => format!(" AND {}", self.render(&mut inner, f)?),
                    None => String::new(),
                };
                Ok(format!(
                    "EXISTS (SELECT 1 FROM {} AS {} JOIN {} AS {} ON {} = {}{} WHERE {} = {}{})",
                    quote_ident(table),
                    quote_ident(&link_alias),
                    quote_ident(&target.table),
                    quote_ident(&inner.alias),
                    qualified(&inner.alias, &target.primary_key),
                    qualified(&link_alias, remote_column),
                    inner.join_sql(),
                    qualified(&link_alias, local_column),
                    owner_pk,
                    condition
                ))
            }
            RelationshipShape::ManyToOne { .. } | RelationshipShape::OneToOne { .. } => {
                Err(KeelError::InvalidQuery {
                    model: self.root_model.clone(),
                    reason: format!(
                        "exists needs a relationship pointing back here, '{}' holds the key",
                        relationship
                    ),
                })
            }
        }
    }
}

/// Accept the literal spellings callers commonly use for non-text types
fn coerce_literal(ty: &SemanticType, value: &Value) -> Option<Value> {
    match (ty, value) {
        (SemanticType::Enum(def), Value::Text(name)) if def.member(name).is_some() => {
            Some(Value::Enum(name.clone()))
        }
        (SemanticType::Enum(def), Value::Integer(_)) => def
            .member_for_raw(value)
            .map(|m| Value::Enum(m.name.clone())),
        (SemanticType::Flags(_), Value::Integer(bits)) => Some(Value::Flags(*bits)),
        (SemanticType::Date, Value::Text(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .map(Value::Date),
        (SemanticType::DateTime, Value::Text(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc))),
        (SemanticType::Uuid, Value::Text(s)) => Uuid::parse_str(s).ok().map(Value::Uuid),
        _ => Some(value.clone()),
    }
}

fn projection(alias: &str, descriptor: &TableDescriptor, relationship: Option<&str>) -> Projection {
    Projection {
        alias: alias.to_string(),
        model: descriptor.model.clone(),
        relationship: relationship.map(str::to_string),
        columns: descriptor
            .columns
            .iter()
            .map(|c| ProjectedColumn {
                column: c.name.clone(),
                label: format!("{}__{}", alias, c.name),
            })
            .collect(),
    }
}

fn select_list(projections: &[&Projection]) -> String {
    projections
        .iter()
        .flat_map(|p| {
            p.columns.iter().map(move |c| {
                format!("{} AS {}", qualified(&p.alias, &c.column), quote_ident(&c.label))
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn fingerprint(statement: &Statement) -> Result<String> {
    let payload = serde_json::to_string(&(&statement.sql, &statement.params))?;
    Ok(hex::encode(Sha256::digest(payload.as_bytes())))
}

fn build(query: &Query, registry: &SchemaRegistry, keys_only: bool) -> Result<QueryPlan> {
    let descriptor = registry.resolve(query.model())?;
    let mut compiler = Compiler::new(registry, &descriptor.model);
    let mut scope = compiler.scope(descriptor);

    let mut joined = Vec::new();
    let mut eager_collections: Vec<String> = Vec::new();
    if !keys_only {
        let declared = descriptor
            .relationships
            .iter()
            .filter(|r| r.strategy == crate::model::LoadStrategy::Eager)
            .map(|r| r.name.clone());
        let explicit = query.joins().iter().cloned();
        for name in declared.chain(explicit) {
            let rel = descriptor
                .relationship(&name)
                .ok_or_else(|| compiler.unresolved(&name))?;
            // One-to-one back sides load in a batch like collections
            if rel.is_collection() || rel.shape.back_column().is_some() {
                if !eager_collections.contains(&name) {
                    eager_collections.push(name);
                }
                continue;
            }
            let already = joined
                .iter()
                .any(|p: &Projection| p.relationship.as_deref() == Some(name.as_str()));
            if already {
                continue;
            }
            let (alias, target) = compiler.join_path(&mut scope, &[name.as_str()], &name)?;
            joined.push(projection(&alias, target, Some(&name)));
        }
    }

    let where_sql = match query.predicate() {
        Some(predicate) => format!(" WHERE {}", compiler.render(&mut scope, predicate)?),
        None => String::new(),
    };

    let mut order_terms = Vec::new();
    for order in query.ordering() {
        let (target, _, _) = compiler.resolve_column(&mut scope, &order.path)?;
        order_terms.push(format!("{} {}", target, order.direction.sql()));
    }
    if order_terms.is_empty() && query.is_paginated() {
        order_terms.push(format!(
            "{} {}",
            qualified(&scope.alias, &descriptor.primary_key),
            Direction::Asc.sql()
        ));
    }

    let root = if keys_only {
        Projection {
            alias: scope.alias.clone(),
            model: descriptor.model.clone(),
            relationship: None,
            columns: vec![ProjectedColumn {
                column: descriptor.primary_key.clone(),
                label: format!("{}__{}", scope.alias, descriptor.primary_key),
            }],
        }
    } else {
        projection(&scope.alias, descriptor, None)
    };

    let mut all: Vec<&Projection> = vec![&root];
    all.extend(joined.iter());
    let mut sql = format!(
        "SELECT {} FROM {} AS {}{}{}",
        select_list(&all),
        quote_ident(&descriptor.table),
        quote_ident(&scope.alias),
        scope.join_sql(),
        where_sql
    );
    if !order_terms.is_empty() {
        sql.push_str(&format!(" ORDER BY {}", order_terms.join(", ")));
    }
    match (query.limit_value(), query.offset_value()) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
        (None, None) => {}
    }

    let statement = Statement::new(sql, compiler.params);
    let fingerprint = fingerprint(&statement)?;
    Ok(QueryPlan {
        model: descriptor.model.clone(),
        statement,
        root,
        joined,
        eager_collections,
        fingerprint,
    })
}

/// Compile a query into a plan
///
/// # Errors
///
/// `UnknownModel`, `UnresolvedField` for unknown fields or relationships,
/// `TypeMismatch` for literals or operators that do not fit the field type,
/// `InvalidQuery` for paths through collections and similar misuse.
pub fn compile(query: &Query, registry: &SchemaRegistry) -> Result<QueryPlan> {
    build(query, registry, false)
}

/// Compile a query selecting only the primary keys of matching rows
///
/// # Errors
///
/// Same as [`compile`].
pub fn compile_keys(query: &Query, registry: &SchemaRegistry) -> Result<QueryPlan> {
    build(query, registry, true)
}

/// Batched load of a collection relationship for several owners
///
/// `owner_keys` are storage-encoded primary keys of the owners.
///
/// # Errors
///
/// `UnknownModel`, `UnresolvedField` for an unknown relationship,
/// `InvalidQuery` for a relationship whose key lives on `model`.
pub fn compile_collection_load(
    registry: &SchemaRegistry,
    model: &str,
    relationship: &str,
    owner_keys: &[Value],
) -> Result<CollectionLoad> {
    let owner = registry.resolve(model)?;
    let rel = owner
        .relationship(relationship)
        .ok_or_else(|| KeelError::UnresolvedField {
            model: model.to_string(),
            path: relationship.to_string(),
        })?;
    let target = registry.resolve(&rel.target_model)?;
    let projected = projection("t0", target, Some(relationship));
    let membership = if owner_keys.is_empty() {
        None
    } else {
        Some(placeholders(owner_keys.len()))
    };

    match &rel.shape {
        RelationshipShape::OneToMany { remote_column }
        | RelationshipShape::OneToOneBack { remote_column } => {
            let owner_column = qualified("t0", remote_column);
            let condition = match &membership {
                Some(marks) => format!("{} IN ({})", owner_column, marks),
                None => "0 = 1".to_string(),
            };
            let sql = format!(
                "SELECT {} FROM {} AS {} WHERE {} ORDER BY {}, {}",
                select_list(&[&projected]),
                quote_ident(&target.table),
                quote_ident("t0"),
                condition,
                owner_column,
                qualified("t0", &target.primary_key)
            );
            Ok(CollectionLoad {
                statement: Statement::new(sql, owner_keys.to_vec()),
                owner_label: format!("t0__{}", remote_column),
                target: projected,
            })
        }
        RelationshipShape::ManyToMany {
            table,
            local_column,
            remote_column,
            ..
        } => {
            let owner_column = qualified("l0", local_column);
            let condition = match &membership {
                Some(marks) => format!("{} IN ({})", owner_column, marks),
                None => "0 = 1".to_string(),
            };
            let sql = format!(
                "SELECT {} AS {}, {} FROM {} AS {} JOIN {} AS {} ON {} = {} WHERE {} ORDER BY {}, {}",
                owner_column,
                quote_ident("l0__owner"),
                select_list(&[&projected]),
                quote_ident(table),
                quote_ident("l0"),
                quote_ident(&target.table),
                quote_ident("t0"),
                qualified("t0", &target.primary_key),
                qualified("l0", remote_column),
                condition,
                owner_column,
                qualified("t0", &target.primary_key)
            );
            Ok(CollectionLoad {
                statement: Statement::new(sql, owner_keys.to_vec()),
                owner_label: "l0__owner".to_string(),
                target: projected,
            })
        }
        RelationshipShape::ManyToOne { .. } | RelationshipShape::OneToOne { .. } => {
            Err(KeelError::InvalidQuery {
                model: model.to_string(),
                reason: format!("'{}' is not a collection relationship", relationship),
            })
        }
    }
}
