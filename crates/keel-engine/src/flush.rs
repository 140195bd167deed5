//! Executing a flush plan
//!
//! The plan from `keel_core::unit_of_work` is rendered statement by
//! statement inside a savepoint. Keys and versions produced by the
//! statements are staged and only written back to the tracked instances
//! once every statement succeeded, so a failed flush leaves both the
//! database and the session exactly as they were.

use crate::errors::{dangling, in_step, stale_write, Result};
use crate::session::Session;
use keel_core::errors::KeelError;
use keel_core::registry::descriptor::{RelationshipShape, TableDescriptor};
use keel_core::sql;
use keel_core::unit_of_work::{self, FlushPlan, FlushStep, LinkEntry, LinkOp};
use keel_core::{log_op_end, log_op_error, log_op_start, Instance, InstanceHandle, InstanceState};
use keel_core::{KeyValue, SchemaRegistry, Value};
use keel_core_types::FlushId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// One statement issued by a flush
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushOperation {
    /// `insert`, `update`, `relink`, `link`, `unlink` or `delete`
    pub kind: String,
    pub model: String,
    pub key: Option<String>,
}

/// What a flush wrote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// `None` when there was nothing to flush
    pub flush_id: Option<String>,
    pub operations: Vec<FlushOperation>,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub linked: usize,
    pub unlinked: usize,
    pub duration_ms: u64,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn statements(&self) -> usize {
        self.operations.len()
    }

    fn record(&mut self, kind: &str, model: &str, key: Option<String>) {
        match kind {
            "insert" => self.inserted += 1,
            "update" => self.updated += 1,
            "delete" => self.deleted += 1,
            "link" => self.linked += 1,
            "unlink" => self.unlinked += 1,
            _ => {}
        }
        self.operations.push(FlushOperation {
            kind: kind.to_string(),
            model: model.to_string(),
            key,
        });
    }
}

/// Effects of executed statements, applied to instances only on success
#[derive(Debug, Default)]
struct Staging {
    keys: HashMap<InstanceHandle, KeyValue>,
    versions: HashMap<InstanceHandle, i64>,
    report: FlushReport,
}

impl Session {
    /// Write pending changes to storage without committing
    ///
    /// On failure the savepoint is rolled back, the error carries the
    /// failing step's model and key, and every pending change stays queued
    /// so the flush can be retried.
    ///
    /// # Errors
    ///
    /// `DanglingReference` for links to instances that were never saved,
    /// `StaleWrite` for versioned rows changed by another writer,
    /// `ConstraintViolation` and other storage errors, `SessionClosed`.
    pub fn flush(&mut self) -> Result<FlushReport> {
        self.ensure_open("flush")?;
        if self.changeset.is_empty() {
            return Ok(FlushReport::default());
        }

        let flush_id = FlushId::new();
        let start = Instant::now();
        log_op_start!(
            "flush",
            session_id = %self.id,
            flush_id = %flush_id,
            changes = self.changeset.len()
        );

        match self.flush_inner(&flush_id) {
            Ok(mut report) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                report.duration_ms = duration_ms;
                log_op_end!(
                    "flush",
                    duration_ms = duration_ms,
                    session_id = %self.id,
                    flush_id = %flush_id,
                    inserted = report.inserted,
                    updated = report.updated,
                    deleted = report.deleted,
                    statements = report.statements()
                );
                Ok(report)
            }
            Err(err) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                log_op_error!(
                    "flush",
                    err.clone(),
                    duration_ms = duration_ms,
                    session_id = %self.id,
                    flush_id = %flush_id
                );
                Err(err)
            }
        }
    }

    fn flush_inner(&mut self, flush_id: &FlushId) -> Result<FlushReport> {
        let registry = Arc::clone(&self.registry);
        let plan = unit_of_work::plan(&self.changeset, &self.identity, &registry)?;

        self.flushes += 1;
        let savepoint = format!("keel_flush_{}", self.flushes);
        self.storage.savepoint(&savepoint)?;

        let mut staging = Staging::default();
        if let Err(err) = self.run_plan(&registry, &plan, &mut staging) {
            if let Err(undo) = self.storage.rollback_to(&savepoint) {
                tracing::error!(
                    component = module_path!(),
                    op = "flush",
                    session_id = %self.id,
                    flush_id = %flush_id,
                    error = %undo,
                    "savepoint rollback failed"
                );
            }
            return Err(err);
        }
        self.storage.release(&savepoint)?;

        self.apply(&plan, staging, flush_id)
    }

    fn run_plan(
        &mut self,
        registry: &SchemaRegistry,
        plan: &FlushPlan,
        staging: &mut Staging,
    ) -> Result<()> {
        for step in &plan.steps {
            match step {
                FlushStep::Insert { handle, model } => {
                    self.write_insert(registry, plan, *handle, model, staging)?
                }
                FlushStep::Update { handle, model } => {
                    self.write_update(registry, plan, *handle, model, staging)?
                }
                FlushStep::Relink {
                    handle,
                    model,
                    field,
                    target,
                } => self.write_relink(registry, *handle, model, field, *target, staging)?,
                FlushStep::Unlink(entry) | FlushStep::Link(entry) => {
                    self.write_link(registry, entry, staging)?
                }
                FlushStep::Delete { handle, model } => {
                    self.write_delete(registry, *handle, model, staging)?
                }
            }
        }
        Ok(())
    }

    /// Key of an instance, including keys generated earlier in this flush
    fn staged_key(&self, staging: &Staging, handle: InstanceHandle) -> Option<KeyValue> {
        staging
            .keys
            .get(&handle)
            .cloned()
            .or_else(|| self.identity.get(handle).ok()?.key().cloned())
    }

    /// Storage value for one column of an instance being saved
    fn column_value(
        &self,
        registry: &SchemaRegistry,
        descriptor: &TableDescriptor,
        plan: &FlushPlan,
        staging: &Staging,
        handle: InstanceHandle,
        instance: &Instance,
        column: &str,
    ) -> Result<Value> {
        if let Some(target) = instance.pending_link(column) {
            if plan.defers(handle, column) {
                return Ok(Value::Null);
            }
            let key = self
                .staged_key(staging, target)
                .ok_or_else(|| dangling(&descriptor.model, column, target.to_string()))?;
            return Ok(registry.encode_column(descriptor, column, &key.to_value())?);
        }
        let value = instance.get(column).cloned().unwrap_or(Value::Null);
        Ok(registry.encode_column(descriptor, column, &value)?)
    }

    fn write_insert(
        &mut self,
        registry: &SchemaRegistry,
        plan: &FlushPlan,
        handle: InstanceHandle,
        model: &str,
        staging: &mut Staging,
    ) -> Result<()> {
        let descriptor = registry.resolve(model)?;
        let instance = self.identity.get(handle)?;

        let mut columns = Vec::with_capacity(descriptor.columns.len());
        let mut values = Vec::with_capacity(descriptor.columns.len());
        for column in &descriptor.columns {
            if descriptor.version_column.as_deref() == Some(column.name.as_str()) {
                columns.push(column.name.clone());
                values.push(Value::Integer(1));
                continue;
            }
            let value = self.column_value(
                registry,
                descriptor,
                plan,
                staging,
                handle,
                instance,
                &column.name,
            )?;
            if column.primary_key && column.auto_increment && value.is_null() {
                continue;
            }
            columns.push(column.name.clone());
            values.push(value);
        }
        let explicit_key = instance.key().cloned();

        let statement = sql::insert(&descriptor.table, &columns, values);
        let label = explicit_key.as_ref().map(ToString::to_string);
        let outcome = self
            .storage
            .execute(&statement)
            .map_err(|e| in_step(e, "insert", model, label.as_deref()))?;

        let key = match (explicit_key, outcome.last_insert_id) {
            (Some(key), _) => key,
            (None, Some(rowid)) => KeyValue::Integer(rowid),
            (None, None) => {
                return Err(KeelError::Internal {
                    reason: format!("insert into {} produced no key", descriptor.table),
                }
                .into())
            }
        };
        if descriptor.is_versioned() {
            staging.versions.insert(handle, 1);
        }
        staging.report.record("insert", model, Some(key.to_string()));
        staging.keys.insert(handle, key);
        Ok(())
    }

    fn write_update(
        &mut self,
        registry: &SchemaRegistry,
        plan: &FlushPlan,
        handle: InstanceHandle,
        model: &str,
        staging: &mut Staging,
    ) -> Result<()> {
        let descriptor = registry.resolve(model)?;
        let instance = self.identity.get(handle)?;
        let dirty: Vec<String> = instance
            .dirty_fields()
            .filter(|f| *f != descriptor.primary_key)
            .map(str::to_string)
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }
        let key = instance.key().cloned().ok_or_else(|| KeelError::Internal {
            reason: format!("stored {} {} has no key", model, handle),
        })?;

        let mut assignments = Vec::with_capacity(dirty.len() + 1);
        for field in &dirty {
            let value =
                self.column_value(registry, descriptor, plan, staging, handle, instance, field)?;
            assignments.push((field.clone(), value));
        }
        let guard = match (descriptor.version_column.as_deref(), instance.version()) {
            (Some(column), Some(current)) => {
                assignments.push((column.to_string(), Value::Integer(current + 1)));
                Some((column, current))
            }
            _ => None,
        };

        let raw_key = registry.encode_column(descriptor, &descriptor.primary_key, &key.to_value())?;
        let statement = sql::update(
            &descriptor.table,
            assignments,
            &descriptor.primary_key,
            raw_key,
            guard,
        );
        let label = key.to_string();
        let outcome = self
            .storage
            .execute(&statement)
            .map_err(|e| in_step(e, "update", model, Some(&label)))?;

        if outcome.rows_affected == 0 {
            if let Some((_, expected)) = guard {
                return Err(stale_write(
                    model,
                    &label,
                    format!(
                        "{} {} was changed or removed by another writer (expected version {})",
                        model, label, expected
                    ),
                ));
            }
            tracing::warn!(
                component = module_path!(),
                op = "flush",
                session_id = %self.id,
                model = model,
                key = label.as_str(),
                "update matched no row"
            );
        }
        if let Some((_, expected)) = guard {
            staging.versions.insert(handle, expected + 1);
        }
        staging.report.record("update", model, Some(label));
        Ok(())
    }

    fn write_relink(
        &mut self,
        registry: &SchemaRegistry,
        handle: InstanceHandle,
        model: &str,
        field: &str,
        target: InstanceHandle,
        staging: &mut Staging,
    ) -> Result<()> {
        let descriptor = registry.resolve(model)?;
        let key = self
            .staged_key(staging, handle)
            .ok_or_else(|| dangling(model, field, handle.to_string()))?;
        let target_key = self
            .staged_key(staging, target)
            .ok_or_else(|| dangling(model, field, target.to_string()))?;

        let value = registry.encode_column(descriptor, field, &target_key.to_value())?;
        let raw_key = registry.encode_column(descriptor, &descriptor.primary_key, &key.to_value())?;
        let statement = sql::update(
            &descriptor.table,
            vec![(field.to_string(), value)],
            &descriptor.primary_key,
            raw_key,
            None,
        );
        let label = key.to_string();
        self.storage
            .execute(&statement)
            .map_err(|e| in_step(e, "relink", model, Some(&label)))?;
        staging.report.record("relink", model, Some(label));
        Ok(())
    }

    fn write_link(
        &mut self,
        registry: &SchemaRegistry,
        entry: &LinkEntry,
        staging: &mut Staging,
    ) -> Result<()> {
        let descriptor = registry.resolve(&entry.model)?;
        let rel = descriptor
            .relationship(&entry.relationship)
            .ok_or_else(|| KeelError::UnresolvedField {
                model: entry.model.clone(),
                path: entry.relationship.clone(),
            })?;
        let RelationshipShape::ManyToMany {
            table,
            local_column,
            remote_column,
            ..
        } = &rel.shape
        else {
            return Err(KeelError::Internal {
                reason: format!("{}.{} is not many-to-many", entry.model, entry.relationship),
            }
            .into());
        };
        let target = registry.resolve(&rel.target_model)?;

        let owner_key = self
            .staged_key(staging, entry.owner)
            .ok_or_else(|| dangling(&entry.model, &entry.relationship, entry.owner.to_string()))?;
        let target_key = self
            .staged_key(staging, entry.target)
            .ok_or_else(|| dangling(&entry.model, &entry.relationship, entry.target.to_string()))?;
        let left =
            registry.encode_column(descriptor, &descriptor.primary_key, &owner_key.to_value())?;
        let right = registry.encode_column(target, &target.primary_key, &target_key.to_value())?;

        let (kind, statement) = match entry.op {
            LinkOp::Link => ("link", sql::link(table, local_column, remote_column, left, right)),
            LinkOp::Unlink => (
                "unlink",
                sql::unlink(table, local_column, remote_column, left, right),
            ),
        };
        let label = format!("{}->{}", owner_key, target_key);
        self.storage
            .execute(&statement)
            .map_err(|e| in_step(e, kind, &entry.model, Some(&label)))?;
        staging.report.record(kind, &entry.model, Some(label));
        Ok(())
    }

    fn write_delete(
        &mut self,
        registry: &SchemaRegistry,
        handle: InstanceHandle,
        model: &str,
        staging: &mut Staging,
    ) -> Result<()> {
        let descriptor = registry.resolve(model)?;
        let instance = self.identity.get(handle)?;
        let key = instance.key().cloned().ok_or_else(|| KeelError::Internal {
            reason: format!("stored {} {} has no key", model, handle),
        })?;
        let guard = descriptor.version_column.as_deref().zip(instance.version());

        let raw_key = registry.encode_column(descriptor, &descriptor.primary_key, &key.to_value())?;
        let statement = sql::delete(&descriptor.table, &descriptor.primary_key, raw_key, guard);
        let label = key.to_string();
        let outcome = self
            .storage
            .execute(&statement)
            .map_err(|e| in_step(e, "delete", model, Some(&label)))?;

        if outcome.rows_affected == 0 {
            if let Some((_, expected)) = guard {
                return Err(stale_write(
                    model,
                    &label,
                    format!(
                        "{} {} was changed or removed by another writer (expected version {})",
                        model, label, expected
                    ),
                ));
            }
            tracing::warn!(
                component = module_path!(),
                op = "flush",
                session_id = %self.id,
                model = model,
                key = label.as_str(),
                "delete matched no row"
            );
        }
        staging.report.record("delete", model, Some(label));
        Ok(())
    }

    /// Write staged keys and versions back once the savepoint is released
    fn apply(
        &mut self,
        plan: &FlushPlan,
        staging: Staging,
        flush_id: &FlushId,
    ) -> Result<FlushReport> {
        let Staging {
            keys,
            versions,
            mut report,
        } = staging;

        for (handle, key) in keys {
            self.identity.bind_key(handle, key)?;
        }

        for step in &plan.steps {
            match step {
                FlushStep::Insert { handle, .. } | FlushStep::Update { handle, .. } => {
                    let links: Vec<(String, InstanceHandle)> = self
                        .identity
                        .get(*handle)?
                        .pending_links()
                        .map(|(field, target)| (field.to_string(), target))
                        .collect();
                    for (field, target) in links {
                        let key = self.identity.get(target).ok().and_then(|t| t.key().cloned());
                        if let Some(key) = key {
                            self.identity.get_mut(*handle)?.settle_link(&field, key.to_value());
                        }
                    }

                    let instance = self.identity.get_mut(*handle)?;
                    instance.set_state(InstanceState::Persistent);
                    instance.clear_dirty();
                    if let Some(version) = versions.get(handle) {
                        instance.set_version(Some(*version));
                    }
                }
                FlushStep::Delete { handle, .. } => {
                    self.identity.detach(*handle)?;
                }
                FlushStep::Relink { .. } | FlushStep::Link(_) | FlushStep::Unlink(_) => {}
            }
        }

        self.changeset.clear();
        self.cache.clear();
        self.generation += 1;
        report.flush_id = Some(flush_id.to_string());
        Ok(report)
    }
}
