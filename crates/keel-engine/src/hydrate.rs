//! Turning result rows into tracked instances

use crate::errors::Result;
use crate::resolver::Resolved;
use crate::session::{Session, KEY_BATCH};
use keel_core::errors::KeelError;
use keel_core::query::{compile, compile_collection_load, Projection, Query};
use keel_core::registry::descriptor::{RelationshipShape, TableDescriptor};
use keel_core::{Instance, InstanceHandle, InstanceState, KeyValue, Row, SchemaRegistry, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Raw values of one projection, keyed by column name
fn projected(projection: &Projection, row: &Row) -> BTreeMap<String, Value> {
    projection
        .columns
        .iter()
        .map(|c| {
            let value = row.get(&c.label).cloned().unwrap_or(Value::Null);
            (c.column.clone(), value)
        })
        .collect()
}

/// One-to-one back sides load like collections but cache a single member
fn rel_is_single(descriptor: &TableDescriptor, relationship: &str) -> bool {
    descriptor
        .relationship(relationship)
        .is_some_and(|r| matches!(r.shape, RelationshipShape::OneToOneBack { .. }))
}

impl Session {
    /// Track a stored row given as raw column values
    ///
    /// Returns the existing handle when the key is already tracked; its
    /// fields without local edits take the stored values. Columns missing
    /// from `row` are left alone on a tracked instance and read as null on a
    /// new one.
    ///
    /// # Errors
    ///
    /// `UnknownModel`, `Validation` when a value cannot be decoded or the row
    /// has no usable key, `SessionClosed`.
    pub fn merge(&mut self, model: &str, row: BTreeMap<String, Value>) -> Result<InstanceHandle> {
        self.ensure_open("merge")?;
        self.merge_stored(model, row)
    }

    pub(crate) fn merge_stored(
        &mut self,
        model: &str,
        mut raw: BTreeMap<String, Value>,
    ) -> Result<InstanceHandle> {
        let registry = Arc::clone(&self.registry);
        let descriptor = registry.resolve(model)?;
        let def = registry.definition(model)?;

        let version = match &descriptor.version_column {
            Some(column) => raw.remove(column).and_then(|v| v.as_i64()),
            None => None,
        };

        let mut stored = BTreeMap::new();
        for field in &def.fields {
            let Some(value) = raw.remove(&field.name) else {
                continue;
            };
            let decoded = registry.decode_column(descriptor, &field.name, value)?;
            let value = if decoded.is_null() {
                Value::Null
            } else {
                self.options
                    .validator
                    .validate(field, decoded)
                    .map_err(|reason| KeelError::Validation {
                        model: model.to_string(),
                        field: field.name.clone(),
                        reason,
                    })?
            };
            stored.insert(field.name.clone(), value);
        }

        let key = stored
            .get(&descriptor.primary_key)
            .and_then(KeyValue::from_value)
            .ok_or_else(|| KeelError::Validation {
                model: model.to_string(),
                field: descriptor.primary_key.clone(),
                reason: "stored row has no usable primary key".to_string(),
            })?;

        if let Some(handle) = self.identity.lookup(model, &key) {
            self.identity.get_mut(handle)?.refresh(stored, version);
            return Ok(handle);
        }

        for field in &def.fields {
            stored.entry(field.name.clone()).or_insert(Value::Null);
        }
        Ok(self.identity.insert(Instance::loaded(model, key, stored, version))?)
    }

    /// Compile, execute and hydrate a query, without autoflush or logging
    pub(crate) fn fetch(&mut self, query: &Query) -> Result<Vec<InstanceHandle>> {
        let registry = Arc::clone(&self.registry);
        let plan = compile(query, &registry)?;
        let rows = self.storage.query(&plan.statement)?;

        let mut handles = Vec::with_capacity(rows.len());
        let mut seen = HashSet::new();
        for row in &rows {
            let handle = self.merge_stored(&plan.model, projected(&plan.root, row))?;
            // Rows still stored but already deleted in this session
            if self.identity.get(handle)?.state() == InstanceState::Deleted {
                continue;
            }
            if seen.insert(handle) {
                handles.push(handle);
            }
            for joined in &plan.joined {
                self.cache_joined(&registry, handle, joined, row)?;
            }
        }

        for relationship in &plan.eager_collections {
            self.load_collection(&plan.model, relationship, &handles)?;
        }
        Ok(handles)
    }

    /// Cache the parent carried by a joined projection
    fn cache_joined(
        &mut self,
        registry: &SchemaRegistry,
        owner: InstanceHandle,
        joined: &Projection,
        row: &Row,
    ) -> Result<()> {
        let Some(relationship) = joined.relationship.as_deref() else {
            return Ok(());
        };
        let instance = self.identity.get(owner)?;
        let descriptor = registry.resolve(instance.model())?;
        let Some(rel) = descriptor.relationship(relationship) else {
            return Ok(());
        };
        let Some((local_column, _)) = rel.shape.parent_columns() else {
            return Ok(());
        };
        // Local edits win over what the row says
        if instance.pending_link(local_column).is_some()
            || instance.dirty_fields().any(|f| f == local_column)
        {
            return Ok(());
        }
        let fk_null = instance.get(local_column).map_or(true, Value::is_null);

        let target = registry.resolve(&rel.target_model)?;
        let present = joined
            .label_of(&target.primary_key)
            .and_then(|label| row.get(label))
            .is_some_and(|v| !v.is_null());

        let resolved = if present {
            let parent = self.merge_stored(&rel.target_model, projected(joined, row))?;
            Resolved::One(Some(parent))
        } else if fk_null && rel.optional {
            Resolved::One(None)
        } else {
            return Ok(());
        };
        self.cache.insert((owner, relationship.to_string()), resolved);
        Ok(())
    }

    /// Load one collection relationship for several owners in batched
    /// queries and cache the result for each owner
    ///
    /// Owners without a key are skipped.
    pub(crate) fn load_collection(
        &mut self,
        model: &str,
        relationship: &str,
        owners: &[InstanceHandle],
    ) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let descriptor = registry.resolve(model)?;

        let single = rel_is_single(descriptor, relationship);
        let mut keyed = Vec::with_capacity(owners.len());
        let mut owner_keys = Vec::with_capacity(owners.len());
        for &owner in owners {
            if let Some(key) = self.identity.get(owner)?.key().cloned() {
                owner_keys.push(registry.encode_column(
                    descriptor,
                    &descriptor.primary_key,
                    &key.to_value(),
                )?);
                keyed.push((key, owner));
            }
        }
        if keyed.is_empty() {
            return Ok(());
        }

        let mut members: HashMap<KeyValue, Vec<InstanceHandle>> = HashMap::new();
        for batch in owner_keys.chunks(KEY_BATCH) {
            let load = compile_collection_load(&registry, model, relationship, batch)?;
            let rows = self.storage.query(&load.statement)?;
            for row in &rows {
                let raw_owner = row.get(&load.owner_label).cloned().unwrap_or(Value::Null);
                let owner = registry.decode_column(descriptor, &descriptor.primary_key, raw_owner)?;
                let Some(owner_key) = KeyValue::from_value(&owner) else {
                    continue;
                };
                let member = self.merge_stored(&load.target.model, projected(&load.target, row))?;
                if self.identity.get(member)?.state() == InstanceState::Deleted {
                    continue;
                }
                let list = members.entry(owner_key).or_default();
                if !list.contains(&member) {
                    list.push(member);
                }
            }
        }

        for (key, owner) in keyed {
            let loaded = members.remove(&key).unwrap_or_default();
            let resolved = if single {
                Resolved::One(loaded.first().copied())
            } else {
                Resolved::Many(loaded)
            };
            self.cache.insert((owner, relationship.to_string()), resolved);
        }
        Ok(())
    }
}
