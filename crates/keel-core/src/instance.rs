//! Live instances and the drafts they are built from

use crate::errors::{KeelError, Result};
use crate::model::{
    DefaultValue, FieldDef, KeyValue, ModelDefinition, RelationKind, SemanticType, Value,
};
use crate::registry::SchemaRegistry;
use crate::validation::Validator;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Copyable reference to an instance tracked by one session
///
/// Two handles are equal exactly when they name the same live instance,
/// which is how object identity is observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle {
    session: u64,
    slot: u32,
    generation: u32,
}

impl InstanceHandle {
    pub(crate) fn new(session: u64, slot: u32) -> Self {
        Self::at(session, slot, 0)
    }

    pub(crate) fn at(session: u64, slot: u32, generation: u32) -> Self {
        Self {
            session,
            slot,
            generation,
        }
    }

    /// Tag of the identity map that issued this handle
    pub fn session_tag(&self) -> u64 {
        self.session
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Reuse count of the slot when this handle was issued
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}:{}.{}", self.session, self.slot, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Added, not yet inserted
    Pending,
    /// Backed by a stored row
    Persistent,
    /// Marked for deletion at the next flush
    Deleted,
}

/// Unvalidated construction data for a new instance
///
/// Nothing is checked until the draft is added to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInstance {
    model: String,
    values: Vec<(String, Value)>,
    links: Vec<(String, InstanceHandle)>,
}

impl NewInstance {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            values: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((field.into(), value.into()));
        self
    }

    /// Attach a related instance through a relationship
    pub fn link(mut self, relationship: impl Into<String>, target: InstanceHandle) -> Self {
        self.links.push((relationship.into(), target));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    pub fn links(&self) -> &[(String, InstanceHandle)] {
        &self.links
    }
}

/// A validated object tracked by a session
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    model: String,
    key: Option<KeyValue>,
    values: BTreeMap<String, Value>,
    links: BTreeMap<String, InstanceHandle>,
    dirty: BTreeSet<String>,
    state: InstanceState,
    version: Option<i64>,
}

impl Instance {
    /// Instance hydrated from a stored row
    pub fn loaded(
        model: impl Into<String>,
        key: KeyValue,
        values: BTreeMap<String, Value>,
        version: Option<i64>,
    ) -> Self {
        Self {
            model: model.into(),
            key: Some(key),
            values,
            links: BTreeMap::new(),
            dirty: BTreeSet::new(),
            state: InstanceState::Persistent,
            version,
        }
    }

    /// Validate a draft into a pending instance
    ///
    /// Links through a foreign key on this model become pending
    /// foreign-key links on the instance; the rest are returned for the
    /// caller to apply once the instance is tracked.
    ///
    /// # Errors
    ///
    /// `UnknownModel`, `UnresolvedField` for unknown relationships,
    /// `Validation` for unknown fields, missing required values and values
    /// the validator rejects.
    pub fn from_new(
        registry: &SchemaRegistry,
        validator: &dyn Validator,
        draft: NewInstance,
    ) -> Result<(Instance, Vec<(String, InstanceHandle)>)> {
        let def = registry.definition(&draft.model)?;

        let mut provided: BTreeMap<String, Value> = BTreeMap::new();
        for (name, value) in draft.values {
            if def.get_field(&name).is_none() {
                return Err(KeelError::Validation {
                    model: def.name.clone(),
                    field: name,
                    reason: "unknown field".to_string(),
                });
            }
            provided.insert(name, value);
        }

        let mut links = BTreeMap::new();
        let mut collection_links = Vec::new();
        for (relationship, target) in draft.links {
            let rel = def
                .get_relationship(&relationship)
                .ok_or_else(|| KeelError::UnresolvedField {
                    model: def.name.clone(),
                    path: relationship.clone(),
                })?;
            match &rel.kind {
                RelationKind::ManyToOne { via } | RelationKind::OneToOne { via } => {
                    if provided.contains_key(via) || links.contains_key(via) {
                        return Err(KeelError::AmbiguousReference {
                            model: def.name.clone(),
                            relationship,
                            reason: format!("'{}' is given more than one target", via),
                        });
                    }
                    links.insert(via.clone(), target);
                }
                _ => collection_links.push((relationship, target)),
            }
        }

        let mut values = BTreeMap::new();
        for field in &def.fields {
            if let Some(value) = provided.remove(&field.name) {
                values.insert(field.name.clone(), validate_field(def, field, value, validator)?);
                continue;
            }
            if links.contains_key(&field.name) {
                values.insert(field.name.clone(), Value::Null);
                continue;
            }
            let value = match &field.default {
                Some(DefaultValue::Value(v)) => validate_field(def, field, v.clone(), validator)?,
                Some(DefaultValue::Now) => match field.ty {
                    SemanticType::Date => Value::Date(Utc::now().date_naive()),
                    _ => Value::DateTime(Utc::now()),
                },
                Some(DefaultValue::NewUuid) => Value::Uuid(Uuid::new_v4()),
                None if field.primary_key && field.ty == SemanticType::Uuid => {
                    Value::Uuid(Uuid::new_v4())
                }
                None => validate_field(def, field, Value::Null, validator)?,
            };
            values.insert(field.name.clone(), value);
        }

        let key = def
            .primary_key()
            .and_then(|pk| values.get(&pk.name))
            .and_then(KeyValue::from_value);

        Ok((
            Instance {
                model: def.name.clone(),
                key,
                values,
                links,
                dirty: BTreeSet::new(),
                state: InstanceState::Pending,
                version: None,
            },
            collection_links,
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn key(&self) -> Option<&KeyValue> {
        self.key.as_ref()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn version(&self) -> Option<i64> {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    /// Unsaved target of a foreign-key field, if linked by handle
    pub fn pending_link(&self, field: &str) -> Option<InstanceHandle> {
        self.links.get(field).copied()
    }

    pub fn pending_links(&self) -> impl Iterator<Item = (&str, InstanceHandle)> {
        self.links.iter().map(|(f, h)| (f.as_str(), *h))
    }

    /// Overwrite a field and mark it dirty
    pub fn assign(&mut self, field: &str, value: Value) {
        self.links.remove(field);
        self.values.insert(field.to_string(), value);
        self.dirty.insert(field.to_string());
    }

    /// Point a foreign-key field at an instance that has no key yet
    pub fn assign_link(&mut self, field: &str, target: InstanceHandle) {
        self.values.insert(field.to_string(), Value::Null);
        self.links.insert(field.to_string(), target);
        self.dirty.insert(field.to_string());
    }

    /// Replace a pending link by the now-known key of its target
    pub fn settle_link(&mut self, field: &str, key: Value) {
        self.links.remove(field);
        self.values.insert(field.to_string(), key);
    }

    /// Take stored values for every field without local edits
    pub fn refresh(&mut self, stored: BTreeMap<String, Value>, version: Option<i64>) {
        for (field, value) in stored {
            if !self.dirty.contains(&field) && !self.links.contains_key(&field) {
                self.values.insert(field, value);
            }
        }
        if !self.is_dirty() {
            self.version = version.or(self.version);
        }
    }

    pub fn set_key(&mut self, key: KeyValue) {
        self.key = Some(key);
    }

    pub fn set_state(&mut self, state: InstanceState) {
        self.state = state;
    }

    pub fn set_version(&mut self, version: Option<i64>) {
        self.version = version;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }
}

/// Required-ness check followed by the validator
///
/// # Errors
///
/// `Validation` when a required field is null or the validator rejects the value.
pub fn validate_field(
    def: &ModelDefinition,
    field: &FieldDef,
    value: Value,
    validator: &dyn Validator,
) -> Result<Value> {
    if value.is_null() {
        if field.required && !field.is_generated_key() {
            return Err(KeelError::Validation {
                model: def.name.clone(),
                field: field.name.clone(),
                reason: "field is required".to_string(),
            });
        }
        return Ok(Value::Null);
    }
    validator
        .validate(field, value)
        .map_err(|reason| KeelError::Validation {
            model: def.name.clone(),
            field: field.name.clone(),
            reason,
        })
}
