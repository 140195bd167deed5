//! Session: identity map, unit of work and transaction over one connection

use crate::errors::{invalid_operation, session_closed, Result};
use crate::resolver::Resolved;
use keel_core::errors::KeelError;
use keel_core::instance::validate_field;
use keel_core::model::{Association, KeyValue, RelationKind, Value};
use keel_core::query::{col, compile_keys, Query};
use keel_core::sql;
use keel_core::unit_of_work::{Changeset, DeleteOutcome, LinkOp};
use keel_core::{
    log_op_end, log_op_error, log_op_start, IdentityMap, Instance, InstanceHandle, InstanceState,
    NewInstance, SchemaRegistry, StandardValidator, Storage, Validator,
};
use keel_core_types::SessionId;
use keel_store::{SqliteStorage, StoreConfig};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Upper bound on keys bound into one `IN (...)` list
pub(crate) const KEY_BATCH: usize = 500;

/// Per-session behaviour switches
#[derive(Clone)]
pub struct SessionOptions {
    /// Flush pending changes before queries and collection loads
    pub autoflush: bool,
    pub validator: Arc<dyn Validator>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            autoflush: true,
            validator: Arc::new(StandardValidator),
        }
    }
}

impl SessionOptions {
    pub fn autoflush(mut self, enabled: bool) -> Self {
        self.autoflush = enabled;
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("autoflush", &self.autoflush)
            .finish_non_exhaustive()
    }
}

/// How [`Session::close`] ends the open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Rollback,
}

/// One unit of work over one storage connection
///
/// The session is single-threaded: it hands out [`InstanceHandle`]s that
/// are only meaningful to the session that issued them. All writes happen
/// inside one storage transaction that is opened with the session and
/// reopened after every commit or rollback.
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) storage: Box<dyn Storage>,
    pub(crate) options: SessionOptions,
    pub(crate) identity: IdentityMap,
    pub(crate) changeset: Changeset,
    pub(crate) cache: HashMap<(InstanceHandle, String), Resolved>,
    pub(crate) generation: u64,
    pub(crate) flushes: u64,
    pub(crate) open: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("tracked", &self.identity.len())
            .field("pending_changes", &self.changeset.len())
            .field("generation", &self.generation)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a session and begin its transaction
    ///
    /// # Errors
    ///
    /// Storage errors from `BEGIN`.
    pub fn open(
        registry: Arc<SchemaRegistry>,
        mut storage: Box<dyn Storage>,
        options: SessionOptions,
    ) -> Result<Self> {
        let id = SessionId::new();
        let start = Instant::now();
        log_op_start!("session_open", session_id = %id);

        if let Err(err) = storage.begin() {
            let duration_ms = start.elapsed().as_millis() as u64;
            log_op_error!("session_open", err.clone(), duration_ms = duration_ms, session_id = %id);
            return Err(err);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        log_op_end!("session_open", duration_ms = duration_ms, session_id = %id);

        Ok(Self {
            id,
            registry,
            storage,
            options,
            identity: IdentityMap::new(),
            changeset: Changeset::new(),
            cache: HashMap::new(),
            generation: 0,
            flushes: 0,
            open: true,
        })
    }

    /// Open a SQLite connection from `config` and a session over it
    ///
    /// # Errors
    ///
    /// Configuration and connection errors, then storage errors from `BEGIN`.
    pub fn open_sqlite(
        registry: Arc<SchemaRegistry>,
        config: &StoreConfig,
        options: SessionOptions,
    ) -> Result<Self> {
        let storage = SqliteStorage::open(config)?;
        Self::open(registry, Box::new(storage), options)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of completed flushes and rollbacks; cached relationship
    /// results never outlive a generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Changes not yet flushed; left intact when a flush fails
    pub fn pending_changes(&self) -> &Changeset {
        &self.changeset
    }

    /// Number of instances in the identity map
    pub fn tracked(&self) -> usize {
        self.identity.len()
    }

    pub(crate) fn ensure_open(&self, op: &str) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(session_closed(op))
        }
    }

    /// Instance for a primary key, from the identity map or storage
    ///
    /// Returns `None` when no row has the key, or when the tracked instance
    /// is scheduled for deletion.
    ///
    /// # Errors
    ///
    /// `UnknownModel`, `SessionClosed`, storage errors.
    pub fn get(&mut self, model: &str, key: impl Into<KeyValue>) -> Result<Option<InstanceHandle>> {
        self.ensure_open("get")?;
        let key = key.into();
        let registry = Arc::clone(&self.registry);
        let descriptor = registry.resolve(model)?;

        if let Some(handle) = self.identity.lookup(model, &key) {
            let deleted = self.identity.get(handle)?.state() == InstanceState::Deleted;
            return Ok((!deleted).then_some(handle));
        }

        let query = Query::new(model).filter(col(&descriptor.primary_key).eq(key.to_value()));
        Ok(self.fetch(&query)?.into_iter().next())
    }

    /// Validate a draft and track it as a pending instance
    ///
    /// Adding a draft whose key is already tracked returns the tracked
    /// handle when both carry the same values.
    ///
    /// # Errors
    ///
    /// `Validation`, `UnresolvedField`, `DuplicateKey`, handle errors for
    /// linked instances, `SessionClosed`.
    pub fn add(&mut self, draft: NewInstance) -> Result<InstanceHandle> {
        self.ensure_open("add")?;
        for (_, target) in draft.links() {
            self.identity.check(*target)?;
        }

        let registry = Arc::clone(&self.registry);
        let (instance, collection_links) =
            Instance::from_new(&registry, self.options.validator.as_ref(), draft)?;
        let model = instance.model().to_string();

        if let Some(key) = instance.key() {
            if let Some(existing) = self.identity.lookup(&model, key) {
                let current = self.identity.get(existing)?;
                let deleted = current.state() == InstanceState::Deleted;
                if !deleted && current.values() == instance.values() {
                    return Ok(existing);
                }
                return Err(KeelError::DuplicateKey {
                    model,
                    key: key.to_string(),
                }
                .into());
            }
        }

        let descriptor = registry.resolve(&model)?;
        let references = descriptor.foreign_keys.iter().any(|fk| {
            instance.pending_link(&fk.column).is_some()
                || instance.get(&fk.column).is_some_and(|v| !v.is_null())
        });

        let handle = self.identity.insert(instance)?;
        self.changeset.record_create(handle, &model);
        if references {
            self.cache.clear();
        }

        if let Err(err) = self.settle_new(handle, &model, collection_links) {
            self.changeset.forget(handle);
            self.identity.detach(handle)?;
            return Err(err);
        }
        Ok(handle)
    }

    /// Take over one-to-one partners and apply the remaining draft links
    fn settle_new(
        &mut self,
        handle: InstanceHandle,
        model: &str,
        collection_links: Vec<(String, InstanceHandle)>,
    ) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let def = registry.definition(model)?;
        for rel in &def.relationships {
            let RelationKind::OneToOne { via } = &rel.kind else {
                continue;
            };
            let instance = self.identity.get(handle)?;
            let parent = match instance.pending_link(via) {
                Some(parent) => Some(parent),
                None => match instance.get(via).and_then(KeyValue::from_value) {
                    Some(key) => self.get(&rel.target, key)?,
                    None => None,
                },
            };
            if let Some(parent) = parent {
                self.release_holders(handle, model, via, parent, "add")?;
            }
        }
        for (relationship, target) in collection_links {
            self.link(handle, &relationship, target)?;
        }
        Ok(())
    }

    /// Current value of a field
    ///
    /// # Errors
    ///
    /// Handle errors, `UnresolvedField` for unknown fields.
    pub fn value(&self, handle: InstanceHandle, field: &str) -> Result<Value> {
        self.ensure_open("value")?;
        let instance = self.identity.get(handle)?;
        instance.get(field).cloned().ok_or_else(|| {
            KeelError::UnresolvedField {
                model: instance.model().to_string(),
                path: field.to_string(),
            }
            .into()
        })
    }

    /// Borrow the tracked instance behind a handle
    ///
    /// # Errors
    ///
    /// `ForeignInstance`, `DetachedInstance`, `SessionClosed`.
    pub fn instance(&self, handle: InstanceHandle) -> Result<&Instance> {
        self.ensure_open("instance")?;
        Ok(self.identity.get(handle)?)
    }

    /// Assign a validated value to a field
    ///
    /// # Errors
    ///
    /// `Validation` for unknown fields and rejected values,
    /// `InvalidOperation` when changing the key of a stored instance or
    /// editing an instance scheduled for deletion.
    pub fn set(
        &mut self,
        handle: InstanceHandle,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.ensure_open("set")?;
        let registry = Arc::clone(&self.registry);
        let instance = self.identity.get(handle)?;
        let model = instance.model().to_string();
        let state = instance.state();
        if state == InstanceState::Deleted {
            return Err(invalid_operation(
                "set",
                format!("{} {} is scheduled for deletion", model, handle),
            ));
        }

        let def = registry.definition(&model)?;
        let field_def = def.get_field(field).ok_or_else(|| KeelError::Validation {
            model: model.clone(),
            field: field.to_string(),
            reason: "unknown field".to_string(),
        })?;
        if field_def.primary_key && state == InstanceState::Persistent {
            return Err(invalid_operation(
                "set",
                format!("primary key of stored {} {} cannot change", model, handle),
            ));
        }

        let value = validate_field(def, field_def, value.into(), self.options.validator.as_ref())?;
        if field_def.primary_key {
            if let Some(key) = KeyValue::from_value(&value) {
                self.identity.bind_key(handle, key)?;
            }
        }
        self.identity.get_mut(handle)?.assign(field, value);
        if state == InstanceState::Persistent {
            self.changeset.record_update(handle, &model);
        }
        if field_def.references.is_some() {
            self.cache.clear();
        }
        Ok(())
    }

    /// Relate `owner` to `target` through one of the owner's relationships
    ///
    /// Many-to-one, one-to-many and one-to-one links set the foreign key on
    /// the child side; many-to-many links through an association table are
    /// recorded for the next flush. Linking a one-to-one partner that is
    /// already held clears the previous holder's key.
    ///
    /// # Errors
    ///
    /// `UnresolvedField`, `InvalidOperation` for a target of the wrong model,
    /// a relationship stored through an association model or a one-to-one
    /// partner whose holder cannot let go, handle errors.
    pub fn link(
        &mut self,
        owner: InstanceHandle,
        relationship: &str,
        target: InstanceHandle,
    ) -> Result<()> {
        self.relate(owner, relationship, target, LinkOp::Link)
    }

    /// Undo a [`Session::link`]
    ///
    /// # Errors
    ///
    /// As [`Session::link`]; `Validation` when clearing a required foreign key.
    pub fn unlink(
        &mut self,
        owner: InstanceHandle,
        relationship: &str,
        target: InstanceHandle,
    ) -> Result<()> {
        self.relate(owner, relationship, target, LinkOp::Unlink)
    }

    fn relate(
        &mut self,
        owner: InstanceHandle,
        relationship: &str,
        target: InstanceHandle,
        op: LinkOp,
    ) -> Result<()> {
        let op_name = match op {
            LinkOp::Link => "link",
            LinkOp::Unlink => "unlink",
        };
        self.ensure_open(op_name)?;
        let registry = Arc::clone(&self.registry);
        let owner_model = self.live_model(owner, op_name)?;
        let target_model = self.live_model(target, op_name)?;

        let def = registry.definition(&owner_model)?;
        let rel = def
            .get_relationship(relationship)
            .ok_or_else(|| KeelError::UnresolvedField {
                model: owner_model.clone(),
                path: relationship.to_string(),
            })?;
        if rel.target != target_model {
            return Err(invalid_operation(
                op_name,
                format!(
                    "{}.{} expects a {}, got a {}",
                    owner_model, relationship, rel.target, target_model
                ),
            ));
        }

        match &rel.kind {
            RelationKind::ManyToOne { via } => self.point(owner, &owner_model, via, target, op)?,
            RelationKind::OneToMany { via } => self.point(target, &target_model, via, owner, op)?,
            RelationKind::OneToOne { via } => {
                if op == LinkOp::Link {
                    self.release_holders(owner, &owner_model, via, target, op_name)?;
                }
                self.point(owner, &owner_model, via, target, op)?
            }
            RelationKind::OneToOneBack { via } => {
                if op == LinkOp::Link {
                    self.release_holders(target, &target_model, via, owner, op_name)?;
                }
                self.point(target, &target_model, via, owner, op)?
            }
            RelationKind::ManyToMany {
                through: Association::Table { .. },
            } => self
                .changeset
                .record_link(&owner_model, relationship, owner, target, op),
            RelationKind::ManyToMany {
                through: Association::Model { model, .. },
            } => {
                return Err(invalid_operation(
                    op_name,
                    format!(
                        "{}.{} is stored through {}; add or delete {} instances instead",
                        owner_model, relationship, model, model
                    ),
                ))
            }
        }
        self.cache.clear();
        Ok(())
    }

    /// Set (or clear) `child.field` so it refers to `parent`
    fn point(
        &mut self,
        child: InstanceHandle,
        child_model: &str,
        field: &str,
        parent: InstanceHandle,
        op: LinkOp,
    ) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let def = registry.definition(child_model)?;
        let field_def = def.get_field(field).ok_or_else(|| KeelError::Internal {
            reason: format!("relationship field {}.{} is not declared", child_model, field),
        })?;
        let validator = Arc::clone(&self.options.validator);

        let parent_instance = self.identity.get(parent)?;
        let parent_key = match parent_instance.state() {
            InstanceState::Persistent => parent_instance.key().cloned(),
            _ => None,
        };
        let child_instance = self.identity.get(child)?;
        let state = child_instance.state();

        match op {
            LinkOp::Link => match parent_key {
                Some(key) => {
                    let value = validate_field(def, field_def, key.to_value(), validator.as_ref())?;
                    self.identity.get_mut(child)?.assign(field, value);
                }
                None => self.identity.get_mut(child)?.assign_link(field, parent),
            },
            LinkOp::Unlink => {
                let current = child_instance.get(field).and_then(KeyValue::from_value);
                let points_here = child_instance.pending_link(field) == Some(parent)
                    || (parent_key.is_some() && current == parent_key);
                if !points_here {
                    return Ok(());
                }
                let cleared = validate_field(def, field_def, Value::Null, validator.as_ref())?;
                self.identity.get_mut(child)?.assign(field, cleared);
            }
        }

        if state == InstanceState::Persistent {
            self.changeset.record_update(child, child_model);
        }
        Ok(())
    }

    /// Clear `field` on every other instance that holds `parent` through a
    /// unique foreign key, so that `child` can take it over
    ///
    /// Nothing changes when a holder's key is required.
    fn release_holders(
        &mut self,
        child: InstanceHandle,
        child_model: &str,
        field: &str,
        parent: InstanceHandle,
        op: &str,
    ) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let def = registry.definition(child_model)?;
        let field_def = def.get_field(field).ok_or_else(|| KeelError::Internal {
            reason: format!("relationship field {}.{} is not declared", child_model, field),
        })?;

        let holders: Vec<InstanceHandle> = self
            .holders_of(parent, child_model, field)?
            .into_iter()
            .filter(|h| *h != child)
            .collect();
        let Some(first) = holders.first() else {
            return Ok(());
        };
        if field_def.required {
            let parent_model = self.identity.get(parent)?.model().to_string();
            return Err(invalid_operation(
                op,
                format!(
                    "{} {} is held by {} {} whose required '{}' cannot be cleared",
                    parent_model, parent, child_model, first, field
                ),
            ));
        }

        for holder in holders {
            let instance = self.identity.get_mut(holder)?;
            let state = instance.state();
            instance.assign(field, Value::Null);
            if state == InstanceState::Persistent {
                self.changeset.record_update_before(holder, child_model, child);
            }
        }
        Ok(())
    }

    /// Live instances of `model` whose `field` refers to `parent`
    ///
    /// Stored rows are loaded first when `parent` is stored; local edits
    /// decide over what storage says.
    pub(crate) fn holders_of(
        &mut self,
        parent: InstanceHandle,
        model: &str,
        field: &str,
    ) -> Result<Vec<InstanceHandle>> {
        let parent_instance = self.identity.get(parent)?;
        let key = parent_instance.key().cloned();
        if parent_instance.state() == InstanceState::Persistent {
            if let Some(key) = &key {
                self.fetch(&Query::new(model).filter(col(field).eq(key.to_value())))?;
            }
        }

        Ok(self
            .identity
            .iter()
            .filter(|(_, i)| i.model() == model && i.state() != InstanceState::Deleted)
            .filter(|(_, i)| match i.pending_link(field) {
                Some(target) => target == parent,
                None => key.is_some() && i.get(field).and_then(KeyValue::from_value) == key,
            })
            .map(|(h, _)| h)
            .collect())
    }

    fn live_model(&self, handle: InstanceHandle, op: &str) -> Result<String> {
        let instance = self.identity.get(handle)?;
        if instance.state() == InstanceState::Deleted {
            return Err(invalid_operation(
                op,
                format!("{} {} is scheduled for deletion", instance.model(), handle),
            ));
        }
        Ok(instance.model().to_string())
    }

    /// Schedule an instance for deletion
    ///
    /// A pending instance is simply dropped; a stored one is deleted at the
    /// next flush and detached afterwards.
    ///
    /// # Errors
    ///
    /// Handle errors, `SessionClosed`.
    pub fn delete(&mut self, handle: InstanceHandle) -> Result<()> {
        self.ensure_open("delete")?;
        let instance = self.identity.get(handle)?;
        if instance.state() == InstanceState::Deleted {
            return Ok(());
        }
        let model = instance.model().to_string();
        match self.changeset.record_delete(handle, &model) {
            DeleteOutcome::Discarded => {
                self.identity.detach(handle)?;
            }
            DeleteOutcome::Scheduled => {
                self.identity.get_mut(handle)?.set_state(InstanceState::Deleted);
            }
        }
        self.cache.clear();
        Ok(())
    }

    /// Stop tracking an instance without touching storage
    ///
    /// Unflushed changes to it are dropped.
    ///
    /// # Errors
    ///
    /// Handle errors, `SessionClosed`.
    pub fn expunge(&mut self, handle: InstanceHandle) -> Result<()> {
        self.ensure_open("expunge")?;
        self.identity.detach(handle)?;
        self.changeset.forget(handle);
        self.cache.clear();
        Ok(())
    }

    pub(crate) fn autoflush(&mut self) -> Result<()> {
        if self.options.autoflush && !self.changeset.is_empty() {
            self.flush()?;
        }
        Ok(())
    }

    /// Run a query and track every returned row
    ///
    /// Pending changes are flushed first when autoflush is on. Rows already
    /// tracked resolve to their existing handles; instances scheduled for
    /// deletion are left out.
    ///
    /// # Errors
    ///
    /// Compile errors (`UnresolvedField`, `TypeMismatch`, `InvalidQuery`),
    /// flush errors, storage errors.
    pub fn query(&mut self, query: &Query) -> Result<Vec<InstanceHandle>> {
        self.ensure_open("query")?;
        self.autoflush()?;

        let start = Instant::now();
        log_op_start!("query", session_id = %self.id, model = query.model());
        match self.fetch(query) {
            Ok(handles) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                log_op_end!(
                    "query",
                    duration_ms = duration_ms,
                    session_id = %self.id,
                    model = query.model(),
                    rows = handles.len()
                );
                Ok(handles)
            }
            Err(err) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                log_op_error!(
                    "query",
                    err.clone(),
                    duration_ms = duration_ms,
                    session_id = %self.id,
                    model = query.model()
                );
                Err(err)
            }
        }
    }

    /// Run a query expected to match at most one row
    ///
    /// # Errors
    ///
    /// `MultipleResults` when more than one row matches, plus everything
    /// [`Session::query`] returns.
    pub fn query_one(&mut self, query: &Query) -> Result<Option<InstanceHandle>> {
        let handles = self.query(query)?;
        match handles.len() {
            0 => Ok(None),
            1 => Ok(handles.first().copied()),
            count => Err(KeelError::MultipleResults {
                model: query.model().to_string(),
                count,
            }
            .into()),
        }
    }

    /// Delete every row matching the query, bypassing the unit of work
    ///
    /// Tracked instances for the deleted keys are detached. Rows removed
    /// by `ON DELETE CASCADE` are not reflected in the identity map.
    ///
    /// # Errors
    ///
    /// Compile errors, flush errors, storage errors (the statement batch is
    /// undone on failure).
    pub fn bulk_delete(&mut self, query: &Query) -> Result<u64> {
        self.ensure_open("bulk_delete")?;
        self.autoflush()?;
        let model = query.model().to_string();
        let start = Instant::now();
        log_op_start!("bulk_delete", session_id = %self.id, model = model.as_str());

        match self.bulk_delete_inner(query) {
            Ok(rows) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                log_op_end!(
                    "bulk_delete",
                    duration_ms = duration_ms,
                    session_id = %self.id,
                    model = model.as_str(),
                    rows = rows
                );
                Ok(rows)
            }
            Err(err) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                log_op_error!(
                    "bulk_delete",
                    err.clone(),
                    duration_ms = duration_ms,
                    session_id = %self.id,
                    model = model.as_str()
                );
                Err(err)
            }
        }
    }

    fn bulk_delete_inner(&mut self, query: &Query) -> Result<u64> {
        let registry = Arc::clone(&self.registry);
        let model = query.model();
        let descriptor = registry.resolve(model)?;
        let plan = compile_keys(query, &registry)?;
        let label = plan
            .root
            .label_of(&descriptor.primary_key)
            .ok_or_else(|| KeelError::Internal {
                reason: format!("key query for {} does not project its primary key", model),
            })?;

        let rows = self.storage.query(&plan.statement)?;
        let raw_keys: Vec<Value> = rows.iter().filter_map(|row| row.get(label).cloned()).collect();
        if raw_keys.is_empty() {
            return Ok(0);
        }

        self.storage.savepoint("keel_bulk_delete")?;
        let mut deleted = 0;
        for chunk in raw_keys.chunks(KEY_BATCH) {
            let statement =
                sql::delete_in(&descriptor.table, &descriptor.primary_key, chunk.to_vec());
            match self.storage.execute(&statement) {
                Ok(outcome) => deleted += outcome.rows_affected,
                Err(err) => {
                    if let Err(undo) = self.storage.rollback_to("keel_bulk_delete") {
                        tracing::error!(
                            component = module_path!(),
                            op = "bulk_delete",
                            session_id = %self.id,
                            error = %undo,
                            "savepoint rollback failed"
                        );
                    }
                    return Err(err);
                }
            }
        }
        self.storage.release("keel_bulk_delete")?;

        for raw in raw_keys {
            let value = registry.decode_column(descriptor, &descriptor.primary_key, raw)?;
            let Some(key) = KeyValue::from_value(&value) else {
                continue;
            };
            if let Some(handle) = self.identity.lookup(model, &key) {
                self.changeset.forget(handle);
                self.identity.detach(handle)?;
            }
        }
        self.cache.clear();
        Ok(deleted)
    }

    /// Flush pending changes, commit and begin the next transaction
    ///
    /// # Errors
    ///
    /// Flush errors (nothing is committed), storage errors.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open("commit")?;
        let start = Instant::now();
        log_op_start!("commit", session_id = %self.id);

        let result = self.commit_inner();
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => {
                log_op_end!("commit", duration_ms = duration_ms, session_id = %self.id);
            }
            Err(err) => {
                log_op_error!(
                    "commit",
                    err.clone(),
                    duration_ms = duration_ms,
                    session_id = %self.id
                );
            }
        }
        result
    }

    fn commit_inner(&mut self) -> Result<()> {
        if !self.changeset.is_empty() {
            self.flush()?;
        }
        self.storage.commit()?;
        self.storage.begin()
    }

    /// Discard the transaction and everything the session tracked
    ///
    /// Handles issued before the rollback become detached.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open("rollback")?;
        let start = Instant::now();
        log_op_start!("rollback", session_id = %self.id);

        let result = self.rollback_inner();
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => {
                log_op_end!("rollback", duration_ms = duration_ms, session_id = %self.id);
            }
            Err(err) => {
                log_op_error!(
                    "rollback",
                    err.clone(),
                    duration_ms = duration_ms,
                    session_id = %self.id
                );
            }
        }
        result
    }

    fn rollback_inner(&mut self) -> Result<()> {
        self.discard_state();
        if self.storage.in_transaction() {
            self.storage.rollback()?;
        }
        self.storage.begin()
    }

    pub(crate) fn discard_state(&mut self) {
        self.identity.clear();
        self.changeset.clear();
        self.cache.clear();
        self.generation += 1;
    }

    /// End the transaction and release the connection
    ///
    /// The connection is released even when committing fails; the
    /// transaction is rolled back in that case. Closing a closed session is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Flush and commit errors for [`Outcome::Commit`], storage errors.
    pub fn close(&mut self, outcome: Outcome) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        let start = Instant::now();
        log_op_start!("session_close", session_id = %self.id, outcome = ?outcome);

        let ended = match outcome {
            Outcome::Commit => self.close_commit(),
            Outcome::Rollback => self.close_rollback(),
        };
        self.discard_state();
        let released = self.storage.close();
        self.open = false;

        let result = ended.and(released);
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => {
                log_op_end!("session_close", duration_ms = duration_ms, session_id = %self.id);
            }
            Err(err) => {
                log_op_error!(
                    "session_close",
                    err.clone(),
                    duration_ms = duration_ms,
                    session_id = %self.id
                );
            }
        }
        result
    }

    fn close_commit(&mut self) -> Result<()> {
        if !self.changeset.is_empty() {
            self.flush()?;
        }
        self.storage.commit()
    }

    fn close_rollback(&mut self) -> Result<()> {
        if self.storage.in_transaction() {
            self.storage.rollback()?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        tracing::warn!(
            component = module_path!(),
            op = "session_drop",
            session_id = %self.id,
            pending_changes = self.changeset.len(),
            "session dropped while open; rolling back"
        );
        if let Err(err) = self.close(Outcome::Rollback) {
            tracing::error!(
                component = module_path!(),
                op = "session_drop",
                session_id = %self.id,
                error = %err,
                "rollback on drop failed"
            );
        }
    }
}
