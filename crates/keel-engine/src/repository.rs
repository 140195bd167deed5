//! Model-scoped access on top of a session

use crate::errors::{invalid_operation, Result};
use crate::session::Session;
use keel_core::errors::KeelError;
use keel_core::query::{col, Predicate, Query};
use keel_core::{InstanceHandle, KeyValue, NewInstance, Value};

/// Thin per-model facade over a borrowed [`Session`]
///
/// ```ignore
/// let mut users = Repository::new(&mut session, "User");
/// let alice = users.create(NewInstance::new("User").set("email", "a@x.com"))?;
/// let again = users.get_by("email", "a@x.com")?;
/// ```
#[derive(Debug)]
pub struct Repository<'s> {
    session: &'s mut Session,
    model: String,
}

impl<'s> Repository<'s> {
    pub fn new(session: &'s mut Session, model: impl Into<String>) -> Self {
        Self {
            session,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn session(&mut self) -> &mut Session {
        self.session
    }

    /// Add a draft of this repository's model
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for a draft of another model, plus everything
    /// [`Session::add`] returns.
    pub fn create(&mut self, draft: NewInstance) -> Result<InstanceHandle> {
        if draft.model() != self.model {
            return Err(invalid_operation(
                "create",
                format!(
                    "repository of {} cannot create a {}",
                    self.model,
                    draft.model()
                ),
            ));
        }
        self.session.add(draft)
    }

    /// # Errors
    ///
    /// See [`Session::get`].
    pub fn get(&mut self, key: impl Into<KeyValue>) -> Result<Option<InstanceHandle>> {
        self.session.get(&self.model, key)
    }

    /// Look up one instance by a unique field or the primary key
    ///
    /// # Errors
    ///
    /// `InvalidQuery` when the field is neither unique nor the primary key,
    /// `UnresolvedField` for unknown fields, query errors.
    pub fn get_by(
        &mut self,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Option<InstanceHandle>> {
        let def = self.session.registry().definition(&self.model)?;
        let field_def = def
            .get_field(field)
            .ok_or_else(|| KeelError::UnresolvedField {
                model: self.model.clone(),
                path: field.to_string(),
            })?;
        if !field_def.unique && !field_def.primary_key {
            return Err(KeelError::InvalidQuery {
                model: self.model.clone(),
                reason: format!("'{}' is not unique; use select instead", field),
            }
            .into());
        }
        let query = Query::new(&self.model).filter(col(field).eq(value));
        self.session.query_one(&query)
    }

    /// # Errors
    ///
    /// See [`Session::query`].
    pub fn select(&mut self, predicate: Predicate) -> Result<Vec<InstanceHandle>> {
        self.session.query(&Query::new(&self.model).filter(predicate))
    }

    /// Every row of the model, in key order
    ///
    /// # Errors
    ///
    /// See [`Session::query`].
    pub fn all(&mut self) -> Result<Vec<InstanceHandle>> {
        let pk = self.session.registry().resolve(&self.model)?.primary_key.clone();
        self.session.query(&Query::new(&self.model).order_by(col(pk).asc()))
    }

    /// Schedule one instance of this model for deletion
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for an instance of another model, plus everything
    /// [`Session::delete`] returns.
    pub fn delete(&mut self, handle: InstanceHandle) -> Result<()> {
        let model = self.session.instance(handle)?.model().to_string();
        if model != self.model {
            return Err(invalid_operation(
                "delete",
                format!("repository of {} cannot delete a {}", self.model, model),
            ));
        }
        self.session.delete(handle)
    }

    /// Delete every matching row directly in storage
    ///
    /// # Errors
    ///
    /// See [`Session::bulk_delete`].
    pub fn bulk_delete(&mut self, predicate: Predicate) -> Result<u64> {
        self.session.bulk_delete(&Query::new(&self.model).filter(predicate))
    }
}
