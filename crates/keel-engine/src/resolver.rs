//! Lazy relationship resolution
//!
//! A relationship is resolved at most once per instance per session
//! generation: the identity map is consulted before storage, and results
//! (including empty collections and absent optional parents) are cached
//! until a write or flush invalidates them. Because resolution never
//! recurses, cyclic object graphs terminate naturally.

use crate::errors::{dangling, Result};
use crate::session::Session;
use keel_core::errors::KeelError;
use keel_core::query::{col, Query};
use keel_core::registry::descriptor::{RelationshipDescriptor, RelationshipShape};
use keel_core::unit_of_work::LinkOp;
use keel_core::{InstanceHandle, KeyValue, Value};
use std::sync::Arc;

/// Resolved value of a relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Single-valued; `None` for an absent optional parent or partner
    One(Option<InstanceHandle>),
    /// One-to-many or many-to-many, in key order
    Many(Vec<InstanceHandle>),
}

impl Resolved {
    pub fn one(&self) -> Option<InstanceHandle> {
        match self {
            Resolved::One(handle) => *handle,
            Resolved::Many(_) => None,
        }
    }

    pub fn many(&self) -> &[InstanceHandle] {
        match self {
            Resolved::One(_) => &[],
            Resolved::Many(handles) => handles,
        }
    }
}

/// Cache state of a relationship, observed without touching storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peek {
    Loaded(Resolved),
    NotLoaded,
}

impl Session {
    /// Resolve a relationship of a tracked instance
    ///
    /// # Errors
    ///
    /// `UnresolvedField` for unknown relationships, `DanglingReference` when
    /// a required parent is null or missing from storage, handle, flush and
    /// storage errors.
    pub fn resolve(&mut self, handle: InstanceHandle, relationship: &str) -> Result<Resolved> {
        self.ensure_open("resolve")?;
        let registry = Arc::clone(&self.registry);
        let model = self.identity.get(handle)?.model().to_string();
        let descriptor = registry.resolve(&model)?;
        let rel = descriptor
            .relationship(relationship)
            .ok_or_else(|| KeelError::UnresolvedField {
                model: model.clone(),
                path: relationship.to_string(),
            })?;

        // Pending children only become visible to a collection once flushed
        if rel.shape.parent_columns().is_none() {
            self.autoflush()?;
        }
        if let Some(cached) = self.cache.get(&(handle, relationship.to_string())) {
            return Ok(cached.clone());
        }

        let resolved = match (&rel.shape, rel.shape.parent_columns()) {
            (_, Some((local_column, _))) => {
                Resolved::One(self.resolve_parent(handle, &model, rel, local_column)?)
            }
            (RelationshipShape::OneToOneBack { remote_column }, None) => {
                let holders = self.holders_of(handle, &rel.target_model, remote_column)?;
                Resolved::One(holders.into_iter().next())
            }
            _ => Resolved::Many(self.resolve_collection(handle, &model, rel)?),
        };

        tracing::debug!(
            component = module_path!(),
            op = "resolve",
            session_id = %self.id,
            model = model.as_str(),
            relationship = relationship,
            generation = self.generation,
            "relationship resolved"
        );
        self.cache
            .insert((handle, relationship.to_string()), resolved.clone());
        Ok(resolved)
    }

    fn resolve_parent(
        &mut self,
        handle: InstanceHandle,
        model: &str,
        rel: &RelationshipDescriptor,
        local_column: &str,
    ) -> Result<Option<InstanceHandle>> {
        let instance = self.identity.get(handle)?;
        if let Some(target) = instance.pending_link(local_column) {
            return Ok(Some(target));
        }

        let value = instance.get(local_column).cloned().unwrap_or(Value::Null);
        let Some(key) = KeyValue::from_value(&value) else {
            return if rel.optional {
                Ok(None)
            } else {
                Err(dangling(model, &rel.name, "null"))
            };
        };

        if let Some(target) = self.identity.lookup(&rel.target_model, &key) {
            return Ok(Some(target));
        }

        let registry = Arc::clone(&self.registry);
        let target = registry.resolve(&rel.target_model)?;
        let query =
            Query::new(&rel.target_model).filter(col(&target.primary_key).eq(key.to_value()));
        match self.fetch(&query)?.into_iter().next() {
            Some(parent) => Ok(Some(parent)),
            None if rel.optional => Ok(None),
            None => Err(dangling(model, &rel.name, key.to_string())),
        }
    }

    fn resolve_collection(
        &mut self,
        handle: InstanceHandle,
        model: &str,
        rel: &RelationshipDescriptor,
    ) -> Result<Vec<InstanceHandle>> {
        if self.identity.get(handle)?.key().is_none() {
            return Ok(self.unsaved_members(handle, model, rel));
        }

        self.load_collection(model, &rel.name, &[handle])?;
        Ok(self
            .cache
            .get(&(handle, rel.name.clone()))
            .map(|r| r.many().to_vec())
            .unwrap_or_default())
    }

    /// Members of a collection whose owner has not been inserted yet:
    /// only instances linked in this session can belong to it
    fn unsaved_members(
        &self,
        owner: InstanceHandle,
        model: &str,
        rel: &RelationshipDescriptor,
    ) -> Vec<InstanceHandle> {
        match &rel.shape {
            RelationshipShape::OneToMany { remote_column } => self
                .identity
                .iter()
                .filter(|(_, i)| {
                    i.model() == rel.target_model && i.pending_link(remote_column) == Some(owner)
                })
                .map(|(h, _)| h)
                .collect(),
            RelationshipShape::ManyToMany { .. } => self
                .changeset
                .links()
                .iter()
                .filter(|l| {
                    l.owner == owner
                        && l.model == model
                        && l.relationship == rel.name
                        && l.op == LinkOp::Link
                })
                .map(|l| l.target)
                .collect(),
            RelationshipShape::ManyToOne { .. }
            | RelationshipShape::OneToOne { .. }
            | RelationshipShape::OneToOneBack { .. } => Vec::new(),
        }
    }

    /// Cached result of a relationship, without loading anything
    ///
    /// # Errors
    ///
    /// Handle errors, `UnresolvedField`, `SessionClosed`.
    pub fn peek(&self, handle: InstanceHandle, relationship: &str) -> Result<Peek> {
        self.ensure_open("peek")?;
        let instance = self.identity.get(handle)?;
        let descriptor = self.registry.resolve(instance.model())?;
        if descriptor.relationship(relationship).is_none() {
            return Err(KeelError::UnresolvedField {
                model: instance.model().to_string(),
                path: relationship.to_string(),
            }
            .into());
        }
        Ok(match self.cache.get(&(handle, relationship.to_string())) {
            Some(resolved) => Peek::Loaded(resolved.clone()),
            None => Peek::NotLoaded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::IdentityMap;

    #[test]
    fn test_resolved_accessors() {
        let mut identity = IdentityMap::new();
        let handle = identity
            .insert(keel_core::Instance::loaded(
                "User",
                KeyValue::Integer(1),
                Default::default(),
                None,
            ))
            .unwrap();

        assert_eq!(Resolved::One(Some(handle)).one(), Some(handle));
        assert!(Resolved::One(Some(handle)).many().is_empty());
        assert_eq!(Resolved::Many(vec![handle]).many(), &[handle]);
        assert_eq!(Resolved::Many(vec![handle]).one(), None);
        assert_eq!(Resolved::One(None).one(), None);
    }
}
