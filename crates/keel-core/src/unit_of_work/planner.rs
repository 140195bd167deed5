//! Flush planning
//!
//! Orders a changeset into statements the store will accept: parents are
//! written before children, association rows after both ends exist, and
//! deletes run children first.

use crate::errors::{KeelError, Result};
use crate::identity::IdentityMap;
use crate::instance::InstanceHandle;
use crate::model::KeyValue;
use crate::registry::{order_by_dependencies, SchemaRegistry};
use crate::unit_of_work::changeset::{Changeset, LinkEntry, LinkOp, Operation};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushStep {
    Insert {
        handle: InstanceHandle,
        model: String,
    },
    Update {
        handle: InstanceHandle,
        model: String,
    },
    /// Fill a foreign key left null because its target was written later
    /// (only happens when a dependency cycle had to be broken)
    Relink {
        handle: InstanceHandle,
        model: String,
        field: String,
        target: InstanceHandle,
    },
    Unlink(LinkEntry),
    Link(LinkEntry),
    Delete {
        handle: InstanceHandle,
        model: String,
    },
}

impl FlushStep {
    pub fn model(&self) -> &str {
        match self {
            FlushStep::Insert { model, .. }
            | FlushStep::Update { model, .. }
            | FlushStep::Relink { model, .. }
            | FlushStep::Delete { model, .. } => model,
            FlushStep::Unlink(link) | FlushStep::Link(link) => &link.model,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushPlan {
    pub steps: Vec<FlushStep>,
}

impl FlushPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when a foreign key written by `handle`'s insert or update must
    /// stay null until a later relink step
    pub fn defers(&self, handle: InstanceHandle, field: &str) -> bool {
        self.steps.iter().any(|s| {
            matches!(s, FlushStep::Relink { handle: h, field: f, .. } if *h == handle && f == field)
        })
    }
}

/// Order the changeset into a flush plan
///
/// # Errors
///
/// `DanglingReference` when a pending link targets an instance that is
/// neither saved nor part of this flush; handle errors from the identity map.
pub fn plan(
    changeset: &Changeset,
    identity: &IdentityMap,
    registry: &SchemaRegistry,
) -> Result<FlushPlan> {
    let saves: Vec<_> = changeset
        .entries()
        .iter()
        .filter(|e| e.op != Operation::Delete)
        .collect();
    let deletes: Vec<_> = changeset
        .entries()
        .iter()
        .filter(|e| e.op == Operation::Delete)
        .collect();

    let creating: HashSet<InstanceHandle> = saves
        .iter()
        .filter(|e| e.op == Operation::Create)
        .map(|e| e.handle)
        .collect();

    // Pending links of every saved instance, targets checked up front
    let mut pending: HashMap<InstanceHandle, Vec<(String, InstanceHandle)>> = HashMap::new();
    for entry in &saves {
        let instance = identity.get(entry.handle)?;
        let mut links = Vec::new();
        for (field, target) in instance.pending_links() {
            let has_key = identity.get(target).map(|t| t.key().is_some()).unwrap_or(false);
            if !creating.contains(&target) && !has_key {
                return Err(KeelError::DanglingReference {
                    model: entry.model.clone(),
                    relationship: field.to_string(),
                    target: target.to_string(),
                });
            }
            if creating.contains(&target) {
                links.push((field.to_string(), target));
            }
        }
        pending.insert(entry.handle, links);
    }

    let mut steps = Vec::with_capacity(changeset.len());

    let mut save_models: Vec<&str> = Vec::new();
    for entry in &saves {
        if !save_models.contains(&entry.model.as_str()) {
            save_models.push(entry.model.as_str());
        }
    }
    let table_order = order_by_dependencies(&save_models, |m| registry.dependencies(m));

    let mut written: HashSet<InstanceHandle> = HashSet::new();
    let mut relinks = Vec::new();
    for model in table_order {
        let rows: Vec<InstanceHandle> = saves
            .iter()
            .filter(|e| e.model == model)
            .map(|e| e.handle)
            .collect();
        let same_table: HashSet<InstanceHandle> = rows.iter().copied().collect();
        let ordered = order_by_dependencies(&rows, |h| {
            pending
                .get(&h)
                .map(|links| {
                    links
                        .iter()
                        .map(|(_, t)| *t)
                        .filter(|t| same_table.contains(t))
                        .collect()
                })
                .unwrap_or_default()
        });

        for handle in ordered {
            for (field, target) in pending.get(&handle).into_iter().flatten() {
                if !written.contains(target) {
                    relinks.push(FlushStep::Relink {
                        handle,
                        model: model.to_string(),
                        field: field.clone(),
                        target: *target,
                    });
                }
            }
            written.insert(handle);
            let model = model.to_string();
            steps.push(if creating.contains(&handle) {
                FlushStep::Insert { handle, model }
            } else {
                FlushStep::Update { handle, model }
            });
        }
    }
    steps.extend(relinks);

    let mut links: Vec<&LinkEntry> = changeset.links().iter().collect();
    links.sort_by_key(|l| l.seq);
    steps.extend(
        links
            .iter()
            .filter(|l| l.op == LinkOp::Unlink)
            .map(|l| FlushStep::Unlink((*l).clone())),
    );
    steps.extend(
        links
            .iter()
            .filter(|l| l.op == LinkOp::Link)
            .map(|l| FlushStep::Link((*l).clone())),
    );

    let mut delete_models: Vec<&str> = Vec::new();
    for entry in &deletes {
        if !delete_models.contains(&entry.model.as_str()) {
            delete_models.push(entry.model.as_str());
        }
    }
    let mut delete_order = order_by_dependencies(&delete_models, |m| registry.dependencies(m));
    delete_order.reverse();
    for model in delete_order {
        let rows: Vec<InstanceHandle> = deletes
            .iter()
            .filter(|e| e.model == model)
            .map(|e| e.handle)
            .collect();
        for handle in order_deletes(model, &rows, identity, registry)? {
            steps.push(FlushStep::Delete {
                handle,
                model: model.to_string(),
            });
        }
    }

    Ok(FlushPlan { steps })
}

/// Rows of one table that reference each other are deleted children first
fn order_deletes(
    model: &str,
    rows: &[InstanceHandle],
    identity: &IdentityMap,
    registry: &SchemaRegistry,
) -> Result<Vec<InstanceHandle>> {
    let descriptor = registry.resolve(model)?;
    let self_refs: Vec<&str> = descriptor
        .foreign_keys
        .iter()
        .filter(|fk| fk.target_model == model)
        .map(|fk| fk.column.as_str())
        .collect();
    if self_refs.is_empty() || rows.len() < 2 {
        return Ok(rows.to_vec());
    }

    let mut by_key: HashMap<KeyValue, InstanceHandle> = HashMap::new();
    for handle in rows {
        if let Some(key) = identity.get(*handle)?.key() {
            by_key.insert(key.clone(), *handle);
        }
    }
    let mut children: HashMap<InstanceHandle, Vec<InstanceHandle>> = HashMap::new();
    for handle in rows {
        let instance = identity.get(*handle)?;
        for column in &self_refs {
            let parent = instance
                .get(column)
                .and_then(KeyValue::from_value)
                .and_then(|key| by_key.get(&key));
            if let Some(parent) = parent {
                children.entry(*parent).or_default().push(*handle);
            }
        }
    }

    Ok(order_by_dependencies(rows, |h| {
        children.get(&h).cloned().unwrap_or_default()
    }))
}
