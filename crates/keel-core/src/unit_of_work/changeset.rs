//! Pending operations accumulated by a session

use crate::instance::InstanceHandle;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub handle: InstanceHandle,
    pub model: String,
    pub op: Operation,
    /// Position of the first change to this instance
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkOp {
    Link,
    Unlink,
}

/// Pending row change in a derived association table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub model: String,
    pub relationship: String,
    pub owner: InstanceHandle,
    pub target: InstanceHandle,
    pub op: LinkOp,
    pub seq: u64,
}

impl LinkEntry {
    fn same_pair(&self, other: &LinkEntry) -> bool {
        self.model == other.model
            && self.relationship == other.relationship
            && self.owner == other.owner
            && self.target == other.target
    }
}

/// What `record_delete` did with the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// A DELETE will be issued at the next flush
    Scheduled,
    /// The instance was never inserted; nothing to issue
    Discarded,
}

#[derive(Debug, Default, Clone)]
pub struct Changeset {
    entries: Vec<ChangeEntry>,
    index: HashMap<InstanceHandle, usize>,
    links: Vec<LinkEntry>,
    next_seq: u64,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.handle, i))
            .collect();
    }

    pub fn record_create(&mut self, handle: InstanceHandle, model: &str) {
        if self.index.contains_key(&handle) {
            return;
        }
        let seq = self.bump();
        self.index.insert(handle, self.entries.len());
        self.entries.push(ChangeEntry {
            handle,
            model: model.to_string(),
            op: Operation::Create,
            seq,
        });
    }

    /// Pending creates and deletes absorb later updates
    pub fn record_update(&mut self, handle: InstanceHandle, model: &str) {
        if self.index.contains_key(&handle) {
            return;
        }
        let seq = self.bump();
        self.index.insert(handle, self.entries.len());
        self.entries.push(ChangeEntry {
            handle,
            model: model.to_string(),
            op: Operation::Update,
            seq,
        });
    }

    /// Record an update that must be written before `later`'s change
    ///
    /// Used when `handle` gives up a unique value that `later` takes over.
    pub fn record_update_before(
        &mut self,
        handle: InstanceHandle,
        model: &str,
        later: InstanceHandle,
    ) {
        self.record_update(handle, model);
        let (Some(&at), Some(&ahead)) = (self.index.get(&handle), self.index.get(&later)) else {
            return;
        };
        if at > ahead {
            let entry = self.entries.remove(at);
            self.entries.insert(ahead, entry);
            self.reindex();
        }
    }

    pub fn record_delete(&mut self, handle: InstanceHandle, model: &str) -> DeleteOutcome {
        match self.index.get(&handle).copied() {
            Some(i) if self.entries[i].op == Operation::Create => {
                self.forget(handle);
                DeleteOutcome::Discarded
            }
            Some(i) => {
                self.entries[i].op = Operation::Delete;
                DeleteOutcome::Scheduled
            }
            None => {
                let seq = self.bump();
                self.index.insert(handle, self.entries.len());
                self.entries.push(ChangeEntry {
                    handle,
                    model: model.to_string(),
                    op: Operation::Delete,
                    seq,
                });
                DeleteOutcome::Scheduled
            }
        }
    }

    /// Queue an association change; the opposite pending change for the
    /// same pair cancels out instead
    pub fn record_link(
        &mut self,
        model: &str,
        relationship: &str,
        owner: InstanceHandle,
        target: InstanceHandle,
        op: LinkOp,
    ) {
        let seq = self.bump();
        let entry = LinkEntry {
            model: model.to_string(),
            relationship: relationship.to_string(),
            owner,
            target,
            op,
            seq,
        };
        if let Some(pos) = self.links.iter().position(|l| l.same_pair(&entry)) {
            if self.links[pos].op != op {
                self.links.remove(pos);
            }
            return;
        }
        self.links.push(entry);
    }

    /// Drop everything recorded for an instance
    pub fn forget(&mut self, handle: InstanceHandle) {
        if self.index.remove(&handle).is_some() {
            self.entries.retain(|e| e.handle != handle);
            self.reindex();
        }
        self.links
            .retain(|l| l.owner != handle && l.target != handle);
    }

    pub fn op_for(&self, handle: InstanceHandle) -> Option<Operation> {
        self.index.get(&handle).map(|i| self.entries[*i].op)
    }

    /// Entries in order of first change
    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn links(&self) -> &[LinkEntry] {
        &self.links
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.links.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.links.clear();
    }
}
