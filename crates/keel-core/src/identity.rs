//! Identity map
//!
//! Arena of live instances owned by one session. Removing an instance frees
//! its slot for reuse under a new generation, so stale handles report
//! `DetachedInstance` instead of silently naming a newer object.

use crate::errors::{KeelError, Result};
use crate::instance::{Instance, InstanceHandle};
use crate::model::KeyValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    /// Insertion order of the current occupant
    seq: u64,
    instance: Option<Instance>,
}

#[derive(Debug)]
pub struct IdentityMap {
    tag: u64,
    slots: Vec<Slot>,
    free: Vec<u32>,
    keys: HashMap<(String, KeyValue), u32>,
    live: usize,
    next_seq: u64,
}

impl Default for IdentityMap {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityMap {
    pub fn new() -> Self {
        Self {
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            free: Vec::new(),
            keys: HashMap::new(),
            live: 0,
            next_seq: 0,
        }
    }

    /// Tag stamped into every handle this map issues
    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Slots allocated so far, live or free
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn handle(&self, slot: u32) -> InstanceHandle {
        let generation = self.slots.get(slot as usize).map_or(0, |s| s.generation);
        InstanceHandle::at(self.tag, slot, generation)
    }

    fn slot_of(&self, handle: InstanceHandle) -> Result<usize> {
        if handle.session_tag() != self.tag {
            return Err(KeelError::ForeignInstance {
                handle: handle.to_string(),
            });
        }
        match self.slots.get(handle.slot() as usize) {
            Some(slot) if slot.generation == handle.generation() && slot.instance.is_some() => {
                Ok(handle.slot() as usize)
            }
            _ => Err(KeelError::DetachedInstance {
                handle: handle.to_string(),
            }),
        }
    }

    /// # Errors
    ///
    /// `ForeignInstance` for a handle issued by another map,
    /// `DetachedInstance` for a handle whose instance was removed.
    pub fn check(&self, handle: InstanceHandle) -> Result<()> {
        self.slot_of(handle).map(|_| ())
    }

    /// # Errors
    ///
    /// See [`IdentityMap::check`].
    pub fn get(&self, handle: InstanceHandle) -> Result<&Instance> {
        let slot = self.slot_of(handle)?;
        self.slots[slot]
            .instance
            .as_ref()
            .ok_or_else(|| KeelError::DetachedInstance {
                handle: handle.to_string(),
            })
    }

    /// # Errors
    ///
    /// See [`IdentityMap::check`].
    pub fn get_mut(&mut self, handle: InstanceHandle) -> Result<&mut Instance> {
        let slot = self.slot_of(handle)?;
        self.slots[slot]
            .instance
            .as_mut()
            .ok_or_else(|| KeelError::DetachedInstance {
                handle: handle.to_string(),
            })
    }

    pub fn lookup(&self, model: &str, key: &KeyValue) -> Option<InstanceHandle> {
        self.keys
            .get(&(model.to_string(), key.clone()))
            .map(|slot| self.handle(*slot))
    }

    /// Track an instance, mapping its key when it has one
    ///
    /// # Errors
    ///
    /// `DuplicateKey` when another tracked instance already owns the key.
    pub fn insert(&mut self, instance: Instance) -> Result<InstanceHandle> {
        let entry = instance
            .key()
            .map(|key| (instance.model().to_string(), key.clone()));
        if let Some(entry) = &entry {
            if self.keys.contains_key(entry) {
                return Err(KeelError::DuplicateKey {
                    model: entry.0.clone(),
                    key: entry.1.to_string(),
                });
            }
        }

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                let slot = u32::try_from(self.slots.len()).map_err(|_| KeelError::Internal {
                    reason: "identity map is full".to_string(),
                })?;
                self.slots.push(Slot::default());
                slot
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        let occupied = &mut self.slots[slot as usize];
        occupied.seq = seq;
        occupied.instance = Some(instance);

        if let Some(entry) = entry {
            self.keys.insert(entry, slot);
        }
        self.live += 1;
        Ok(self.handle(slot))
    }

    /// Record the key of an instance that just received one
    ///
    /// # Errors
    ///
    /// `DuplicateKey` when the key already maps to a different instance,
    /// plus the handle errors of [`IdentityMap::check`].
    pub fn bind_key(&mut self, handle: InstanceHandle, key: KeyValue) -> Result<()> {
        let model = self.get(handle)?.model().to_string();
        let entry = (model, key);
        match self.keys.get(&entry) {
            Some(slot) if *slot != handle.slot() => {
                return Err(KeelError::DuplicateKey {
                    model: entry.0,
                    key: entry.1.to_string(),
                })
            }
            _ => {}
        }
        let instance = self.get_mut(handle)?;
        if let Some(old) = instance.key().cloned() {
            if old != entry.1 {
                let stale = (entry.0.clone(), old);
                self.keys.remove(&stale);
            }
        }
        self.get_mut(handle)?.set_key(entry.1.clone());
        self.keys.insert(entry, handle.slot());
        Ok(())
    }

    /// Empty a slot and put it up for reuse under the next generation
    fn release(&mut self, slot: u32) -> Option<Instance> {
        let entry = self.slots.get_mut(slot as usize)?;
        let instance = entry.instance.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(slot);
        self.live -= 1;
        Some(instance)
    }

    /// Stop tracking an instance and hand it back
    ///
    /// # Errors
    ///
    /// See [`IdentityMap::check`].
    pub fn detach(&mut self, handle: InstanceHandle) -> Result<Instance> {
        let slot = self.slot_of(handle)?;
        let instance = self
            .release(slot as u32)
            .ok_or_else(|| KeelError::DetachedInstance {
                handle: handle.to_string(),
            })?;
        if let Some(key) = instance.key() {
            self.keys.remove(&(instance.model().to_string(), key.clone()));
        }
        Ok(instance)
    }

    /// Tracked instances in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (InstanceHandle, &Instance)> {
        let mut live: Vec<(u64, InstanceHandle, &Instance)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| {
                let handle = InstanceHandle::at(self.tag, slot as u32, s.generation);
                s.instance.as_ref().map(|instance| (s.seq, handle, instance))
            })
            .collect();
        live.sort_by_key(|(seq, _, _)| *seq);
        live.into_iter().map(|(_, handle, instance)| (handle, instance))
    }

    pub fn handles(&self) -> Vec<InstanceHandle> {
        self.iter().map(|(h, _)| h).collect()
    }

    /// Drop every instance; outstanding handles become detached
    pub fn clear(&mut self) {
        for slot in 0..self.slots.len() {
            self.release(slot as u32);
        }
        self.keys.clear();
    }
}
