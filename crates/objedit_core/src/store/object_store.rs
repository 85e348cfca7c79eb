//! Object Store: last-known-persisted copies keyed by permanent id.
//!
//! # Invariants
//! - Entries are only replaced wholesale, by a successful save or load.
//! - Every composite entry keeps a dense child layout, also after removals.

use crate::model::object::{ObjectId, PersistedObject};
use crate::service::layout::ColumnGrid;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
    objects: BTreeMap<ObjectId, PersistedObject>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ObjectId) -> Option<&PersistedObject> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.keys().copied()
    }

    /// Replaces the whole record for `object.id`.
    pub fn insert(&mut self, object: PersistedObject) -> Option<PersistedObject> {
        self.objects.insert(object.id, object)
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<PersistedObject> {
        self.objects.remove(&id)
    }

    /// Removes `child_id` from every composite layout. Returns affected parent ids.
    pub fn remove_child_references(&mut self, child_id: ObjectId) -> Vec<ObjectId> {
        let mut affected = Vec::new();
        for (parent_id, object) in self.objects.iter_mut() {
            let Some(subobjects) = object.subobjects_mut() else {
                continue;
            };
            if !subobjects.iter().any(|record| record.child_id == child_id) {
                continue;
            }
            subobjects.retain(|record| record.child_id != child_id);
            let grid = ColumnGrid::from_records(subobjects);
            grid.write_records(subobjects);
            affected.push(*parent_id);
        }
        affected
    }
}
