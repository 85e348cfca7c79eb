//! Edited Object Store: session lifecycle and bookkeeping.
//!
//! # Responsibility
//! - Open, update, re-key and drop edit sessions.
//! - Allocate temporary ids for new subobjects and link them into parents.
//! - Decide which sessions are garbage once the UI stops referencing them.
//!
//! # Invariants
//! - A session is unmodified iff it deep-equals its seed: the persisted
//!   record for permanent ids, type defaults otherwise.
//! - Modified sessions are never collected.
//! - Re-keying rewrites session keys and every composite edge key together.

use crate::model::object::{is_permanent_id, ObjectId, ObjectType};
use crate::model::session::{EditedObject, ObjectPatch, SubobjectPatch};
use crate::service::layout;
use crate::store::id_allocator::IdAllocator;
use crate::store::object_store::ObjectStore;
use crate::store::{SessionError, StoreResult};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Publish state of a composite's direct, non-deleted children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubobjectsPublished {
    Yes,
    /// Also returned when there are no such children.
    No,
    Partially,
}

#[derive(Debug, Default)]
pub struct EditedObjectStore {
    sessions: BTreeMap<ObjectId, EditedObject>,
    ids: IdAllocator,
}

impl EditedObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ObjectId) -> Option<&EditedObject> {
        self.sessions.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.sessions.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &EditedObject)> + '_ {
        self.sessions.iter().map(|(id, session)| (*id, session))
    }

    /// Returns the open session or seeds a new one.
    pub fn open_session(
        &mut self,
        id: ObjectId,
        objects: &ObjectStore,
    ) -> StoreResult<&EditedObject> {
        match self.sessions.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let seed = seed_session(id, objects).ok_or(SessionError::ObjectNotLoaded(id))?;
                Ok(entry.insert(seed))
            }
        }
    }

    /// Whether the session differs from its seed. Missing sessions are unmodified.
    pub fn is_modified(&self, id: ObjectId, objects: &ObjectStore) -> bool {
        match (self.sessions.get(&id), seed_session(id, objects)) {
            (None, _) => false,
            (Some(session), Some(seed)) => !session.same_content(&seed),
            (Some(_), None) => true,
        }
    }

    pub fn update(&mut self, id: ObjectId, patch: ObjectPatch) -> StoreResult<()> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::SessionNotFound(id))?;
        session.apply_patch(patch);
        Ok(())
    }

    /// Updates one edge's metadata. The link-only setting is ignored for other kinds.
    pub fn update_subobject(
        &mut self,
        parent_id: ObjectId,
        child_id: ObjectId,
        patch: SubobjectPatch,
        objects: &ObjectStore,
    ) -> StoreResult<()> {
        let child_is_link = self.child_type(child_id, objects) == Some(ObjectType::Link);
        let parent = self
            .sessions
            .get_mut(&parent_id)
            .ok_or(SessionError::SessionNotFound(parent_id))?;
        let link = parent
            .composite
            .subobjects
            .get_mut(&child_id)
            .ok_or(SessionError::SubobjectNotFound {
                parent_id,
                child_id,
            })?;

        if let Some(delete_mode) = patch.delete_mode {
            link.delete_mode = delete_mode;
        }
        if let Some(is_expanded) = patch.is_expanded {
            link.is_expanded = is_expanded;
        }
        if let Some(value) = patch.show_description_composite {
            link.show_description_composite = value;
        }
        if let (Some(value), true) = (patch.show_description_as_link_composite, child_is_link) {
            link.show_description_as_link_composite = value;
        }
        Ok(())
    }

    /// Creates a default session under a fresh temporary id and links it
    /// at the end of the parent's first column.
    pub fn create_new_subobject_session(&mut self, parent_id: ObjectId) -> StoreResult<ObjectId> {
        self.ensure_composite(parent_id)?;
        let child_id = self.ids.allocate();
        self.sessions.insert(child_id, EditedObject::default());
        if let Some(parent) = self.sessions.get_mut(&parent_id) {
            layout::insert_subobject(&mut parent.composite, child_id);
        }
        Ok(child_id)
    }

    /// Links `child_id` into the parent. Returns `false` when already linked.
    pub fn link_subobject(&mut self, parent_id: ObjectId, child_id: ObjectId) -> StoreResult<bool> {
        if parent_id == child_id {
            return Err(SessionError::SelfReference(parent_id));
        }
        self.ensure_composite(parent_id)?;
        let parent = self
            .sessions
            .get_mut(&parent_id)
            .ok_or(SessionError::SessionNotFound(parent_id))?;
        Ok(layout::insert_subobject(&mut parent.composite, child_id))
    }

    /// Whether any open composite still links `child_id` without a pending delete.
    pub fn is_linked_anywhere(&self, child_id: ObjectId) -> bool {
        self.sessions.values().any(|session| {
            session
                .composite
                .subobjects
                .get(&child_id)
                .is_some_and(|link| !link.is_deleted())
        })
    }

    /// Whether any open composite has an edge to `child_id`, deleted or not.
    pub fn is_referenced(&self, child_id: ObjectId) -> bool {
        self.sessions
            .values()
            .any(|session| session.composite.subobjects.contains_key(&child_id))
    }

    /// Sets (or clears) the fetch error on every edge pointing at `child_id`.
    pub fn set_fetch_error(&mut self, child_id: ObjectId, error: Option<&str>) {
        for session in self.sessions.values_mut() {
            if let Some(link) = session.composite.subobjects.get_mut(&child_id) {
                link.fetch_error = error.map(str::to_string);
            }
        }
    }

    pub(crate) fn insert(&mut self, id: ObjectId, session: EditedObject) -> Option<EditedObject> {
        self.sessions.insert(id, session)
    }

    pub(crate) fn get_mut(&mut self, id: ObjectId) -> Option<&mut EditedObject> {
        self.sessions.get_mut(&id)
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<EditedObject> {
        self.sessions.remove(&id)
    }

    /// Drops every edge pointing at `child_id`. Returns affected parent ids.
    pub fn remove_links_to(&mut self, child_id: ObjectId) -> Vec<ObjectId> {
        self.sessions
            .iter_mut()
            .filter_map(|(parent_id, session)| {
                layout::remove_subobject(&mut session.composite, child_id).then_some(*parent_id)
            })
            .collect()
    }

    /// Rewrites temporary ids to permanent ones in keys and edges.
    pub fn rekey(&mut self, remap: &BTreeMap<ObjectId, ObjectId>) {
        let moved: Vec<(ObjectId, EditedObject)> = remap
            .iter()
            .filter(|(old_id, new_id)| old_id != new_id)
            .filter_map(|(old_id, new_id)| {
                self.sessions
                    .remove(old_id)
                    .map(|session| (*new_id, session))
            })
            .collect();
        self.sessions.extend(moved);

        for session in self.sessions.values_mut() {
            if !session
                .composite
                .subobjects
                .keys()
                .any(|id| remap.contains_key(id))
            {
                continue;
            }
            let links = std::mem::take(&mut session.composite.subobjects);
            session.composite.subobjects = links
                .into_iter()
                .map(|(id, link)| (remap.get(&id).copied().unwrap_or(id), link))
                .collect();
        }
    }

    /// Drops unreferenced, unmodified sessions and returns their ids.
    ///
    /// Kept: sessions in `referenced`, modified sessions, children of kept
    /// composites, and unmodified composites that are the only path to a
    /// modified descendant.
    pub fn collect_garbage(
        &mut self,
        referenced: &BTreeSet<ObjectId>,
        objects: &ObjectStore,
    ) -> Vec<ObjectId> {
        let modified: BTreeSet<ObjectId> = self
            .sessions
            .keys()
            .copied()
            .filter(|id| self.is_modified(*id, objects))
            .collect();
        let reachable = self.closure(referenced.iter().copied());

        let rescued: Vec<ObjectId> = self
            .sessions
            .iter()
            .filter(|(id, session)| {
                !reachable.contains(*id)
                    && !modified.contains(*id)
                    && !session.composite.subobjects.is_empty()
            })
            .map(|(id, _)| *id)
            .filter(|id| {
                self.closure(std::iter::once(*id))
                    .iter()
                    .any(|descendant| {
                        descendant != id
                            && modified.contains(descendant)
                            && !reachable.contains(descendant)
                    })
            })
            .collect();

        let kept = self.closure(
            referenced
                .iter()
                .chain(modified.iter())
                .chain(rescued.iter())
                .copied(),
        );
        let removed: Vec<ObjectId> = self
            .sessions
            .keys()
            .copied()
            .filter(|id| !kept.contains(id))
            .collect();
        for id in &removed {
            self.sessions.remove(id);
        }
        removed
    }

    /// Tri-state publish selector over direct non-deleted children.
    pub fn subobjects_published(
        &self,
        parent_id: ObjectId,
        objects: &ObjectStore,
    ) -> StoreResult<SubobjectsPublished> {
        let parent = self
            .sessions
            .get(&parent_id)
            .ok_or(SessionError::SessionNotFound(parent_id))?;
        let mut published = 0usize;
        let mut total = 0usize;
        for child_id in parent.composite.active_children() {
            let is_published = match self.sessions.get(&child_id) {
                Some(child) => child.attributes.is_published,
                None => objects
                    .get(child_id)
                    .is_some_and(|object| object.attributes.is_published),
            };
            total += 1;
            if is_published {
                published += 1;
            }
        }
        Ok(match (published, total) {
            (_, 0) | (0, _) => SubobjectsPublished::No,
            (published, total) if published == total => SubobjectsPublished::Yes,
            _ => SubobjectsPublished::Partially,
        })
    }

    /// Sets `is_published` on every direct non-deleted child that can be
    /// opened. Returns the number of children updated.
    pub fn set_subobjects_published(
        &mut self,
        parent_id: ObjectId,
        is_published: bool,
        objects: &ObjectStore,
    ) -> StoreResult<usize> {
        let children: Vec<ObjectId> = self
            .sessions
            .get(&parent_id)
            .ok_or(SessionError::SessionNotFound(parent_id))?
            .composite
            .active_children()
            .collect();
        let mut updated = 0;
        for child_id in children {
            if self.open_session(child_id, objects).is_err() {
                continue;
            }
            if let Some(child) = self.sessions.get_mut(&child_id) {
                child.attributes.is_published = is_published;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn ensure_composite(&self, id: ObjectId) -> StoreResult<()> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(SessionError::SessionNotFound(id))?;
        if !session.is_composite() {
            return Err(SessionError::NotComposite(id));
        }
        Ok(())
    }

    fn child_type(&self, child_id: ObjectId, objects: &ObjectStore) -> Option<ObjectType> {
        self.sessions
            .get(&child_id)
            .map(EditedObject::object_type)
            .or_else(|| objects.get(child_id).map(|object| object.object_type()))
    }

    fn closure(&self, roots: impl IntoIterator<Item = ObjectId>) -> BTreeSet<ObjectId> {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<ObjectId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(session) = self.sessions.get(&id) {
                stack.extend(
                    session
                        .composite
                        .subobjects
                        .keys()
                        .copied()
                        .filter(|child_id| self.sessions.contains_key(child_id)),
                );
            }
        }
        visited
    }
}

/// Seed a new session for `id` starts from, `None` for unloaded permanent ids.
pub(crate) fn seed_session(id: ObjectId, objects: &ObjectStore) -> Option<EditedObject> {
    if is_permanent_id(id) {
        objects.get(id).map(EditedObject::from_persisted)
    } else {
        Some(EditedObject::default())
    }
}
