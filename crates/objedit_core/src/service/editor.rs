//! Object editor facade exposed to the UI layer.
//!
//! # Responsibility
//! - Own the Object Store, the Edited Object Store and the backend handle.
//! - Drive page load, attach, save, reset and delete against the backend.
//! - Enforce the single-flight guard for saves and attach fetches.
//!
//! # Invariants
//! - At most one save per root id and one fetch per child id is pending.
//! - A failed save or fetch leaves both stores as they were, apart from the
//!   error message recorded for display.
//! - An attach fetch that completes after its link is gone writes no session.
//! - Stale layout commands are rejected as no-ops, never surfaced as errors.

use crate::config::EditorConfig;
use crate::model::object::{is_permanent_id, ObjectId, PersistedObject};
use crate::model::session::{EditedObject, ObjectPatch, SubobjectPatch};
use crate::repo::object_repo::{
    BackendError, BackendResult, DeleteResponse, ObjectBackend, ObjectIdPage, ObjectListQuery,
    UpsertRequest, UpsertResponse,
};
use crate::service::layout::{self, MoveOutcome, MoveTarget};
use crate::service::reset::{reset_session, ResetReport};
use crate::service::save_compiler::{apply_save_response, compile_save, CompiledSave, SaveError};
use crate::store::edited_store::{EditedObjectStore, SubobjectsPublished};
use crate::store::object_store::ObjectStore;
use crate::store::SessionError;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Errors from editor operations other than save.
#[derive(Debug)]
pub enum EditorError {
    SessionNotFound(ObjectId),
    /// Permanent id absent from the Object Store; load it first.
    ObjectNotLoaded(ObjectId),
    NotComposite(ObjectId),
    SelfReference(ObjectId),
    SubobjectNotFound {
        parent_id: ObjectId,
        child_id: ObjectId,
    },
    Backend(BackendError),
}

impl Display for EditorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionNotFound(id) => write!(f, "edit session not found: {id}"),
            Self::ObjectNotLoaded(id) => write!(f, "object not loaded: {id}"),
            Self::NotComposite(id) => write!(f, "object is not composite: {id}"),
            Self::SelfReference(id) => write!(f, "composite cannot contain itself: {id}"),
            Self::SubobjectNotFound {
                parent_id,
                child_id,
            } => write!(f, "subobject {child_id} not found in composite {parent_id}"),
            Self::Backend(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EditorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SessionError> for EditorError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::SessionNotFound(id) => Self::SessionNotFound(id),
            SessionError::ObjectNotLoaded(id) => Self::ObjectNotLoaded(id),
            SessionError::NotComposite(id) => Self::NotComposite(id),
            SessionError::SelfReference(id) => Self::SelfReference(id),
            SessionError::SubobjectNotFound {
                parent_id,
                child_id,
            } => Self::SubobjectNotFound {
                parent_id,
                child_id,
            },
        }
    }
}

impl From<BackendError> for EditorError {
    fn from(value: BackendError) -> Self {
        Self::Backend(value)
    }
}

/// Pending attach fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachTicket {
    pub parent_id: ObjectId,
    pub child_id: ObjectId,
}

/// First phase of an attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachStart {
    /// Child was available locally; link and session are in place.
    Attached,
    /// A fetch for the child is already pending; the link is in place.
    AlreadyPending,
    /// Fetch `ticket.child_id`, then call `complete_attach`.
    NeedsFetch(AttachTicket),
}

/// Final result of an attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    AlreadyPending,
    /// The link was removed while the fetch was pending.
    Discarded,
    /// Fetch failed; the message is set as `fetch_error` on the links.
    Failed(String),
}

/// Pending save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTicket {
    compiled: CompiledSave,
}

impl SaveTicket {
    pub fn root_id(&self) -> ObjectId {
        self.compiled.root_id
    }

    pub fn request_id(&self) -> Uuid {
        self.compiled.request_id
    }

    /// Request to send to `upsert_objects`.
    pub fn request(&self) -> &UpsertRequest {
        &self.compiled.request
    }
}

/// First phase of a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStart {
    /// Nothing differs from the persisted state; no request is needed.
    NothingToSave,
    Ready(SaveTicket),
}

/// Successful save summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Root id after the save; permanent unless nothing was sent for a new root.
    pub root_id: ObjectId,
    /// Temporary-to-permanent id map.
    pub id_map: BTreeMap<ObjectId, ObjectId>,
    pub deleted: Vec<ObjectId>,
}

/// Edit-session engine facade.
pub struct ObjectEditor<B: ObjectBackend> {
    backend: B,
    config: EditorConfig,
    objects: ObjectStore,
    sessions: EditedObjectStore,
    pending_saves: BTreeSet<ObjectId>,
    pending_fetches: BTreeSet<ObjectId>,
    session_errors: BTreeMap<ObjectId, String>,
}

impl<B: ObjectBackend> ObjectEditor<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, EditorConfig::default())
    }

    pub fn with_config(backend: B, config: EditorConfig) -> Self {
        Self {
            backend,
            config,
            objects: ObjectStore::new(),
            sessions: EditedObjectStore::new(),
            pending_saves: BTreeSet::new(),
            pending_fetches: BTreeSet::new(),
            session_errors: BTreeMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn sessions(&self) -> &EditedObjectStore {
        &self.sessions
    }

    pub fn session(&self, id: ObjectId) -> Option<&EditedObject> {
        self.sessions.get(id)
    }

    /// Last save or fetch failure recorded for `id`.
    pub fn session_error(&self, id: ObjectId) -> Option<&str> {
        self.session_errors.get(&id).map(String::as_str)
    }

    pub fn is_save_pending(&self, root_id: ObjectId) -> bool {
        self.pending_saves.contains(&root_id)
    }

    pub fn is_fetch_pending(&self, child_id: ObjectId) -> bool {
        self.pending_fetches.contains(&child_id)
    }

    pub fn is_modified(&self, id: ObjectId) -> bool {
        self.sessions.is_modified(id, &self.objects)
    }

    /// Fetches `ids` and the missing direct children of fetched composites
    /// into the Object Store. Returns requested ids that do not exist.
    pub fn load_objects(&mut self, ids: &[ObjectId]) -> Result<Vec<ObjectId>, EditorError> {
        let requested: Vec<ObjectId> = ids
            .iter()
            .copied()
            .filter(|id| is_permanent_id(*id))
            .collect();
        if requested.is_empty() {
            return Ok(Vec::new());
        }
        let fetched = self.backend.fetch_objects(&requested)?;
        let found: BTreeSet<ObjectId> = fetched.iter().map(|object| object.id).collect();
        let missing_children: BTreeSet<ObjectId> = fetched
            .iter()
            .flat_map(|object| object.subobjects().iter().map(|record| record.child_id))
            .filter(|child_id| !found.contains(child_id) && !self.objects.contains(*child_id))
            .collect();
        for object in fetched {
            self.objects.insert(object);
        }
        if !missing_children.is_empty() {
            let children: Vec<ObjectId> = missing_children.into_iter().collect();
            for object in self.backend.fetch_objects(&children)? {
                self.objects.insert(object);
            }
        }

        let not_found: Vec<ObjectId> = requested
            .into_iter()
            .filter(|id| !found.contains(id))
            .collect();
        info!(
            "event=objects_load module=editor status=ok requested={} found={} not_found={}",
            ids.len(),
            found.len(),
            not_found.len()
        );
        Ok(not_found)
    }

    pub fn list_object_ids(&self, query: &ObjectListQuery) -> Result<ObjectIdPage, EditorError> {
        Ok(self.backend.list_object_ids(query)?)
    }

    /// Opens (or returns) the session for `id`, plus sessions for loaded
    /// children when `id` is a composite.
    pub fn open_session(&mut self, id: ObjectId) -> Result<&EditedObject, EditorError> {
        self.sessions.open_session(id, &self.objects)?;
        let children: Vec<ObjectId> = self
            .sessions
            .get(id)
            .filter(|session| session.is_composite())
            .map(|session| session.composite.subobjects.keys().copied().collect())
            .unwrap_or_default();
        for child_id in children {
            if self.objects.contains(child_id) {
                self.sessions.open_session(child_id, &self.objects)?;
            }
        }
        self.sessions
            .get(id)
            .ok_or(EditorError::SessionNotFound(id))
    }

    pub fn update(&mut self, id: ObjectId, patch: ObjectPatch) -> Result<(), EditorError> {
        Ok(self.sessions.update(id, patch)?)
    }

    pub fn update_subobject(
        &mut self,
        parent_id: ObjectId,
        child_id: ObjectId,
        patch: SubobjectPatch,
    ) -> Result<(), EditorError> {
        Ok(self
            .sessions
            .update_subobject(parent_id, child_id, patch, &self.objects)?)
    }

    /// Moves one child of composite `parent_id`. Stale references are rejected.
    pub fn move_subobject(
        &mut self,
        parent_id: ObjectId,
        child_id: ObjectId,
        target: MoveTarget,
    ) -> MoveOutcome {
        match self.sessions.get_mut(parent_id) {
            Some(parent) if parent.is_composite() => {
                layout::move_subobject(&mut parent.composite, child_id, target)
            }
            _ => MoveOutcome::Rejected,
        }
    }

    pub fn create_new_subobject_session(
        &mut self,
        parent_id: ObjectId,
    ) -> Result<ObjectId, EditorError> {
        Ok(self.sessions.create_new_subobject_session(parent_id)?)
    }

    /// Links `child_id` into `parent_id` and opens its session if it is
    /// available locally; otherwise hands back a fetch ticket.
    pub fn begin_attach(
        &mut self,
        parent_id: ObjectId,
        child_id: ObjectId,
    ) -> Result<AttachStart, EditorError> {
        if !is_permanent_id(child_id) && !self.sessions.contains(child_id) {
            return Err(EditorError::SessionNotFound(child_id));
        }
        self.sessions.link_subobject(parent_id, child_id)?;

        if self.sessions.contains(child_id) || self.objects.contains(child_id) {
            self.sessions.open_session(child_id, &self.objects)?;
            return Ok(AttachStart::Attached);
        }
        if !self.pending_fetches.insert(child_id) {
            return Ok(AttachStart::AlreadyPending);
        }
        info!(
            "event=attach_fetch module=editor status=start parent_id={} child_id={}",
            parent_id, child_id
        );
        Ok(AttachStart::NeedsFetch(AttachTicket {
            parent_id,
            child_id,
        }))
    }

    /// Applies the fetch result of an attach.
    pub fn complete_attach(
        &mut self,
        ticket: AttachTicket,
        result: BackendResult<Vec<PersistedObject>>,
    ) -> AttachOutcome {
        let child_id = ticket.child_id;
        self.pending_fetches.remove(&child_id);

        let failure = match result {
            Ok(fetched) => {
                let found = fetched.iter().any(|object| object.id == child_id);
                for object in fetched {
                    self.objects.insert(object);
                }
                if found {
                    None
                } else {
                    Some(BackendError::NotFound(vec![child_id]).to_string())
                }
            }
            Err(err) => Some(err.to_string()),
        };

        if !self.sessions.is_linked_anywhere(child_id) {
            info!(
                "event=attach_fetch module=editor status=discarded parent_id={} child_id={}",
                ticket.parent_id, child_id
            );
            return AttachOutcome::Discarded;
        }

        match failure {
            None => {
                if self.sessions.open_session(child_id, &self.objects).is_err() {
                    let message = BackendError::NotFound(vec![child_id]).to_string();
                    self.sessions.set_fetch_error(child_id, Some(&message));
                    return AttachOutcome::Failed(message);
                }
                self.sessions.set_fetch_error(child_id, None);
                info!(
                    "event=attach_fetch module=editor status=ok parent_id={} child_id={}",
                    ticket.parent_id, child_id
                );
                AttachOutcome::Attached
            }
            Some(message) => {
                warn!(
                    "event=attach_fetch module=editor status=error parent_id={} child_id={}",
                    ticket.parent_id, child_id
                );
                self.sessions.set_fetch_error(child_id, Some(&message));
                AttachOutcome::Failed(message)
            }
        }
    }

    /// Attaches an existing object, fetching it through the backend if needed.
    pub fn attach_existing_subobject(
        &mut self,
        parent_id: ObjectId,
        child_id: ObjectId,
    ) -> Result<AttachOutcome, EditorError> {
        match self.begin_attach(parent_id, child_id)? {
            AttachStart::Attached => Ok(AttachOutcome::Attached),
            AttachStart::AlreadyPending => Ok(AttachOutcome::AlreadyPending),
            AttachStart::NeedsFetch(ticket) => {
                let result = self.backend.fetch_objects(&[ticket.child_id]);
                Ok(self.complete_attach(ticket, result))
            }
        }
    }

    /// Compiles the save of `root_id` and marks it in flight.
    pub fn begin_save(&mut self, root_id: ObjectId) -> Result<SaveStart, SaveError> {
        if self.pending_saves.contains(&root_id) {
            return Err(SaveError::AlreadyInFlight(root_id));
        }
        let compiled = match compile_save(root_id, &self.sessions, &self.objects, &self.config) {
            Ok(compiled) => compiled,
            Err(err) => {
                if let SaveError::Validation { object_id, error } = &err {
                    warn!(
                        "event=save_compile module=editor status=invalid root_id={} object_id={}",
                        root_id, object_id
                    );
                    self.session_errors.insert(*object_id, error.to_string());
                }
                return Err(err);
            }
        };
        if compiled.is_empty() {
            return Ok(SaveStart::NothingToSave);
        }
        self.pending_saves.insert(root_id);
        info!(
            "event=save module=editor status=start request_id={} root_id={} added={} updated={} layouts={} deleted={}",
            compiled.request_id,
            root_id,
            compiled.request.added.len(),
            compiled.request.updated.len(),
            compiled.request.composite_layouts.len(),
            compiled.request.deleted_object_ids.len()
        );
        Ok(SaveStart::Ready(SaveTicket { compiled }))
    }

    /// Applies the backend result of a save started with `begin_save`.
    pub fn complete_save(
        &mut self,
        ticket: SaveTicket,
        result: BackendResult<UpsertResponse>,
    ) -> Result<SaveReport, SaveError> {
        let compiled = ticket.compiled;
        let root_id = compiled.root_id;
        self.pending_saves.remove(&root_id);

        let applied = result.and_then(|response| {
            apply_save_response(&compiled, &response, &mut self.sessions, &mut self.objects)
                .map(|id_map| (id_map, response.deleted))
        });
        let (id_map, deleted) = match applied {
            Ok(applied) => applied,
            Err(err) => {
                warn!(
                    "event=save module=editor status=error request_id={} root_id={}",
                    compiled.request_id, root_id
                );
                self.session_errors.insert(root_id, err.to_string());
                return Err(SaveError::Backend(err));
            }
        };

        let saved_root = id_map.get(&root_id).copied().unwrap_or(root_id);
        self.session_errors.remove(&root_id);
        self.session_errors.remove(&saved_root);
        for id in compiled
            .request
            .added
            .iter()
            .chain(compiled.request.updated.iter())
            .map(|object| id_map.get(&object.id).copied().unwrap_or(object.id))
        {
            self.session_errors.remove(&id);
        }
        for temp_id in id_map.keys() {
            self.session_errors.remove(temp_id);
        }

        info!(
            "event=save module=editor status=ok request_id={} root_id={} saved_root_id={} remapped={} deleted={}",
            compiled.request_id,
            root_id,
            saved_root,
            id_map.len(),
            deleted.len()
        );
        Ok(SaveReport {
            root_id: saved_root,
            id_map,
            deleted,
        })
    }

    /// Compiles, sends and applies the save of `root_id`.
    pub fn save(&mut self, root_id: ObjectId) -> Result<SaveReport, SaveError> {
        match self.begin_save(root_id)? {
            SaveStart::NothingToSave => Ok(SaveReport {
                root_id,
                ..SaveReport::default()
            }),
            SaveStart::Ready(ticket) => {
                let result = if ticket.request().is_empty() {
                    Ok(UpsertResponse::default())
                } else {
                    self.backend.upsert_objects(ticket.request())
                };
                self.complete_save(ticket, result)
            }
        }
    }

    pub fn reset(
        &mut self,
        id: ObjectId,
        include_subobjects: bool,
    ) -> Result<ResetReport, EditorError> {
        let report = reset_session(id, include_subobjects, &mut self.sessions, &self.objects)?;
        self.session_errors.remove(&id);
        for child_id in &report.removed_sessions {
            self.session_errors.remove(child_id);
        }
        Ok(report)
    }

    /// Deletes objects everywhere. Ids the backend does not know count as deleted.
    pub fn delete_objects(&mut self, ids: &[ObjectId]) -> Result<DeleteResponse, EditorError> {
        let (permanent, temporary): (Vec<ObjectId>, Vec<ObjectId>) =
            ids.iter().copied().partition(|id| is_permanent_id(*id));
        let mut response = if permanent.is_empty() {
            DeleteResponse::default()
        } else {
            self.backend.delete_objects(&permanent)?
        };

        for id in response
            .deleted
            .iter()
            .chain(response.not_found.iter())
            .chain(temporary.iter())
        {
            self.objects.remove(*id);
            self.objects.remove_child_references(*id);
            self.sessions.remove(*id);
            self.sessions.remove_links_to(*id);
            self.session_errors.remove(id);
        }
        response.deleted.extend(temporary);
        info!(
            "event=objects_delete module=editor status=ok deleted={} not_found={}",
            response.deleted.len(),
            response.not_found.len()
        );
        Ok(response)
    }

    /// Drops unmodified sessions not reachable from `visible`.
    pub fn collect_garbage(&mut self, visible: &BTreeSet<ObjectId>) -> Vec<ObjectId> {
        let referenced: BTreeSet<ObjectId> =
            visible.union(&self.pending_saves).copied().collect();
        let removed = self.sessions.collect_garbage(&referenced, &self.objects);
        if !removed.is_empty() {
            info!(
                "event=session_gc module=editor status=ok removed={} remaining={}",
                removed.len(),
                self.sessions.len()
            );
        }
        removed
    }

    pub fn subobjects_published(
        &self,
        parent_id: ObjectId,
    ) -> Result<SubobjectsPublished, EditorError> {
        Ok(self.sessions.subobjects_published(parent_id, &self.objects)?)
    }

    pub fn set_subobjects_published(
        &mut self,
        parent_id: ObjectId,
        is_published: bool,
    ) -> Result<usize, EditorError> {
        Ok(self
            .sessions
            .set_subobjects_published(parent_id, is_published, &self.objects)?)
    }
}
