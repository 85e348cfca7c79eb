//! Diff & save compiler.
//!
//! # Responsibility
//! - Compile the dirty subtree under one root into a single upsert request.
//! - Apply a successful response: store replacement, deletions, id re-keying.
//!
//! # Invariants
//! - Compilation never mutates either store.
//! - The first validation failure aborts compilation with no partial request.
//! - Layout-only edits produce zero object mutations.
//! - Nested composite children are saved as links only.
//! - Response application is all-or-nothing: the response is checked for a
//!   permanent id per temporary id before any store is touched.
//! - A session edited after compilation keeps its edits; only untouched
//!   sessions are re-seeded from the saved records.

use crate::config::EditorConfig;
use crate::model::object::{is_permanent_id, ObjectId, ObjectType, SubobjectRecord};
use crate::model::session::{DeleteMode, EditedObject, SubobjectLink};
use crate::model::validation::{validate_session, ValidationError};
use crate::repo::object_repo::{
    BackendError, CompositeLayout, ObjectUpsert, UpsertRequest, UpsertResponse,
};
use crate::service::layout::{self, ColumnGrid};
use crate::store::edited_store::{seed_session, EditedObjectStore};
use crate::store::object_store::ObjectStore;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Errors from the save pipeline.
#[derive(Debug)]
pub enum SaveError {
    /// Root has no open session.
    SessionNotFound(ObjectId),
    /// A save for the same root is still pending; callers ignore this.
    AlreadyInFlight(ObjectId),
    /// Local validation failed on one node.
    Validation {
        object_id: ObjectId,
        error: ValidationError,
    },
    Backend(BackendError),
}

impl Display for SaveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionNotFound(id) => write!(f, "edit session not found: {id}"),
            Self::AlreadyInFlight(id) => write!(f, "save already in flight for object {id}"),
            Self::Validation { object_id, error } => {
                write!(f, "object {object_id} failed validation: {error}")
            }
            Self::Backend(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SaveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation { error, .. } => Some(error),
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackendError> for SaveError {
    fn from(value: BackendError) -> Self {
        Self::Backend(value)
    }
}

/// Upsert request plus the bookkeeping needed to apply its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSave {
    /// Correlates compile/complete log lines of one save.
    pub request_id: Uuid,
    pub root_id: ObjectId,
    pub request: UpsertRequest,
    /// Children unlinked from the root only. New ones keep their session
    /// while another composite still links them.
    pub unlinked: Vec<ObjectId>,
    /// Fully deleted new children; they never reach the backend.
    pub discarded: Vec<ObjectId>,
    /// Root and sent sessions as compiled, keyed by pre-save id.
    snapshots: BTreeMap<ObjectId, EditedObject>,
}

impl CompiledSave {
    /// Temporary ids the response must answer with permanent ids.
    pub fn temporary_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.request.added.iter().map(|object| object.id)
    }

    /// Whether applying the response changes anything locally.
    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.unlinked.is_empty() && self.discarded.is_empty()
    }

    /// Pre-save ids whose session still equals the compiled snapshot.
    fn untouched_sessions(&self, sessions: &EditedObjectStore) -> BTreeSet<ObjectId> {
        self.snapshots
            .iter()
            .filter(|(id, snapshot)| sessions.get(**id) == Some(*snapshot))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Compiles the save of `root_id`.
pub fn compile_save(
    root_id: ObjectId,
    sessions: &EditedObjectStore,
    objects: &ObjectStore,
    config: &EditorConfig,
) -> Result<CompiledSave, SaveError> {
    let root = sessions
        .get(root_id)
        .ok_or(SaveError::SessionNotFound(root_id))?;
    validate_session(root, config).map_err(|error| SaveError::Validation {
        object_id: root_id,
        error,
    })?;

    let mut compiled = CompiledSave {
        request_id: Uuid::new_v4(),
        root_id,
        request: UpsertRequest::default(),
        unlinked: Vec::new(),
        discarded: Vec::new(),
        snapshots: BTreeMap::new(),
    };

    if !is_permanent_id(root_id) {
        compiled.request.added.push(to_upsert(root_id, root));
    } else if attributes_changed(root_id, root, objects) {
        compiled.request.updated.push(to_upsert(root_id, root));
    }

    if root.is_composite() {
        let mut surviving: BTreeMap<ObjectId, SubobjectLink> = BTreeMap::new();
        let grid = ColumnGrid::from_links(&root.composite.subobjects);
        for (child_id, _, _) in grid.positions() {
            let Some(link) = root.composite.subobjects.get(&child_id) else {
                continue;
            };
            match link.delete_mode {
                DeleteMode::Full if is_permanent_id(child_id) => {
                    compiled.request.deleted_object_ids.push(child_id);
                }
                DeleteMode::Full => compiled.discarded.push(child_id),
                DeleteMode::SubobjectOnly => compiled.unlinked.push(child_id),
                DeleteMode::None => {
                    compile_child(child_id, sessions, objects, config, &mut compiled)?;
                    surviving.insert(child_id, link.clone());
                }
            }
        }

        let mut records: Vec<SubobjectRecord> = surviving
            .iter()
            .map(|(child_id, link)| link.to_record(*child_id))
            .collect();
        ColumnGrid::from_links(&surviving).write_records(&mut records);
        let previous = objects
            .get(root_id)
            .map(|object| object.subobjects())
            .unwrap_or_default();
        let emitted = CompositeLayout {
            parent_id: root_id,
            subobjects: records,
        };
        let repositioned = emitted.changed_from(previous).len();
        if !is_permanent_id(root_id)
            || repositioned > 0
            || emitted.subobjects.len() != previous.len()
        {
            debug!(
                "event=save_compile module=save_compiler status=layout root_id={} links={} repositioned={}",
                root_id,
                emitted.subobjects.len(),
                repositioned
            );
            compiled.request.composite_layouts.push(emitted);
        }
    }

    compiled.snapshots = compiled
        .request
        .added
        .iter()
        .chain(compiled.request.updated.iter())
        .map(|object| object.id)
        .chain(std::iter::once(root_id))
        .filter_map(|id| sessions.get(id).map(|session| (id, session.clone())))
        .collect();

    debug!(
        "event=save_compile module=save_compiler status=ok request_id={} root_id={} added={} updated={} layouts={} deleted={} unlinked={} discarded={}",
        compiled.request_id,
        root_id,
        compiled.request.added.len(),
        compiled.request.updated.len(),
        compiled.request.composite_layouts.len(),
        compiled.request.deleted_object_ids.len(),
        compiled.unlinked.len(),
        compiled.discarded.len()
    );
    Ok(compiled)
}

fn compile_child(
    child_id: ObjectId,
    sessions: &EditedObjectStore,
    objects: &ObjectStore,
    config: &EditorConfig,
    compiled: &mut CompiledSave,
) -> Result<(), SaveError> {
    let persisted_type = objects.get(child_id).map(|object| object.object_type());
    let Some(child) = sessions.get(child_id) else {
        if is_permanent_id(child_id) {
            return Ok(());
        }
        return Err(SaveError::SessionNotFound(child_id));
    };

    if child.is_composite() || persisted_type == Some(ObjectType::Composite) {
        if is_permanent_id(child_id) {
            return Ok(());
        }
        return Err(SaveError::Validation {
            object_id: child_id,
            error: ValidationError::UnsavedNestedComposite(child_id),
        });
    }

    if is_permanent_id(child_id) && !attributes_changed(child_id, child, objects) {
        return Ok(());
    }
    validate_session(child, config).map_err(|error| SaveError::Validation {
        object_id: child_id,
        error,
    })?;
    if is_permanent_id(child_id) {
        compiled.request.updated.push(to_upsert(child_id, child));
    } else {
        compiled.request.added.push(to_upsert(child_id, child));
    }
    Ok(())
}

fn attributes_changed(id: ObjectId, session: &EditedObject, objects: &ObjectStore) -> bool {
    match seed_session(id, objects) {
        Some(seed) => {
            session.attributes != seed.attributes || session.type_data() != seed.type_data()
        }
        None => true,
    }
}

fn to_upsert(id: ObjectId, session: &EditedObject) -> ObjectUpsert {
    ObjectUpsert {
        id,
        attributes: session.attributes.clone(),
        type_data: session.type_data(),
    }
}

/// Applies a successful response. Returns the temporary-to-permanent id map.
pub fn apply_save_response(
    compiled: &CompiledSave,
    response: &UpsertResponse,
    sessions: &mut EditedObjectStore,
    objects: &mut ObjectStore,
) -> Result<BTreeMap<ObjectId, ObjectId>, BackendError> {
    let answered: BTreeMap<ObjectId, ObjectId> = response
        .saved
        .iter()
        .filter_map(|saved| saved.temp_id.map(|temp_id| (temp_id, saved.object.id)))
        .collect();
    let mut id_map = BTreeMap::new();
    for temp_id in compiled.temporary_ids() {
        let permanent_id = answered.get(&temp_id).copied().ok_or_else(|| {
            BackendError::InvalidData(format!("no permanent id returned for {temp_id}"))
        })?;
        if !is_permanent_id(permanent_id) {
            return Err(BackendError::InvalidData(format!(
                "non-permanent id {permanent_id} returned for {temp_id}"
            )));
        }
        id_map.insert(temp_id, permanent_id);
    }
    let untouched = compiled.untouched_sessions(sessions);

    for id in &compiled.request.deleted_object_ids {
        objects.remove(*id);
        objects.remove_child_references(*id);
        sessions.remove(*id);
        sessions.remove_links_to(*id);
    }
    for id in &compiled.discarded {
        sessions.remove(*id);
        sessions.remove_links_to(*id);
    }
    if let Some(root) = sessions.get_mut(compiled.root_id) {
        for child_id in &compiled.unlinked {
            layout::remove_subobject(&mut root.composite, *child_id);
        }
    }
    for child_id in &compiled.unlinked {
        if !is_permanent_id(*child_id) && !sessions.is_referenced(*child_id) {
            sessions.remove(*child_id);
        }
    }

    for saved in &response.saved {
        objects.insert(saved.object.clone());
    }
    sessions.rekey(&id_map);

    for saved in &response.saved {
        let id = saved.object.id;
        let compiled_id = saved.temp_id.unwrap_or(id);
        if untouched.contains(&compiled_id) && sessions.contains(id) {
            sessions.insert(id, EditedObject::from_persisted(&saved.object));
        }
    }

    Ok(id_map)
}
