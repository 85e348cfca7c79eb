//! Reset engine.
//!
//! # Responsibility
//! - Revert one session to its persisted values (type defaults when new).
//! - Optionally cascade one level into direct children.
//!
//! # Invariants
//! - Without cascade the composite child set and every child session are
//!   left exactly as they were.
//! - With cascade, new unmodified children vanish together with their
//!   sessions, persisted non-composite children revert, composite children
//!   are never touched.
//! - The resulting layout is dense.

use crate::model::object::{is_permanent_id, ObjectId, ObjectType};
use crate::model::session::{DeleteMode, SubobjectLink};
use crate::service::layout::ColumnGrid;
use crate::store::edited_store::{seed_session, EditedObjectStore};
use crate::store::object_store::ObjectStore;
use crate::store::{SessionError, StoreResult};
use log::debug;
use std::collections::BTreeMap;

/// Sort-key offset placing surviving extra links after persisted ones.
const EXTRA_LINK_SORT_OFFSET: u64 = 1 << 32;

/// What a reset changed besides the target session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    /// New, unmodified children dropped together with their links.
    pub removed_sessions: Vec<ObjectId>,
    /// Persisted children reverted to their stored values.
    pub reset_children: Vec<ObjectId>,
}

/// Resets session `id`, cascading into direct children when asked.
pub fn reset_session(
    id: ObjectId,
    include_subobjects: bool,
    sessions: &mut EditedObjectStore,
    objects: &ObjectStore,
) -> StoreResult<ResetReport> {
    if !sessions.contains(id) {
        return Err(SessionError::SessionNotFound(id));
    }
    let mut seed = seed_session(id, objects).ok_or(SessionError::ObjectNotLoaded(id))?;
    let mut report = ResetReport::default();

    let current_links = sessions
        .get(id)
        .map(|session| session.composite.subobjects.clone())
        .unwrap_or_default();

    if include_subobjects {
        let mut extra_links: BTreeMap<ObjectId, SubobjectLink> = BTreeMap::new();
        for (child_id, link) in current_links {
            if is_permanent_id(child_id) {
                if reset_child(child_id, sessions, objects) {
                    report.reset_children.push(child_id);
                }
                if !seed.composite.subobjects.contains_key(&child_id) {
                    extra_links.insert(child_id, link);
                }
                continue;
            }

            let keep = sessions.contains(child_id) && sessions.is_modified(child_id, objects);
            if keep {
                extra_links.insert(
                    child_id,
                    SubobjectLink {
                        delete_mode: DeleteMode::None,
                        ..link
                    },
                );
            } else {
                sessions.remove(child_id);
                report.removed_sessions.push(child_id);
            }
        }
        merge_extra_links(&mut seed.composite.subobjects, extra_links);
    } else {
        seed.composite.subobjects = current_links;
    }

    sessions.insert(id, seed);
    for child_id in &report.removed_sessions {
        sessions.remove_links_to(*child_id);
    }

    debug!(
        "event=session_reset module=reset status=ok object_id={} include_subobjects={} removed={} reset_children={}",
        id,
        include_subobjects,
        report.removed_sessions.len(),
        report.reset_children.len()
    );
    Ok(report)
}

/// Reverts one persisted, non-composite child. Returns whether it changed.
fn reset_child(child_id: ObjectId, sessions: &mut EditedObjectStore, objects: &ObjectStore) -> bool {
    let Some(persisted) = objects.get(child_id) else {
        return false;
    };
    if persisted.object_type() == ObjectType::Composite {
        return false;
    }
    let Some(session) = sessions.get(child_id) else {
        return false;
    };
    if session.is_composite() || !sessions.is_modified(child_id, objects) {
        return false;
    }
    match seed_session(child_id, objects) {
        Some(seed) => {
            sessions.insert(child_id, seed);
            true
        }
        None => false,
    }
}

/// Appends `extra` after the persisted links of the same column, then densifies.
fn merge_extra_links(
    links: &mut BTreeMap<ObjectId, SubobjectLink>,
    extra: BTreeMap<ObjectId, SubobjectLink>,
) {
    if extra.is_empty() {
        return;
    }
    let entries: Vec<(ObjectId, u32, u64)> = links
        .iter()
        .map(|(id, link)| (*id, link.column, u64::from(link.row)))
        .chain(extra.iter().map(|(id, link)| {
            (
                *id,
                link.column,
                EXTRA_LINK_SORT_OFFSET + u64::from(link.row),
            )
        }))
        .collect();
    links.extend(extra);
    ColumnGrid::from_entries(entries).write_links(links);
}
