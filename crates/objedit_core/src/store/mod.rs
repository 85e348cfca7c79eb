//! In-memory arenas for persisted objects and edit sessions.
//!
//! # Responsibility
//! - `object_store`: last-known-persisted records.
//! - `id_allocator`: temporary ids for unsaved objects.
//! - `edited_store`: one mutable session per open id.
//!
//! # Invariants
//! - Both stores are flat maps keyed by id; composite edges hold ids only.
//! - Store mutations are synchronous and complete before returning.

use crate::model::object::ObjectId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod edited_store;
pub mod id_allocator;
pub mod object_store;

pub type StoreResult<T> = Result<T, SessionError>;

/// Session store misuse that cannot be ignored silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No session is open for the id.
    SessionNotFound(ObjectId),
    /// Permanent id absent from the Object Store; load it first.
    ObjectNotLoaded(ObjectId),
    /// Target session is not a composite.
    NotComposite(ObjectId),
    /// A composite cannot contain itself.
    SelfReference(ObjectId),
    SubobjectNotFound {
        parent_id: ObjectId,
        child_id: ObjectId,
    },
}

impl Display for SessionError {
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
        }
    }
}

impl Error for SessionError {}
