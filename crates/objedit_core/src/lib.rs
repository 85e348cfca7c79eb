//! Edit-session engine for link, markdown, to-do list and composite objects.
//! This crate is the single source of truth for editing invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use config::EditorConfig;
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::object::{
    is_permanent_id, CompositeData, CompositeDisplayMode, CompositeSettings, LinkData,
    MarkdownData, ObjectAttributes, ObjectData, ObjectId, ObjectType, PersistedObject,
    SubobjectRecord, ToDoItem, ToDoListData, ToDoSortType, TriState, TypeData,
    SCRATCH_OBJECT_ID,
};
pub use model::session::{
    CompositeBlock, CompositePatch, DeleteMode, EditedObject, LinkPatch, MarkdownPatch,
    ObjectPatch, SubobjectLink, SubobjectPatch, ToDoListPatch,
};
pub use model::validation::ValidationError;
pub use repo::object_repo::{
    BackendError, BackendResult, CompositeLayout, DeleteResponse, ObjectBackend, ObjectIdPage,
    ObjectListQuery, ObjectUpsert, SavedObject, SqliteObjectRepository, UpsertRequest,
    UpsertResponse,
};
pub use service::editor::{
    AttachOutcome, AttachStart, AttachTicket, EditorError, ObjectEditor, SaveReport, SaveStart,
    SaveTicket,
};
pub use service::layout::{ColumnGrid, MoveOutcome, MoveTarget};
pub use service::reset::ResetReport;
pub use service::save_compiler::{CompiledSave, SaveError};
pub use store::edited_store::{EditedObjectStore, SubobjectsPublished};
pub use store::object_store::ObjectStore;
pub use store::SessionError;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
