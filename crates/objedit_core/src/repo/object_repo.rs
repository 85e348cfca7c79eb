//! Object persistence capability and SQLite implementation.
//!
//! # Responsibility
//! - Define the abstract backend the edit engine saves to and loads from.
//! - Provide a SQLite-backed implementation over `objects` and
//!   `composite_subobjects`.
//!
//! # Invariants
//! - `upsert_objects` is all-or-nothing: one immediate transaction.
//! - Every temporary id in a request is answered with exactly one permanent id.
//! - Composite layouts are stored dense, also after cascaded deletions.
//! - Deleting a missing id is reported in `not_found`, never as an error.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::{ensure_current_schema, DbError};
use crate::model::object::{
    is_permanent_id, CompositeData, CompositeSettings, LinkData, MarkdownData, ObjectAttributes,
    ObjectData, ObjectId, ObjectType, PersistedObject, SubobjectRecord, ToDoListData, TriState,
    TypeData,
};
use crate::service::layout::ColumnGrid;
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

const OBJECT_SELECT_SQL: &str = "SELECT
    id,
    object_type,
    name,
    description,
    is_published,
    show_description,
    display_in_feed,
    feed_timestamp,
    type_data,
    created_at,
    modified_at
FROM objects";

/// Default page size for `list_object_ids`.
pub const OBJECT_LIST_DEFAULT_LIMIT: u32 = 10;
/// Maximum page size for `list_object_ids`.
pub const OBJECT_LIST_LIMIT_MAX: u32 = 100;

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure of a persistence call.
#[derive(Debug)]
pub enum BackendError {
    NotFound(Vec<ObjectId>),
    BadRequest(String),
    ServerError(String),
    /// Server-side re-validation rejected the payload.
    ValidationRejected(String),
    Db(DbError),
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(ids) => {
                let ids = ids
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "objects not found: {ids}")
            }
            Self::BadRequest(message) => write!(f, "bad request: {message}"),
            Self::ServerError(message) => write!(f, "server error: {message}"),
            Self::ValidationRejected(message) => write!(f, "validation rejected: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted object data: {message}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for BackendError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}

/// Filter and pagination for `list_object_ids`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectListQuery {
    pub object_type: Option<ObjectType>,
    pub is_published: Option<bool>,
    /// Defaults to 10 and clamps to 100.
    pub limit: Option<u32>,
    pub offset: u32,
}

/// One page of ids ordered by `modified_at DESC, id DESC`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectIdPage {
    pub ids: Vec<ObjectId>,
    /// Total matches ignoring pagination.
    pub total: u64,
}

/// Object attributes and active type data to create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectUpsert {
    /// Temporary id in `added`, permanent id in `updated`.
    pub id: ObjectId,
    pub attributes: ObjectAttributes,
    pub type_data: TypeData,
}

/// Full resulting child layout of one composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeLayout {
    /// Temporary or permanent id.
    pub parent_id: ObjectId,
    pub subobjects: Vec<SubobjectRecord>,
}

impl CompositeLayout {
    /// Records that differ from (or are absent in) `previous`.
    pub fn changed_from(&self, previous: &[SubobjectRecord]) -> Vec<SubobjectRecord> {
        let previous: BTreeMap<ObjectId, &SubobjectRecord> = previous
            .iter()
            .map(|record| (record.child_id, record))
            .collect();
        self.subobjects
            .iter()
            .filter(|record| previous.get(&record.child_id) != Some(record))
            .copied()
            .collect()
    }
}

/// One batched save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertRequest {
    pub added: Vec<ObjectUpsert>,
    pub updated: Vec<ObjectUpsert>,
    pub deleted_object_ids: Vec<ObjectId>,
    pub composite_layouts: Vec<CompositeLayout>,
}

impl UpsertRequest {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.deleted_object_ids.is_empty()
            && self.composite_layouts.is_empty()
    }
}

/// A record written by an upsert, correlated to its temporary id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedObject {
    pub temp_id: Option<ObjectId>,
    pub object: PersistedObject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResponse {
    pub saved: Vec<SavedObject>,
    pub deleted: Vec<ObjectId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: Vec<ObjectId>,
    pub not_found: Vec<ObjectId>,
}

/// Persistence capability consumed by the edit engine.
pub trait ObjectBackend {
    /// Returns the records found; missing ids are absent from the result.
    fn fetch_objects(&self, ids: &[ObjectId]) -> BackendResult<Vec<PersistedObject>>;
    fn list_object_ids(&self, query: &ObjectListQuery) -> BackendResult<ObjectIdPage>;
    fn upsert_objects(&self, request: &UpsertRequest) -> BackendResult<UpsertResponse>;
    fn delete_objects(&self, ids: &[ObjectId]) -> BackendResult<DeleteResponse>;
}

impl<B: ObjectBackend + ?Sized> ObjectBackend for &B {
    fn fetch_objects(&self, ids: &[ObjectId]) -> BackendResult<Vec<PersistedObject>> {
        (**self).fetch_objects(ids)
    }

    fn list_object_ids(&self, query: &ObjectListQuery) -> BackendResult<ObjectIdPage> {
        (**self).list_object_ids(query)
    }

    fn upsert_objects(&self, request: &UpsertRequest) -> BackendResult<UpsertResponse> {
        (**self).upsert_objects(request)
    }

    fn delete_objects(&self, ids: &[ObjectId]) -> BackendResult<DeleteResponse> {
        (**self).delete_objects(ids)
    }
}

/// Normalizes a page size to `1..=OBJECT_LIST_LIMIT_MAX`.
pub fn normalize_list_limit(limit: Option<u32>) -> u32 {
    match limit {
        None | Some(0) => OBJECT_LIST_DEFAULT_LIMIT,
        Some(value) => value.min(OBJECT_LIST_LIMIT_MAX),
    }
}

/// SQLite-backed object repository.
pub struct SqliteObjectRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteObjectRepository<'conn> {
    /// Wraps a connection opened through `db::open_db*`.
    pub fn try_new(conn: &'conn Connection) -> BackendResult<Self> {
        ensure_current_schema(conn)?;
        Ok(Self { conn })
    }
}

impl ObjectBackend for SqliteObjectRepository<'_> {
    fn fetch_objects(&self, ids: &[ObjectId]) -> BackendResult<Vec<PersistedObject>> {
        let mut seen = BTreeSet::new();
        let mut objects = Vec::new();
        for id in ids.iter().copied().filter(|id| seen.insert(*id)) {
            if let Some(object) = load_object(self.conn, id)? {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    fn list_object_ids(&self, query: &ObjectListQuery) -> BackendResult<ObjectIdPage> {
        let mut where_sql = String::from(" WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();
        if let Some(kind) = query.object_type {
            where_sql.push_str(" AND object_type = ?");
            bind_values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(is_published) = query.is_published {
            where_sql.push_str(" AND is_published = ?");
            bind_values.push(Value::Integer(bool_to_int(is_published)));
        }

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM objects{where_sql};"),
            params_from_iter(bind_values.iter()),
            |row| row.get(0),
        )?;

        bind_values.push(Value::Integer(i64::from(normalize_list_limit(query.limit))));
        bind_values.push(Value::Integer(i64::from(query.offset)));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM objects{where_sql} ORDER BY modified_at DESC, id DESC LIMIT ? OFFSET ?;"
        ))?;
        let ids = stmt
            .query_map(params_from_iter(bind_values.iter()), |row| row.get(0))?
            .collect::<Result<Vec<ObjectId>, _>>()?;

        Ok(ObjectIdPage {
            ids,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    fn upsert_objects(&self, request: &UpsertRequest) -> BackendResult<UpsertResponse> {
        for object in request.added.iter().chain(request.updated.iter()) {
            check_upsert(object)?;
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut id_map: BTreeMap<ObjectId, ObjectId> = BTreeMap::new();
        let mut touched: Vec<(Option<ObjectId>, ObjectId)> = Vec::new();

        for object in &request.added {
            if is_permanent_id(object.id) || id_map.contains_key(&object.id) {
                return Err(BackendError::BadRequest(format!(
                    "added object must carry a unique temporary id, got {}",
                    object.id
                )));
            }
            let attributes = &object.attributes;
            tx.execute(
                "INSERT INTO objects (
                    object_type,
                    name,
                    description,
                    is_published,
                    show_description,
                    display_in_feed,
                    feed_timestamp,
                    type_data
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    attributes.object_type.as_str(),
                    attributes.name.trim(),
                    attributes.description.as_str(),
                    bool_to_int(attributes.is_published),
                    bool_to_int(attributes.show_description),
                    bool_to_int(attributes.display_in_feed),
                    attributes.feed_timestamp,
                    encode_type_data(&object.type_data)?,
                ],
            )?;
            let permanent_id = tx.last_insert_rowid();
            id_map.insert(object.id, permanent_id);
            touched.push((Some(object.id), permanent_id));
        }

        for object in &request.updated {
            if !is_permanent_id(object.id) {
                return Err(BackendError::BadRequest(format!(
                    "updated object must carry a permanent id, got {}",
                    object.id
                )));
            }
            let attributes = &object.attributes;
            let changed = tx.execute(
                "UPDATE objects
                 SET
                    object_type = ?2,
                    name = ?3,
                    description = ?4,
                    is_published = ?5,
                    show_description = ?6,
                    display_in_feed = ?7,
                    feed_timestamp = ?8,
                    type_data = ?9,
                    modified_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                params![
                    object.id,
                    attributes.object_type.as_str(),
                    attributes.name.trim(),
                    attributes.description.as_str(),
                    bool_to_int(attributes.is_published),
                    bool_to_int(attributes.show_description),
                    bool_to_int(attributes.display_in_feed),
                    attributes.feed_timestamp,
                    encode_type_data(&object.type_data)?,
                ],
            )?;
            if changed == 0 {
                return Err(BackendError::NotFound(vec![object.id]));
            }
            if object.attributes.object_type != ObjectType::Composite {
                tx.execute(
                    "DELETE FROM composite_subobjects WHERE parent_id = ?1;",
                    [object.id],
                )?;
            }
            touched.push((None, object.id));
        }

        for layout in &request.composite_layouts {
            let parent_id = resolve_id(layout.parent_id, &id_map)?;
            match object_type_of(&tx, parent_id)? {
                None => return Err(BackendError::NotFound(vec![parent_id])),
                Some(ObjectType::Composite) => {}
                Some(_) => {
                    return Err(BackendError::BadRequest(format!(
                        "layout parent {parent_id} is not a composite"
                    )))
                }
            }

            let mut records = Vec::with_capacity(layout.subobjects.len());
            for record in &layout.subobjects {
                let child_id = resolve_id(record.child_id, &id_map)?;
                if child_id == parent_id {
                    return Err(BackendError::BadRequest(format!(
                        "composite {parent_id} cannot contain itself"
                    )));
                }
                if object_type_of(&tx, child_id)?.is_none() {
                    return Err(BackendError::BadRequest(format!(
                        "subobject {child_id} does not exist"
                    )));
                }
                records.push(SubobjectRecord {
                    child_id,
                    ..*record
                });
            }
            replace_layout(&tx, parent_id, records)?;
            tx.execute(
                "UPDATE objects
                 SET modified_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                [parent_id],
            )?;
            if !touched.iter().any(|(_, id)| *id == parent_id) {
                touched.push((None, parent_id));
            }
        }

        let mut deleted = Vec::new();
        for id in &request.deleted_object_ids {
            if delete_object(&tx, *id)? {
                deleted.push(*id);
            }
            touched.retain(|(_, touched_id)| touched_id != id);
        }

        let mut saved = Vec::with_capacity(touched.len());
        for (temp_id, id) in touched {
            let object = load_object(&tx, id)?.ok_or_else(|| {
                BackendError::ServerError(format!("object {id} missing after upsert"))
            })?;
            saved.push(SavedObject { temp_id, object });
        }
        tx.commit()?;

        Ok(UpsertResponse { saved, deleted })
    }

    fn delete_objects(&self, ids: &[ObjectId]) -> BackendResult<DeleteResponse> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut response = DeleteResponse::default();
        for id in ids {
            if delete_object(&tx, *id)? {
                response.deleted.push(*id);
            } else {
                response.not_found.push(*id);
            }
        }
        tx.commit()?;
        Ok(response)
    }
}

fn check_upsert(object: &ObjectUpsert) -> BackendResult<()> {
    if object.attributes.name.trim().is_empty() {
        return Err(BackendError::ValidationRejected(format!(
            "object {}: name must not be empty",
            object.id
        )));
    }
    if object.type_data.object_type() != object.attributes.object_type {
        return Err(BackendError::BadRequest(format!(
            "object {}: type data does not match object type `{}`",
            object.id,
            object.attributes.object_type.as_str()
        )));
    }
    Ok(())
}

fn resolve_id(id: ObjectId, id_map: &BTreeMap<ObjectId, ObjectId>) -> BackendResult<ObjectId> {
    if is_permanent_id(id) {
        return Ok(id);
    }
    id_map
        .get(&id)
        .copied()
        .ok_or_else(|| BackendError::BadRequest(format!("unknown temporary id {id}")))
}

fn object_type_of(conn: &Connection, id: ObjectId) -> BackendResult<Option<ObjectType>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT object_type FROM objects WHERE id = ?1;",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    value
        .map(|text| parse_object_type(&text))
        .transpose()
}

/// Deletes one object and re-densifies the composites that contained it.
fn delete_object(conn: &Connection, id: ObjectId) -> BackendResult<bool> {
    let mut stmt =
        conn.prepare("SELECT parent_id FROM composite_subobjects WHERE child_id = ?1;")?;
    let parents = stmt
        .query_map([id], |row| row.get::<_, ObjectId>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let changed = conn.execute("DELETE FROM objects WHERE id = ?1;", [id])?;
    for parent_id in parents {
        let records = load_subobjects(conn, parent_id)?;
        replace_layout(conn, parent_id, records)?;
    }
    Ok(changed > 0)
}

fn replace_layout(
    conn: &Connection,
    parent_id: ObjectId,
    mut records: Vec<SubobjectRecord>,
) -> BackendResult<()> {
    ColumnGrid::from_records(&records).write_records(&mut records);
    conn.execute(
        "DELETE FROM composite_subobjects WHERE parent_id = ?1;",
        [parent_id],
    )?;
    for record in records {
        conn.execute(
            "INSERT INTO composite_subobjects (
                parent_id,
                child_id,
                column_no,
                row_no,
                is_expanded,
                show_description_composite,
                show_description_as_link_composite
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                parent_id,
                record.child_id,
                record.column,
                record.row,
                bool_to_int(record.is_expanded),
                record.show_description_composite.as_str(),
                record.show_description_as_link_composite.as_str(),
            ],
        )?;
    }
    Ok(())
}

struct ObjectRow {
    id: ObjectId,
    object_type: String,
    name: String,
    description: String,
    is_published: i64,
    show_description: i64,
    display_in_feed: i64,
    feed_timestamp: Option<i64>,
    type_data: String,
    created_at: i64,
    modified_at: i64,
}

fn load_object(conn: &Connection, id: ObjectId) -> BackendResult<Option<PersistedObject>> {
    let row = conn
        .query_row(
            &format!("{OBJECT_SELECT_SQL} WHERE id = ?1;"),
            [id],
            |row| {
                Ok(ObjectRow {
                    id: row.get("id")?,
                    object_type: row.get("object_type")?,
                    name: row.get("name")?,
                    description: row.get("description")?,
                    is_published: row.get("is_published")?,
                    show_description: row.get("show_description")?,
                    display_in_feed: row.get("display_in_feed")?,
                    feed_timestamp: row.get("feed_timestamp")?,
                    type_data: row.get("type_data")?,
                    created_at: row.get("created_at")?,
                    modified_at: row.get("modified_at")?,
                })
            },
        )
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };

    let object_type = parse_object_type(&row.object_type)?;
    let data = match object_type {
        ObjectType::Link => ObjectData::Link(serde_json::from_str::<LinkData>(&row.type_data)?),
        ObjectType::Markdown => {
            ObjectData::Markdown(serde_json::from_str::<MarkdownData>(&row.type_data)?)
        }
        ObjectType::ToDoList => {
            ObjectData::ToDoList(serde_json::from_str::<ToDoListData>(&row.type_data)?)
        }
        ObjectType::Composite => ObjectData::Composite(CompositeData {
            settings: serde_json::from_str::<CompositeSettings>(&row.type_data)?,
            subobjects: load_subobjects(conn, row.id)?,
        }),
    };

    Ok(Some(PersistedObject {
        id: row.id,
        created_at: row.created_at,
        modified_at: row.modified_at,
        attributes: ObjectAttributes {
            object_type,
            name: row.name,
            description: row.description,
            is_published: parse_bool(row.is_published, "objects.is_published")?,
            show_description: parse_bool(row.show_description, "objects.show_description")?,
            display_in_feed: parse_bool(row.display_in_feed, "objects.display_in_feed")?,
            feed_timestamp: row.feed_timestamp,
        },
        data,
    }))
}

fn load_subobjects(conn: &Connection, parent_id: ObjectId) -> BackendResult<Vec<SubobjectRecord>> {
    let mut stmt = conn.prepare(
        "SELECT
            child_id,
            column_no,
            row_no,
            is_expanded,
            show_description_composite,
            show_description_as_link_composite
         FROM composite_subobjects
         WHERE parent_id = ?1
         ORDER BY column_no ASC, row_no ASC, child_id ASC;",
    )?;
    let mut rows = stmt.query([parent_id])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let column: i64 = row.get("column_no")?;
        let row_no: i64 = row.get("row_no")?;
        let is_expanded: i64 = row.get("is_expanded")?;
        let show_description: String = row.get("show_description_composite")?;
        let show_as_link: String = row.get("show_description_as_link_composite")?;
        records.push(SubobjectRecord {
            child_id: row.get("child_id")?,
            column: parse_position(column, "composite_subobjects.column_no")?,
            row: parse_position(row_no, "composite_subobjects.row_no")?,
            is_expanded: parse_bool(is_expanded, "composite_subobjects.is_expanded")?,
            show_description_composite: parse_tri_state(&show_description)?,
            show_description_as_link_composite: parse_tri_state(&show_as_link)?,
        });
    }
    Ok(records)
}

fn encode_type_data(type_data: &TypeData) -> BackendResult<String> {
    let text = match type_data {
        TypeData::Link(link) => serde_json::to_string(link)?,
        TypeData::Markdown(markdown) => serde_json::to_string(markdown)?,
        TypeData::ToDoList(to_do_list) => serde_json::to_string(to_do_list)?,
        TypeData::Composite(settings) => serde_json::to_string(settings)?,
    };
    Ok(text)
}

fn parse_object_type(value: &str) -> BackendResult<ObjectType> {
    ObjectType::parse(value).ok_or_else(|| {
        BackendError::InvalidData(format!("invalid object type `{value}` in objects.object_type"))
    })
}

fn parse_tri_state(value: &str) -> BackendResult<TriState> {
    TriState::parse(value).ok_or_else(|| {
        BackendError::InvalidData(format!(
            "invalid tri-state `{value}` in composite_subobjects"
        ))
    })
}

fn parse_bool(value: i64, column: &'static str) -> BackendResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(BackendError::InvalidData(format!(
            "invalid boolean `{other}` in {column}"
        ))),
    }
}

fn parse_position(value: i64, column: &'static str) -> BackendResult<u32> {
    u32::try_from(value).map_err(|_| {
        BackendError::InvalidData(format!("invalid position `{value}` in {column}"))
    })
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
