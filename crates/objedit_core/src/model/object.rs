//! Persisted object records.
//!
//! # Responsibility
//! - Define the last-known-persisted shape of every object kind.
//! - Define identifier semantics shared by stores, engine and backend.
//!
//! # Invariants
//! - `id > 0` is a backend-assigned permanent id.
//! - `id < 0` is a process-local temporary id for unsaved objects.
//! - `id == 0` is the scratch slot for the top-level object being created.
//! - `PersistedObject::data` variant always matches `attributes.object_type`.

use serde::{Deserialize, Serialize};

/// Object identifier. See module docs for sign semantics.
pub type ObjectId = i64;

/// Scratch slot id for the object being created at the top level.
pub const SCRATCH_OBJECT_ID: ObjectId = 0;

/// Returns whether `id` was assigned by the backend.
pub fn is_permanent_id(id: ObjectId) -> bool {
    id > 0
}

/// Object kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    #[default]
    Link,
    Markdown,
    ToDoList,
    Composite,
}

impl ObjectType {
    /// Stable storage/wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Markdown => "markdown",
            Self::ToDoList => "to_do_list",
            Self::Composite => "composite",
        }
    }

    /// Parses the storage/wire string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "link" => Some(Self::Link),
            "markdown" => Some(Self::Markdown),
            "to_do_list" => Some(Self::ToDoList),
            "composite" => Some(Self::Composite),
            _ => None,
        }
    }
}

/// Literal three-way setting; `Inherit` is resolved by renderers, never here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    Yes,
    No,
    #[default]
    Inherit,
}

impl TriState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Inherit => "inherit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "inherit" => Some(Self::Inherit),
            _ => None,
        }
    }
}

/// Editable attributes common to every object kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    pub object_type: ObjectType,
    pub name: String,
    pub description: String,
    pub is_published: bool,
    pub show_description: bool,
    pub display_in_feed: bool,
    /// Epoch milliseconds used to order the feed. `None` falls back to `modified_at`.
    pub feed_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkData {
    pub link: String,
    pub show_description_as_link: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkdownData {
    pub raw_text: String,
}

/// Ordering applied when rendering to-do items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToDoSortType {
    #[default]
    Default,
    /// Uncompleted items first.
    State,
}

/// Maximum nesting depth of a to-do item.
pub const MAX_TO_DO_ITEM_INDENT: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToDoItem {
    pub item_text: String,
    pub commentary: String,
    /// `0..=MAX_TO_DO_ITEM_INDENT`.
    pub indent: u8,
    pub is_completed: bool,
    pub is_expanded: bool,
}

impl ToDoItem {
    pub fn new(item_text: impl Into<String>) -> Self {
        Self {
            item_text: item_text.into(),
            commentary: String::new(),
            indent: 0,
            is_completed: false,
            is_expanded: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToDoListData {
    pub sort_type: ToDoSortType,
    pub items: Vec<ToDoItem>,
}

/// How a composite renders its children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeDisplayMode {
    #[default]
    Basic,
    GroupedLinks,
    Multicolumn,
    Chapters,
}

/// Composite settings without the child layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeSettings {
    pub display_mode: CompositeDisplayMode,
    pub numerate_chapters: bool,
}

/// One persisted (or to-be-persisted) composite edge.
///
/// In upsert requests `child_id` may be a temporary id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubobjectRecord {
    pub child_id: ObjectId,
    pub column: u32,
    pub row: u32,
    pub is_expanded: bool,
    pub show_description_composite: TriState,
    pub show_description_as_link_composite: TriState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeData {
    pub settings: CompositeSettings,
    /// Sorted by `(column, row)`; positions are dense.
    pub subobjects: Vec<SubobjectRecord>,
}

/// Type-specific data of a persisted object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectData {
    Link(LinkData),
    Markdown(MarkdownData),
    ToDoList(ToDoListData),
    Composite(CompositeData),
}

impl ObjectData {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Link(_) => ObjectType::Link,
            Self::Markdown(_) => ObjectType::Markdown,
            Self::ToDoList(_) => ObjectType::ToDoList,
            Self::Composite(_) => ObjectType::Composite,
        }
    }
}

/// Type-specific payload sent with an upsert. Composite children travel
/// separately as a layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeData {
    Link(LinkData),
    Markdown(MarkdownData),
    ToDoList(ToDoListData),
    Composite(CompositeSettings),
}

impl TypeData {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Link(_) => ObjectType::Link,
            Self::Markdown(_) => ObjectType::Markdown,
            Self::ToDoList(_) => ObjectType::ToDoList,
            Self::Composite(_) => ObjectType::Composite,
        }
    }
}

/// Object Store entry: the last-known-persisted copy of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedObject {
    pub id: ObjectId,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub modified_at: i64,
    pub attributes: ObjectAttributes,
    pub data: ObjectData,
}

impl PersistedObject {
    pub fn object_type(&self) -> ObjectType {
        self.attributes.object_type
    }

    /// Child layout for composites, empty for every other kind.
    pub fn subobjects(&self) -> &[SubobjectRecord] {
        match &self.data {
            ObjectData::Composite(composite) => composite.subobjects.as_slice(),
            _ => &[],
        }
    }

    pub(crate) fn subobjects_mut(&mut self) -> Option<&mut Vec<SubobjectRecord>> {
        match &mut self.data {
            ObjectData::Composite(composite) => Some(&mut composite.subobjects),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{is_permanent_id, ObjectType, TriState, SCRATCH_OBJECT_ID};

    #[test]
    fn id_sign_decides_permanence() {
        assert!(is_permanent_id(42));
        assert!(!is_permanent_id(SCRATCH_OBJECT_ID));
        assert!(!is_permanent_id(-7));
    }

    #[test]
    fn storage_strings_parse_back() {
        for kind in [
            ObjectType::Link,
            ObjectType::Markdown,
            ObjectType::ToDoList,
            ObjectType::Composite,
        ] {
            assert_eq!(ObjectType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TriState::parse("inherit"), Some(TriState::Inherit));
        assert_eq!(TriState::parse("maybe"), None);
    }
}
