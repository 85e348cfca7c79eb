//! Edit session model.
//!
//! # Responsibility
//! - Define the mutable working copy (`EditedObject`) held per open id.
//! - Define shallow/deep partial updates applied by the session store.
//!
//! # Invariants
//! - A session carries a block for every object kind so switching
//!   `object_type` never drops data; only the active block is persisted.
//! - `SubobjectLink` holds ids only, never embedded child copies.
//! - `SubobjectLink::fetch_error` is runtime-only and ignored by equality.

use crate::model::object::{
    CompositeDisplayMode, CompositeSettings, LinkData, MarkdownData, ObjectAttributes, ObjectData,
    ObjectId, ObjectType, PersistedObject, SubobjectRecord, ToDoItem, ToDoListData, ToDoSortType,
    TriState, TypeData,
};
use std::collections::BTreeMap;

/// Pending deletion of one composite child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteMode {
    #[default]
    None,
    /// Unlink from this composite only.
    SubobjectOnly,
    /// Delete the underlying object everywhere.
    Full,
}

/// Edge from a composite session to one direct child, keyed by child id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubobjectLink {
    pub column: u32,
    pub row: u32,
    pub is_expanded: bool,
    pub delete_mode: DeleteMode,
    pub show_description_composite: TriState,
    /// Meaningful for link children only.
    pub show_description_as_link_composite: TriState,
    /// Set when the child could not be loaded.
    pub fetch_error: Option<String>,
}

impl SubobjectLink {
    pub fn at(column: u32, row: u32) -> Self {
        Self {
            column,
            row,
            is_expanded: true,
            delete_mode: DeleteMode::None,
            show_description_composite: TriState::Inherit,
            show_description_as_link_composite: TriState::Inherit,
            fetch_error: None,
        }
    }

    pub fn from_record(record: &SubobjectRecord) -> Self {
        Self {
            column: record.column,
            row: record.row,
            is_expanded: record.is_expanded,
            delete_mode: DeleteMode::None,
            show_description_composite: record.show_description_composite,
            show_description_as_link_composite: record.show_description_as_link_composite,
            fetch_error: None,
        }
    }

    pub fn to_record(&self, child_id: ObjectId) -> SubobjectRecord {
        SubobjectRecord {
            child_id,
            column: self.column,
            row: self.row,
            is_expanded: self.is_expanded,
            show_description_composite: self.show_description_composite,
            show_description_as_link_composite: self.show_description_as_link_composite,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_mode != DeleteMode::None
    }

    /// Equality ignoring runtime-only state.
    pub fn same_state(&self, other: &Self) -> bool {
        self.column == other.column
            && self.row == other.row
            && self.is_expanded == other.is_expanded
            && self.delete_mode == other.delete_mode
            && self.show_description_composite == other.show_description_composite
            && self.show_description_as_link_composite == other.show_description_as_link_composite
    }
}

/// Composite working copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeBlock {
    pub display_mode: CompositeDisplayMode,
    pub numerate_chapters: bool,
    pub subobjects: BTreeMap<ObjectId, SubobjectLink>,
}

impl CompositeBlock {
    pub fn settings(&self) -> CompositeSettings {
        CompositeSettings {
            display_mode: self.display_mode,
            numerate_chapters: self.numerate_chapters,
        }
    }

    /// Ids of children not marked for deletion, in key order.
    pub fn active_children(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.subobjects
            .iter()
            .filter(|(_, link)| !link.is_deleted())
            .map(|(id, _)| *id)
    }

    fn same_links(&self, other: &Self) -> bool {
        self.subobjects.len() == other.subobjects.len()
            && self
                .subobjects
                .iter()
                .zip(other.subobjects.iter())
                .all(|((left_id, left), (right_id, right))| {
                    left_id == right_id && left.same_state(right)
                })
    }
}

/// Session: the live, possibly-unsaved working copy of one object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditedObject {
    /// Epoch milliseconds, `0` until first save.
    pub created_at: i64,
    /// Epoch milliseconds, `0` until first save.
    pub modified_at: i64,
    pub attributes: ObjectAttributes,
    pub link: LinkData,
    pub markdown: MarkdownData,
    pub to_do_list: ToDoListData,
    pub composite: CompositeBlock,
}

impl EditedObject {
    /// Seeds a session from the persisted record.
    pub fn from_persisted(object: &PersistedObject) -> Self {
        let mut session = Self {
            created_at: object.created_at,
            modified_at: object.modified_at,
            attributes: object.attributes.clone(),
            ..Self::default()
        };
        match &object.data {
            ObjectData::Link(link) => session.link = link.clone(),
            ObjectData::Markdown(markdown) => session.markdown = markdown.clone(),
            ObjectData::ToDoList(to_do_list) => session.to_do_list = to_do_list.clone(),
            ObjectData::Composite(composite) => {
                session.composite.display_mode = composite.settings.display_mode;
                session.composite.numerate_chapters = composite.settings.numerate_chapters;
                session.composite.subobjects = composite
                    .subobjects
                    .iter()
                    .map(|record| (record.child_id, SubobjectLink::from_record(record)))
                    .collect();
            }
        }
        session
    }

    pub fn object_type(&self) -> ObjectType {
        self.attributes.object_type
    }

    pub fn is_composite(&self) -> bool {
        self.attributes.object_type == ObjectType::Composite
    }

    /// Active type block, as sent in upserts.
    pub fn type_data(&self) -> TypeData {
        match self.attributes.object_type {
            ObjectType::Link => TypeData::Link(self.link.clone()),
            ObjectType::Markdown => TypeData::Markdown(self.markdown.clone()),
            ObjectType::ToDoList => TypeData::ToDoList(self.to_do_list.clone()),
            ObjectType::Composite => TypeData::Composite(self.composite.settings()),
        }
    }

    /// Deep equality ignoring runtime-only link state.
    pub fn same_content(&self, other: &Self) -> bool {
        self.same_attributes(other) && self.composite.same_links(&other.composite)
    }

    /// Deep equality of everything except the composite child layout.
    pub fn same_attributes(&self, other: &Self) -> bool {
        self.created_at == other.created_at
            && self.modified_at == other.modified_at
            && self.attributes == other.attributes
            && self.link == other.link
            && self.markdown == other.markdown
            && self.to_do_list == other.to_do_list
            && self.composite.display_mode == other.composite.display_mode
            && self.composite.numerate_chapters == other.composite.numerate_chapters
    }

    /// Merges a partial update; type blocks merge one level deeper.
    pub fn apply_patch(&mut self, patch: ObjectPatch) {
        let attributes = &mut self.attributes;
        if let Some(object_type) = patch.object_type {
            attributes.object_type = object_type;
        }
        if let Some(name) = patch.name {
            attributes.name = name;
        }
        if let Some(description) = patch.description {
            attributes.description = description;
        }
        if let Some(is_published) = patch.is_published {
            attributes.is_published = is_published;
        }
        if let Some(show_description) = patch.show_description {
            attributes.show_description = show_description;
        }
        if let Some(display_in_feed) = patch.display_in_feed {
            attributes.display_in_feed = display_in_feed;
        }
        if let Some(feed_timestamp) = patch.feed_timestamp {
            attributes.feed_timestamp = feed_timestamp;
        }

        if let Some(link) = patch.link {
            if let Some(value) = link.link {
                self.link.link = value;
            }
            if let Some(value) = link.show_description_as_link {
                self.link.show_description_as_link = value;
            }
        }
        if let Some(markdown) = patch.markdown {
            if let Some(value) = markdown.raw_text {
                self.markdown.raw_text = value;
            }
        }
        if let Some(to_do_list) = patch.to_do_list {
            if let Some(value) = to_do_list.sort_type {
                self.to_do_list.sort_type = value;
            }
            if let Some(items) = to_do_list.items {
                self.to_do_list.items = items;
            }
        }
        if let Some(composite) = patch.composite {
            if let Some(value) = composite.display_mode {
                self.composite.display_mode = value;
            }
            if let Some(value) = composite.numerate_chapters {
                self.composite.numerate_chapters = value;
            }
        }
    }
}

/// Partial update of a session. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPatch {
    pub object_type: Option<ObjectType>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_published: Option<bool>,
    pub show_description: Option<bool>,
    pub display_in_feed: Option<bool>,
    pub feed_timestamp: Option<Option<i64>>,
    pub link: Option<LinkPatch>,
    pub markdown: Option<MarkdownPatch>,
    pub to_do_list: Option<ToDoListPatch>,
    pub composite: Option<CompositePatch>,
}

impl ObjectPatch {
    pub fn name(value: impl Into<String>) -> Self {
        Self {
            name: Some(value.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPatch {
    pub link: Option<String>,
    pub show_description_as_link: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkdownPatch {
    pub raw_text: Option<String>,
}

/// `items` replaces the whole item list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToDoListPatch {
    pub sort_type: Option<ToDoSortType>,
    pub items: Option<Vec<ToDoItem>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositePatch {
    pub display_mode: Option<CompositeDisplayMode>,
    pub numerate_chapters: Option<bool>,
}

/// Partial update of one composite edge. Position changes go through moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubobjectPatch {
    pub delete_mode: Option<DeleteMode>,
    pub is_expanded: Option<bool>,
    pub show_description_composite: Option<TriState>,
    pub show_description_as_link_composite: Option<TriState>,
}

#[cfg(test)]
mod tests {
    use super::{EditedObject, LinkPatch, ObjectPatch, SubobjectLink};
    use crate::model::object::ObjectType;

    #[test]
    fn link_patch_merges_one_level_deep() {
        let mut session = EditedObject::default();
        session.link.show_description_as_link = true;

        session.apply_patch(ObjectPatch {
            link: Some(LinkPatch {
                link: Some("https://example.com".to_string()),
                show_description_as_link: None,
            }),
            ..ObjectPatch::default()
        });

        assert_eq!(session.link.link, "https://example.com");
        assert!(session.link.show_description_as_link);
    }

    #[test]
    fn fetch_error_does_not_count_as_content() {
        let mut left = EditedObject::default();
        left.attributes.object_type = ObjectType::Composite;
        left.composite.subobjects.insert(5, SubobjectLink::at(0, 0));
        let mut right = left.clone();
        if let Some(link) = right.composite.subobjects.get_mut(&5) {
            link.fetch_error = Some("object 5 not found".to_string());
        }

        assert!(left.same_content(&right));
        assert_ne!(left, right);
    }
}
