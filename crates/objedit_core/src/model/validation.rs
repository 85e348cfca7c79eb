//! Save-time validation decisions.
//!
//! # Responsibility
//! - Decide whether one session may be included in a save request.
//!
//! # Invariants
//! - Validation never mutates a session or store.
//! - Only the active type block is validated.

use crate::config::EditorConfig;
use crate::model::object::{ObjectId, ObjectType, MAX_TO_DO_ITEM_INDENT};
use crate::model::session::EditedObject;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([A-Za-z][A-Za-z0-9+.\-]*)://([A-Za-z0-9\-._~%]+|\[[0-9A-Fa-f:.]+\])(:[0-9]{1,5})?([/?#]\S*)?$",
    )
    .expect("valid url regex")
});

/// Local, pre-network validation failure for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name is blank after trim.
    EmptyName,
    /// `actual` counts chars of the trimmed name.
    NameTooLong { max: usize, actual: usize },
    DescriptionTooLong { max: usize, actual: usize },
    /// Link is not a syntactically valid URL with an allowed scheme.
    InvalidUrl,
    EmptyMarkdown,
    EmptyToDoList,
    ToDoItemIndentOutOfRange { index: usize, indent: u8 },
    /// Composite has no child left that is not marked for deletion.
    EmptyComposite,
    /// A new composite child must be saved from its own page first.
    UnsavedNestedComposite(ObjectId),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "object name is required"),
            Self::NameTooLong { max, actual } => {
                write!(f, "object name is too long: {actual} chars, max {max}")
            }
            Self::DescriptionTooLong { max, actual } => {
                write!(f, "object description is too long: {actual} chars, max {max}")
            }
            Self::InvalidUrl => write!(f, "link must be a valid URL"),
            Self::EmptyMarkdown => write!(f, "markdown text is required"),
            Self::EmptyToDoList => write!(f, "to-do list must contain at least one item"),
            Self::ToDoItemIndentOutOfRange { index, indent } => write!(
                f,
                "to-do item {index} has indent {indent}, max {MAX_TO_DO_ITEM_INDENT}"
            ),
            Self::EmptyComposite => {
                write!(f, "composite object must contain at least one subobject")
            }
            Self::UnsavedNestedComposite(id) => write!(
                f,
                "new composite subobject {id} must be saved from its own page first"
            ),
        }
    }
}

impl Error for ValidationError {}

/// Validates one session for inclusion in a save.
///
/// Names are checked in the form the backend stores them: trimmed, with the
/// length limit in chars. Hosts showing a counter should count the same way.
pub fn validate_session(
    session: &EditedObject,
    config: &EditorConfig,
) -> Result<(), ValidationError> {
    let name = session.attributes.name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let name_chars = name.chars().count();
    if name_chars > config.max_name_chars {
        return Err(ValidationError::NameTooLong {
            max: config.max_name_chars,
            actual: name_chars,
        });
    }
    let description_chars = session.attributes.description.chars().count();
    if description_chars > config.max_description_chars {
        return Err(ValidationError::DescriptionTooLong {
            max: config.max_description_chars,
            actual: description_chars,
        });
    }

    match session.object_type() {
        ObjectType::Link => {
            if !is_valid_url(session.link.link.trim(), config) {
                return Err(ValidationError::InvalidUrl);
            }
        }
        ObjectType::Markdown => {
            if session.markdown.raw_text.trim().is_empty() {
                return Err(ValidationError::EmptyMarkdown);
            }
        }
        ObjectType::ToDoList => {
            if session.to_do_list.items.is_empty() {
                return Err(ValidationError::EmptyToDoList);
            }
            if let Some((index, item)) = session
                .to_do_list
                .items
                .iter()
                .enumerate()
                .find(|(_, item)| item.indent > MAX_TO_DO_ITEM_INDENT)
            {
                return Err(ValidationError::ToDoItemIndentOutOfRange {
                    index,
                    indent: item.indent,
                });
            }
        }
        ObjectType::Composite => {
            if session.composite.active_children().next().is_none() {
                return Err(ValidationError::EmptyComposite);
            }
        }
    }
    Ok(())
}

fn is_valid_url(value: &str, config: &EditorConfig) -> bool {
    URL_RE
        .captures(value)
        .and_then(|caps| caps.get(1))
        .is_some_and(|scheme| config.allows_scheme(scheme.as_str()))
}
