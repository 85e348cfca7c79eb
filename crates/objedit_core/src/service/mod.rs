//! Edit-session use-case services.
//!
//! # Responsibility
//! - `layout`: column/row re-flow of composite children.
//! - `save_compiler`: dirty-subtree diff and response application.
//! - `reset`: revert sessions to persisted values.
//! - `editor`: facade the UI layer talks to.

pub mod editor;
pub mod layout;
pub mod reset;
pub mod save_compiler;
