//! Domain model for persisted objects and their edit sessions.
//!
//! # Responsibility
//! - Define persisted records (`object`), working copies (`session`) and
//!   save-time validation decisions (`validation`).
//!
//! # Invariants
//! - Composite edges hold child ids only; objects live in flat id-keyed maps.
//! - Tri-state display settings are stored literally and never resolved here.

pub mod object;
pub mod session;
pub mod validation;
