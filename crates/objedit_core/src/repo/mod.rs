//! Persistence capability and its implementations.
//!
//! # Responsibility
//! - Define the backend contract the edit engine fetches from and saves to.
//! - Isolate SQLite query details from the engine.
//!
//! # Invariants
//! - Backend errors use one taxonomy (`BackendError`) for every implementation.
//! - Deleting an unknown id is reported, never raised.

pub mod object_repo;
