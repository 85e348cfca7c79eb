//! Temporary identifier allocation.
//!
//! # Invariants
//! - Issued ids are strictly negative and never reused within one allocator.
//! - `0` is never issued; it is the scratch slot.

use crate::model::object::ObjectId;

/// Issues session-scoped temporary ids `-1, -2, ...`.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: ObjectId,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: -1 }
    }

    /// Returns the next unused temporary id.
    pub fn allocate(&mut self) -> ObjectId {
        let id = self.next;
        self.next -= 1;
        id
    }
}
