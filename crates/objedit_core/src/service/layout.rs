//! Composite layout engine.
//!
//! # Responsibility
//! - View one composite's direct children as ordered columns of ordered ids.
//! - Re-flow positions for move commands and re-densify after removals.
//!
//! # Invariants
//! - Rows within a column are exactly `0..n-1`.
//! - Columns with members are exactly `0..m-1`; empty columns are dropped.
//! - Rejected or no-op moves never touch the composite.
//! - `is_expanded` and other card metadata are never changed by moves.

use crate::model::object::{ObjectId, SubobjectRecord};
use crate::model::session::{CompositeBlock, SubobjectLink};
use log::debug;
use std::collections::BTreeMap;

/// Drop target of a move command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveTarget {
    /// Take the target card's position, pushing it and later cards down.
    OntoCard(ObjectId),
    /// Append at the foot of an existing column.
    OntoColumnEnd(u32),
    /// Open a new column immediately left of the given one.
    NewColumnLeftOf(u32),
    /// Open a new column immediately right of the given one.
    NewColumnRightOf(u32),
}

/// Result of a move command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// Valid command whose result equals the current layout.
    Unchanged,
    /// Stale or unresolvable reference; nothing was changed.
    Rejected,
}

/// Dense column/row grid of child ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnGrid {
    columns: Vec<Vec<ObjectId>>,
}

impl ColumnGrid {
    /// Builds a grid ordered by `(column, sort_key, id)`, closing any gaps.
    pub fn from_entries(entries: impl IntoIterator<Item = (ObjectId, u32, u64)>) -> Self {
        let mut by_column: BTreeMap<u32, Vec<(u64, ObjectId)>> = BTreeMap::new();
        for (id, column, sort_key) in entries {
            by_column.entry(column).or_default().push((sort_key, id));
        }
        let columns = by_column
            .into_values()
            .map(|mut members| {
                members.sort_unstable();
                members.into_iter().map(|(_, id)| id).collect()
            })
            .collect();
        Self { columns }
    }

    pub fn from_links(links: &BTreeMap<ObjectId, SubobjectLink>) -> Self {
        Self::from_entries(
            links
                .iter()
                .map(|(id, link)| (*id, link.column, u64::from(link.row))),
        )
    }

    pub fn from_records(records: &[SubobjectRecord]) -> Self {
        Self::from_entries(
            records
                .iter()
                .map(|record| (record.child_id, record.column, u64::from(record.row))),
        )
    }

    pub fn columns(&self) -> &[Vec<ObjectId>] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns `(column, row)` of `id`.
    pub fn position_of(&self, id: ObjectId) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(column, members)| {
            members
                .iter()
                .position(|member| *member == id)
                .map(|row| (column, row))
        })
    }

    /// Appends `id` to the end of `column`, opening column `0` on an empty grid.
    pub fn append(&mut self, column: usize, id: ObjectId) {
        if self.columns.is_empty() {
            self.columns.push(Vec::new());
        }
        let column = column.min(self.columns.len() - 1);
        self.columns[column].push(id);
    }

    /// Removes `id` and compacts empty columns.
    pub fn remove(&mut self, id: ObjectId) -> bool {
        let removed = self.take(id).is_some();
        self.compact();
        removed
    }

    /// Applies one move command.
    pub fn apply_move(&mut self, child_id: ObjectId, target: MoveTarget) -> MoveOutcome {
        let Some((source_column, _)) = self.position_of(child_id) else {
            return MoveOutcome::Rejected;
        };
        let before = self.clone();

        match target {
            MoveTarget::OntoCard(other_id) => {
                if other_id == child_id || self.position_of(other_id).is_none() {
                    return MoveOutcome::Rejected;
                }
                self.take(child_id);
                let Some((column, row)) = self.position_of(other_id) else {
                    *self = before;
                    return MoveOutcome::Rejected;
                };
                self.columns[column].insert(row, child_id);
            }
            MoveTarget::OntoColumnEnd(column) => {
                let column = column as usize;
                if column >= self.columns.len() {
                    return MoveOutcome::Rejected;
                }
                self.take(child_id);
                self.columns[column].push(child_id);
            }
            MoveTarget::NewColumnLeftOf(column) | MoveTarget::NewColumnRightOf(column) => {
                let column = column as usize;
                if column >= self.columns.len() {
                    return MoveOutcome::Rejected;
                }
                let insert_at = match target {
                    MoveTarget::NewColumnLeftOf(_) => column,
                    _ => column + 1,
                };
                let sole_member = self.columns[source_column].len() == 1;
                if sole_member && (insert_at == source_column || insert_at == source_column + 1) {
                    return MoveOutcome::Unchanged;
                }
                self.take(child_id);
                self.columns.insert(insert_at, vec![child_id]);
            }
        }

        self.compact();
        if *self == before {
            MoveOutcome::Unchanged
        } else {
            MoveOutcome::Moved
        }
    }

    /// Iterates `(id, column, row)` in grid order.
    pub fn positions(&self) -> impl Iterator<Item = (ObjectId, u32, u32)> + '_ {
        self.columns.iter().enumerate().flat_map(|(column, members)| {
            members
                .iter()
                .enumerate()
                .map(move |(row, id)| (*id, column as u32, row as u32))
        })
    }

    /// Writes positions into matching links; links absent from the grid are untouched.
    pub fn write_links(&self, links: &mut BTreeMap<ObjectId, SubobjectLink>) {
        for (id, column, row) in self.positions() {
            if let Some(link) = links.get_mut(&id) {
                link.column = column;
                link.row = row;
            }
        }
    }

    /// Rewrites records in grid order, dropping records absent from the grid.
    pub fn write_records(&self, records: &mut Vec<SubobjectRecord>) {
        let by_id: BTreeMap<ObjectId, SubobjectRecord> = records
            .iter()
            .map(|record| (record.child_id, *record))
            .collect();
        *records = self
            .positions()
            .filter_map(|(id, column, row)| {
                by_id.get(&id).map(|record| SubobjectRecord {
                    column,
                    row,
                    ..*record
                })
            })
            .collect();
    }

    fn take(&mut self, id: ObjectId) -> Option<(usize, usize)> {
        let (column, row) = self.position_of(id)?;
        self.columns[column].remove(row);
        Some((column, row))
    }

    fn compact(&mut self) {
        self.columns.retain(|members| !members.is_empty());
    }
}

/// Moves one child of `composite`, re-flowing rows and columns.
pub fn move_subobject(
    composite: &mut CompositeBlock,
    child_id: ObjectId,
    target: MoveTarget,
) -> MoveOutcome {
    let mut grid = ColumnGrid::from_links(&composite.subobjects);
    let outcome = grid.apply_move(child_id, target);
    debug!(
        "event=subobject_move module=layout status={:?} child_id={} target={:?}",
        outcome, child_id, target
    );
    if outcome == MoveOutcome::Moved {
        grid.write_links(&mut composite.subobjects);
    }
    outcome
}

/// Appends a new edge at the end of column `0`. Returns `false` if already linked.
pub fn insert_subobject(composite: &mut CompositeBlock, child_id: ObjectId) -> bool {
    if composite.subobjects.contains_key(&child_id) {
        return false;
    }
    let mut grid = ColumnGrid::from_links(&composite.subobjects);
    grid.append(0, child_id);
    composite.subobjects.insert(child_id, SubobjectLink::at(0, 0));
    grid.write_links(&mut composite.subobjects);
    true
}

/// Removes an edge and closes the gap. Returns `false` if not linked.
pub fn remove_subobject(composite: &mut CompositeBlock, child_id: ObjectId) -> bool {
    if composite.subobjects.remove(&child_id).is_none() {
        return false;
    }
    ColumnGrid::from_links(&composite.subobjects).write_links(&mut composite.subobjects);
    true
}
