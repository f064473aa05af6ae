//! Set reconciliation for child relations.
//!
//! A synchronization pass replaces every child relation wholesale: the freshly
//! observed set is diffed against the persisted set and only the difference is
//! written. Unchanged rows are never re-written, so an unchanged upstream
//! snapshot produces an empty delta.

use std::collections::HashSet;

use crate::models::ChildRow;

/// The minimal change turning a persisted set into the desired one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationDelta {
    pub to_add: Vec<ChildRow>,
    pub to_remove: Vec<String>,
}

impl RelationDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Cleans a raw external child list into a duplicate-free desired set.
///
/// Blank keys are never valid and are dropped. For repeated keys the first
/// occurrence wins, including its attributes; input order is the documented
/// tie-break, not an accident of map iteration.
pub fn dedup_first_wins(rows: impl IntoIterator<Item = ChildRow>) -> Vec<ChildRow> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut cleaned = Vec::new();
    for row in rows {
        if row.key.is_empty() {
            continue;
        }
        if seen.insert(row.key.clone()) {
            cleaned.push(row);
        }
    }
    cleaned
}

/// Computes the add/remove delta between a desired and a persisted set.
///
/// Both inputs must be duplicate-free (`dedup_first_wins` for raw data).
/// `to_add` preserves the desired set's order; an empty desired set removes
/// every persisted row.
pub fn reconcile(desired: &[ChildRow], persisted: &[ChildRow]) -> RelationDelta {
    let desired_keys: HashSet<&str> = desired.iter().map(|row| row.key.as_str()).collect();
    let persisted_keys: HashSet<&str> = persisted.iter().map(|row| row.key.as_str()).collect();

    let to_add = desired
        .iter()
        .filter(|row| !persisted_keys.contains(row.key.as_str()))
        .cloned()
        .collect();
    let to_remove = persisted
        .iter()
        .filter(|row| !desired_keys.contains(row.key.as_str()))
        .map(|row| row.key.clone())
        .collect();

    RelationDelta { to_add, to_remove }
}
