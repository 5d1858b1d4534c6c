//! Structural edits between two device list snapshots.
//!
//! A consuming view applies the edits in order to its previous snapshot
//! and ends up with the new one, without redrawing rows that did not change.

use std::collections::HashSet;

use crate::address::DeviceAddress;
use crate::device::DeviceRecord;

/// One step of an edit script. Indices refer to the list *as it stands
/// after all previous edits* have been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ListEdit {
    Insert { index: usize, record: DeviceRecord },
    Remove { index: usize },
    Move { from: usize, to: usize },
    Update { index: usize, record: DeviceRecord },
}

/// Compute the edit script turning `old` into `new`, keyed by address.
///
/// Removals come first, highest index first, then a single left-to-right
/// pass places every record of `new`. When both lists keep their common
/// records in the same relative order (which registry snapshots always do)
/// the script contains no moves and is minimal.
#[must_use]
pub fn diff(old: &[DeviceRecord], new: &[DeviceRecord]) -> Vec<ListEdit> {
    let wanted: HashSet<DeviceAddress> = new.iter().map(|record| record.address).collect();
    let mut working: Vec<DeviceRecord> = old.to_vec();
    let mut edits = Vec::new();

    for index in (0..working.len()).rev() {
        if !wanted.contains(&working[index].address) {
            working.remove(index);
            edits.push(ListEdit::Remove { index });
        }
    }

    for (index, record) in new.iter().enumerate() {
        let found = working[index..]
            .iter()
            .position(|candidate| candidate.address == record.address)
            .map(|offset| offset + index);

        match found {
            Some(from) => {
                if from != index {
                    let moved = working.remove(from);
                    working.insert(index, moved);
                    edits.push(ListEdit::Move { from, to: index });
                }
                if !working[index].same_contents(record) {
                    working[index] = record.clone();
                    edits.push(ListEdit::Update {
                        index,
                        record: record.clone(),
                    });
                }
            }
            None => {
                working.insert(index, record.clone());
                edits.push(ListEdit::Insert {
                    index,
                    record: record.clone(),
                });
            }
        }
    }

    edits
}

/// Apply an edit script produced by [`diff`] to a snapshot.
#[must_use]
pub fn apply(old: &[DeviceRecord], edits: &[ListEdit]) -> Vec<DeviceRecord> {
    let mut list = old.to_vec();
    for edit in edits {
        match edit {
            ListEdit::Insert { index, record } => list.insert(*index, record.clone()),
            ListEdit::Remove { index } => {
                list.remove(*index);
            }
            ListEdit::Move { from, to } => {
                let moved = list.remove(*from);
                list.insert(*to, moved);
            }
            ListEdit::Update { index, record } => list[*index] = record.clone(),
        }
    }
    list
}
