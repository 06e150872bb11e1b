//! Change lists between two plain trees.
//!
//! A change list describes, one slot at a time, how to turn an old composite
//! into a new one of the same kind. Keyed lists address slots by key.
//! Ordered lists address them by index into the *evolving* sequence, so the
//! list can be replayed front to back as independent single-slot edits:
//!
//! * `Insert` inserts before the index,
//! * `Delete` removes the element at the index,
//! * `Update` replaces the element at the index,
//! * `Pending` and `None` name the element at the index.

use json_mirror_doc::{Slot, Value};
use tracing::trace;

use crate::error::MirrorError;
use crate::seq_diff::{diff, SeqEdit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Both sides are composites of the same kind; recurse.
    Pending,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub key: Slot,
    /// The new value for `Insert` and `Update`, the old value for `None`.
    /// Absent for `Delete` and `Pending`.
    pub value: Option<Value>,
}

impl Change {
    fn new(kind: ChangeKind, key: Slot, value: Option<Value>) -> Self {
        Self { kind, key, value }
    }

    pub fn is_noop(&self) -> bool {
        self.kind == ChangeKind::None
    }
}

/// Compute the change list turning `old` into `new`.
///
/// Both values must be composites of the same kind unless they are equal.
pub fn compute_changes(old: &Value, new: &Value) -> Result<Vec<Change>, MirrorError> {
    compute_changes_at(&[], old, new)
}

pub(crate) fn compute_changes_at(
    path: &[Slot],
    old: &Value,
    new: &Value,
) -> Result<Vec<Change>, MirrorError> {
    if old == new {
        return Ok(Vec::new());
    }
    let changes = match (old, new) {
        (Value::Object(_), Value::Object(_)) => keyed_changes(old, new),
        (Value::Array(a), Value::Array(b)) => ordered_changes(a, b),
        (Value::Object(_) | Value::Array(_), _) => {
            return Err(MirrorError::kind_mismatch(
                path,
                old.kind().name(),
                new.kind().name(),
            ))
        }
        _ => {
            return Err(MirrorError::kind_mismatch(
                path,
                new.kind().name(),
                old.kind().name(),
            ))
        }
    };
    for change in &changes {
        trace!(kind = ?change.kind, key = %change.key, "change");
    }
    Ok(changes)
}

// ── Keyed ─────────────────────────────────────────────────────────────────

fn keyed_changes(old: &Value, new: &Value) -> Vec<Change> {
    let (Some(old_map), Some(new_map)) = (old.as_object(), new.as_object()) else {
        return Vec::new();
    };
    let mut changes = Vec::with_capacity(old_map.len().max(new_map.len()));
    for (key, old_child) in old_map {
        let slot = Slot::Key(key.clone());
        let change = match new_map.get(key) {
            None => Change::new(ChangeKind::Delete, slot, None),
            Some(new_child) if old_child == new_child => {
                Change::new(ChangeKind::None, slot, Some(old_child.clone()))
            }
            Some(new_child) if old_child.same_composite_kind(new_child) => {
                Change::new(ChangeKind::Pending, slot, None)
            }
            Some(new_child) => Change::new(ChangeKind::Update, slot, Some(new_child.clone())),
        };
        changes.push(change);
    }
    for (key, new_child) in new_map {
        if !old_map.contains_key(key) {
            changes.push(Change::new(
                ChangeKind::Insert,
                Slot::Key(key.clone()),
                Some(new_child.clone()),
            ));
        }
    }
    changes
}

// ── Ordered ───────────────────────────────────────────────────────────────

fn ordered_changes(old: &[Value], new: &[Value]) -> Vec<Change> {
    let edits = diff(old, new);
    let mut changes = Vec::with_capacity(edits.len());
    // Position in the sequence as it looks after replaying `changes`.
    let mut cursor = 0usize;
    for edit in edits {
        let slot = Slot::Index(cursor);
        match edit {
            SeqEdit::Del { .. } => {
                changes.push(Change::new(ChangeKind::Delete, slot, None));
            }
            SeqEdit::Ins { dst } => {
                changes.push(Change::new(ChangeKind::Insert, slot, Some(new[dst].clone())));
                cursor += 1;
            }
            SeqEdit::Mix { .. } => {
                changes.push(Change::new(ChangeKind::Pending, slot, None));
                cursor += 1;
            }
            SeqEdit::Eql { src, .. } => {
                changes.push(Change::new(ChangeKind::None, slot, Some(old[src].clone())));
                cursor += 1;
            }
        }
    }
    changes
}
