//! Apply a plain target tree to a shared node.
//!
//! The node is materialized, diffed against the target and edited in place,
//! one slot at a time, inside the caller's transaction. Children that did not
//! change keep their node identity; opaque leaves are never written.

use json_mirror_doc::{ArrayRef, Entry, MapRef, Prelim, Slot, Transaction, Value};
use tracing::{debug, trace};

use crate::change::{compute_changes_at, Change, ChangeKind};
use crate::error::MirrorError;

/// A composite node of the shared tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SharedNode {
    Map(MapRef),
    Array(ArrayRef),
}

impl SharedNode {
    pub fn materialize(&self, txn: &Transaction<'_>) -> Value {
        match self {
            SharedNode::Map(map) => map.materialize(txn),
            SharedNode::Array(array) => array.materialize(txn),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            SharedNode::Map(_) => "object",
            SharedNode::Array(_) => "array",
        }
    }
}

impl From<MapRef> for SharedNode {
    fn from(map: MapRef) -> Self {
        SharedNode::Map(map)
    }
}

impl From<ArrayRef> for SharedNode {
    fn from(array: ArrayRef) -> Self {
        SharedNode::Array(array)
    }
}

impl TryFrom<Entry> for SharedNode {
    /// The leaf that was found instead of a node.
    type Error = Value;

    fn try_from(entry: Entry) -> Result<Self, Self::Error> {
        match entry {
            Entry::Map(map) => Ok(SharedNode::Map(map)),
            Entry::Array(array) => Ok(SharedNode::Array(array)),
            Entry::Leaf(value) => Err(value),
        }
    }
}

/// Deep-convert a plain value into a prelim tree. Opaque values, including
/// opaque members nested in composites, are dropped.
pub fn to_prelim(value: &Value) -> Option<Prelim> {
    match value {
        Value::Opaque(_) => None,
        Value::Object(map) => Some(Prelim::Map(
            map.iter()
                .filter_map(|(key, child)| to_prelim(child).map(|p| (key.clone(), p)))
                .collect(),
        )),
        Value::Array(items) => Some(Prelim::Array(items.iter().filter_map(to_prelim).collect())),
        leaf => Some(Prelim::Leaf(leaf.clone())),
    }
}

/// Edit `node` so that it materializes to `target` (minus opaque leaves).
pub fn patch_shared(
    txn: &mut Transaction<'_>,
    node: &SharedNode,
    target: &Value,
) -> Result<(), MirrorError> {
    let mut path = Vec::new();
    patch_node(txn, &mut path, node, target)
}

fn patch_node(
    txn: &mut Transaction<'_>,
    path: &mut Vec<Slot>,
    node: &SharedNode,
    target: &Value,
) -> Result<(), MirrorError> {
    let current = node.materialize(txn);
    let changes = compute_changes_at(path, &current, target)?;
    if changes.iter().all(Change::is_noop) {
        return Ok(());
    }
    debug!(
        node = %shared_id(node),
        changes = changes.len(),
        "patching shared node"
    );
    match node {
        SharedNode::Map(map) => patch_map(txn, path, map, &changes, target),
        SharedNode::Array(array) => patch_array(txn, path, array, &changes, target),
    }
}

fn shared_id(node: &SharedNode) -> String {
    match node {
        SharedNode::Map(map) => map.id().to_string(),
        SharedNode::Array(array) => array.id().to_string(),
    }
}

fn patch_map(
    txn: &mut Transaction<'_>,
    path: &mut Vec<Slot>,
    map: &MapRef,
    changes: &[Change],
    target: &Value,
) -> Result<(), MirrorError> {
    for change in changes {
        let Slot::Key(key) = &change.key else {
            continue;
        };
        match change.kind {
            ChangeKind::None => {}
            ChangeKind::Insert | ChangeKind::Update => {
                match change.value.as_ref().and_then(to_prelim) {
                    Some(prelim) => map.set(txn, key.clone(), prelim)?,
                    // An opaque value takes the slot locally; the shared
                    // tree must not keep a stale value under it.
                    None => {
                        map.remove(txn, key)?;
                    }
                }
            }
            ChangeKind::Delete => {
                map.remove(txn, key)?;
            }
            ChangeKind::Pending => {
                path.push(change.key.clone());
                let child = child_node(path, map.get(txn, key), target.get(&change.key))?;
                patch_node(txn, path, &child.0, child.1)?;
                path.pop();
            }
        }
    }
    Ok(())
}

fn patch_array(
    txn: &mut Transaction<'_>,
    path: &mut Vec<Slot>,
    array: &ArrayRef,
    changes: &[Change],
    target: &Value,
) -> Result<(), MirrorError> {
    // Opaque items that were not written; they still occupy indices of the
    // change list.
    let mut skipped = 0usize;
    for change in changes {
        let Slot::Index(index) = change.key else {
            continue;
        };
        let at = index.saturating_sub(skipped);
        match change.kind {
            ChangeKind::None => {}
            ChangeKind::Insert => match change.value.as_ref().and_then(to_prelim) {
                Some(prelim) => {
                    let at = at.min(array.len(txn));
                    array.insert(txn, at, vec![prelim])?;
                }
                None => {
                    trace!(index, "skipping opaque item");
                    skipped += 1;
                }
            },
            ChangeKind::Update => {
                if at < array.len(txn) {
                    array.remove_range(txn, at, 1)?;
                }
                match change.value.as_ref().and_then(to_prelim) {
                    Some(prelim) => {
                        let at = at.min(array.len(txn));
                        array.insert(txn, at, vec![prelim])?;
                    }
                    None => skipped += 1,
                }
            }
            ChangeKind::Delete => {
                if at < array.len(txn) {
                    array.remove_range(txn, at, 1)?;
                }
            }
            ChangeKind::Pending => {
                path.push(Slot::Index(index));
                let child = child_node(path, array.get(txn, at), target.get(&change.key))?;
                patch_node(txn, path, &child.0, child.1)?;
                path.pop();
            }
        }
    }
    Ok(())
}

/// Resolve the shared child and its target for a `Pending` slot.
fn child_node<'t>(
    path: &[Slot],
    entry: Option<Entry>,
    target: Option<&'t Value>,
) -> Result<(SharedNode, &'t Value), MirrorError> {
    let Some(target) = target else {
        return Err(MirrorError::kind_mismatch(path, "composite", "undefined"));
    };
    let expected = target.kind().name();
    let node = match entry.map(SharedNode::try_from) {
        Some(Ok(node)) => node,
        Some(Err(leaf)) => {
            return Err(MirrorError::kind_mismatch(path, expected, leaf.kind().name()))
        }
        None => return Err(MirrorError::kind_mismatch(path, expected, "undefined")),
    };
    if node.kind_name() != expected {
        return Err(MirrorError::kind_mismatch(path, expected, node.kind_name()));
    }
    Ok((node, target))
}
