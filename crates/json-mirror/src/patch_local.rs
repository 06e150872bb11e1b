//! Apply a target tree to a local plain tree.
//!
//! The result shares every unchanged subtree with `current` by identity, and
//! is `current` itself when nothing changed. Opaque leaves held locally are
//! kept even when the target lacks them, since the target normally comes
//! from a shared tree that never stores them.

use std::rc::Rc;

use indexmap::IndexMap;
use json_mirror_doc::{Object, Slot, Value};

use crate::change::{compute_changes_at, Change, ChangeKind};
use crate::error::MirrorError;

pub fn patch_local(current: &Value, target: &Value) -> Result<Value, MirrorError> {
    let mut path = Vec::new();
    patch_value(&mut path, current, target)
}

fn patch_value(path: &mut Vec<Slot>, current: &Value, target: &Value) -> Result<Value, MirrorError> {
    let changes = compute_changes_at(path, current, target)?;
    if changes.is_empty() {
        return Ok(current.clone());
    }
    match (current, target) {
        (Value::Object(map), Value::Object(_)) => patch_object(path, current, map, &changes, target),
        (Value::Array(items), Value::Array(_)) => patch_array(path, current, items, &changes, target),
        _ => Ok(current.clone()),
    }
}

fn patch_object(
    path: &mut Vec<Slot>,
    current: &Value,
    map: &Object,
    changes: &[Change],
    target: &Value,
) -> Result<Value, MirrorError> {
    let mut next: Object = IndexMap::with_capacity(changes.len());
    let mut changed = false;
    for change in changes {
        let Slot::Key(key) = &change.key else {
            continue;
        };
        match change.kind {
            ChangeKind::None | ChangeKind::Insert | ChangeKind::Update => {
                if let Some(value) = &change.value {
                    next.insert(key.clone(), value.clone());
                }
                changed |= change.kind != ChangeKind::None;
            }
            ChangeKind::Delete => match map.get(key) {
                Some(kept @ Value::Opaque(_)) => {
                    next.insert(key.clone(), kept.clone());
                }
                _ => changed = true,
            },
            ChangeKind::Pending => {
                let (Some(old_child), Some(new_child)) = (map.get(key), target.get(&change.key))
                else {
                    continue;
                };
                path.push(change.key.clone());
                let child = patch_value(path, old_child, new_child)?;
                path.pop();
                changed |= !Value::ptr_eq(&child, old_child);
                next.insert(key.clone(), child);
            }
        }
    }
    if !changed {
        return Ok(current.clone());
    }
    Ok(Value::Object(Rc::new(next)))
}

fn patch_array(
    path: &mut Vec<Slot>,
    current: &Value,
    items: &[Value],
    changes: &[Change],
    target: &Value,
) -> Result<Value, MirrorError> {
    let mut working = items.to_vec();
    let mut changed = false;
    // Opaque items kept in place although the target dropped them.
    let mut kept = 0usize;
    for change in changes {
        let Slot::Index(index) = change.key else {
            continue;
        };
        let at = index + kept;
        match change.kind {
            ChangeKind::None => {}
            ChangeKind::Insert => {
                if let Some(value) = &change.value {
                    working.insert(at.min(working.len()), value.clone());
                    changed = true;
                }
            }
            ChangeKind::Update => {
                if let (Some(slot), Some(value)) = (working.get_mut(at), &change.value) {
                    *slot = value.clone();
                    changed = true;
                }
            }
            ChangeKind::Delete => match working.get(at) {
                Some(Value::Opaque(_)) => kept += 1,
                Some(_) => {
                    working.remove(at);
                    changed = true;
                }
                None => {}
            },
            ChangeKind::Pending => {
                let (Some(old_child), Some(new_child)) = (working.get(at), target.get(&change.key))
                else {
                    continue;
                };
                path.push(Slot::Index(index));
                let child = patch_value(path, old_child, new_child)?;
                path.pop();
                if !Value::ptr_eq(&child, &working[at]) {
                    working[at] = child;
                    changed = true;
                }
            }
        }
    }
    if !changed {
        return Ok(current.clone());
    }
    Ok(Value::array(working))
}
