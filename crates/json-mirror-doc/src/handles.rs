//! Handles to composite nodes of a [`Doc`](crate::Doc).
//!
//! Handles hold a weak reference to their document, so observers that
//! capture a handle never keep the document alive.

use std::rc::Weak;

use crate::doc::{Doc, DocInner, Transaction, TransactionEvent};
use crate::error::DocError;
use crate::patch::{Content, NodeId, Op, Prelim};
use crate::value::Value;

/// What a slot of a shared node holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Map(MapRef),
    Array(ArrayRef),
    Leaf(Value),
}

impl Entry {
    fn from_content(doc: &Weak<DocInner>, content: &Content) -> Self {
        match content {
            Content::Leaf(value) => Entry::Leaf(value.clone()),
            Content::Map(ts) => Entry::Map(MapRef::new(doc.clone(), NodeId::Id(*ts))),
            Content::Array(ts) => Entry::Array(ArrayRef::new(doc.clone(), NodeId::Id(*ts))),
        }
    }

    pub fn materialize(&self, txn: &Transaction<'_>) -> Value {
        match self {
            Entry::Map(map) => map.materialize(txn),
            Entry::Array(array) => array.materialize(txn),
            Entry::Leaf(value) => value.clone(),
        }
    }
}

fn upgrade(doc: &Weak<DocInner>) -> Result<Doc, DocError> {
    doc.upgrade()
        .map(Doc::from_inner)
        .ok_or(DocError::DocumentDropped)
}

// ── MapRef ────────────────────────────────────────────────────────────────

/// A keyed node.
#[derive(Debug, Clone)]
pub struct MapRef {
    doc: Weak<DocInner>,
    id: NodeId,
}

impl PartialEq for MapRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.doc, &other.doc)
    }
}

impl MapRef {
    pub(crate) fn new(doc: Weak<DocInner>, id: NodeId) -> Self {
        Self { doc, id }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn get(&self, txn: &Transaction<'_>, key: &str) -> Option<Entry> {
        let entries = txn.state().map(&self.id).ok()??;
        entries
            .get(key)
            .map(|content| Entry::from_content(&self.doc, content))
    }

    pub fn contains_key(&self, txn: &Transaction<'_>, key: &str) -> bool {
        matches!(txn.state().map(&self.id), Ok(Some(entries)) if entries.contains_key(key))
    }

    pub fn len(&self, txn: &Transaction<'_>) -> usize {
        match txn.state().map(&self.id) {
            Ok(Some(entries)) => entries.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self, txn: &Transaction<'_>) -> bool {
        self.len(txn) == 0
    }

    pub fn keys(&self, txn: &Transaction<'_>) -> Vec<String> {
        match txn.state().map(&self.id) {
            Ok(Some(entries)) => entries.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Set `key`, replacing whatever it held. Composite prelims are created
    /// as new nodes first.
    pub fn set(
        &self,
        txn: &mut Transaction<'_>,
        key: impl Into<String>,
        value: impl Into<Prelim>,
    ) -> Result<(), DocError> {
        txn.state().map(&self.id)?;
        let content = txn.build(value.into())?;
        txn.exec(Op::MapSet {
            node: self.id.clone(),
            key: key.into(),
            content,
        })
    }

    /// Remove `key`. Returns `false` when the key was absent.
    pub fn remove(&self, txn: &mut Transaction<'_>, key: &str) -> Result<bool, DocError> {
        if !self.contains_key(txn, key) {
            return Ok(false);
        }
        txn.exec(Op::MapRemove {
            node: self.id.clone(),
            key: key.to_string(),
        })?;
        Ok(true)
    }

    pub fn materialize(&self, txn: &Transaction<'_>) -> Value {
        txn.state().materialize(&self.id)
    }

    /// Materialize outside of a transaction.
    pub fn to_value(&self) -> Result<Value, DocError> {
        upgrade(&self.doc)?.transact(|txn| self.materialize(txn))
    }

    /// Call `observer` once per committed transaction that changed this
    /// node or anything below it.
    pub fn observe_deep<F>(&self, observer: F) -> Result<u64, DocError>
    where
        F: Fn(&TransactionEvent) + 'static,
    {
        Ok(upgrade(&self.doc)?.observe_deep(self.id.clone(), observer))
    }

    pub fn unobserve_deep(&self, observer_id: u64) -> bool {
        upgrade(&self.doc)
            .map(|doc| doc.unobserve_deep(observer_id))
            .unwrap_or(false)
    }
}

// ── ArrayRef ──────────────────────────────────────────────────────────────

/// An ordered node.
#[derive(Debug, Clone)]
pub struct ArrayRef {
    doc: Weak<DocInner>,
    id: NodeId,
}

impl PartialEq for ArrayRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.doc, &other.doc)
    }
}

impl ArrayRef {
    pub(crate) fn new(doc: Weak<DocInner>, id: NodeId) -> Self {
        Self { doc, id }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn len(&self, txn: &Transaction<'_>) -> usize {
        txn.state().array(&self.id).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, txn: &Transaction<'_>) -> bool {
        self.len(txn) == 0
    }

    pub fn get(&self, txn: &Transaction<'_>, index: usize) -> Option<Entry> {
        let items = txn.state().array(&self.id).ok()?;
        items
            .get(index)
            .map(|content| Entry::from_content(&self.doc, content))
    }

    /// Entries in `start..end`, clamped to the current length.
    pub fn slice(&self, txn: &Transaction<'_>, start: usize, end: usize) -> Vec<Entry> {
        let Ok(items) = txn.state().array(&self.id) else {
            return Vec::new();
        };
        let end = end.min(items.len());
        let start = start.min(end);
        items[start..end]
            .iter()
            .map(|content| Entry::from_content(&self.doc, content))
            .collect()
    }

    pub fn insert(
        &self,
        txn: &mut Transaction<'_>,
        index: usize,
        values: Vec<Prelim>,
    ) -> Result<(), DocError> {
        let len = txn.state().array(&self.id)?.len();
        if index > len {
            return Err(DocError::IndexOutOfRange { index, len });
        }
        if values.is_empty() {
            return Ok(());
        }
        let content = values
            .into_iter()
            .map(|value| txn.build(value))
            .collect::<Result<Vec<_>, _>>()?;
        txn.exec(Op::ArrayInsert {
            node: self.id.clone(),
            index,
            content,
        })
    }

    pub fn push(&self, txn: &mut Transaction<'_>, value: impl Into<Prelim>) -> Result<(), DocError> {
        let len = self.len(txn);
        self.insert(txn, len, vec![value.into()])
    }

    pub fn remove_range(
        &self,
        txn: &mut Transaction<'_>,
        index: usize,
        len: usize,
    ) -> Result<(), DocError> {
        if len == 0 {
            return Ok(());
        }
        txn.exec(Op::ArrayRemove {
            node: self.id.clone(),
            index,
            len,
        })
    }

    pub fn materialize(&self, txn: &Transaction<'_>) -> Value {
        txn.state().materialize(&self.id)
    }

    pub fn to_value(&self) -> Result<Value, DocError> {
        upgrade(&self.doc)?.transact(|txn| self.materialize(txn))
    }

    pub fn observe_deep<F>(&self, observer: F) -> Result<u64, DocError>
    where
        F: Fn(&TransactionEvent) + 'static,
    {
        Ok(upgrade(&self.doc)?.observe_deep(self.id.clone(), observer))
    }

    pub fn unobserve_deep(&self, observer_id: u64) -> bool {
        upgrade(&self.doc)
            .map(|doc| doc.unobserve_deep(observer_id))
            .unwrap_or(false)
    }
}
