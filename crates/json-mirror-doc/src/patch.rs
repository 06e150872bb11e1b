//! Operations a transaction records, and the patch a commit emits.
//!
//! A [`Patch`] is the unit of replication: it carries the author's session
//! id and a per-session sequence number so replicas can drop patches they
//! have already applied.

use std::fmt;

use crate::clock::Ts;
use crate::value::Value;

// ── Node addressing ───────────────────────────────────────────────────────

/// Identity of a composite node. Root maps are named, so every replica
/// agrees on them without coordination; every other node is named by the
/// timestamp of the replica that created it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeId {
    Root(String),
    Id(Ts),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Root(name) => write!(f, "root:{name}"),
            NodeId::Id(ts) => write!(f, "{ts}"),
        }
    }
}

/// What a map entry or array item holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// A scalar leaf. Never a composite or opaque value.
    Leaf(Value),
    Map(Ts),
    Array(Ts),
}

impl Content {
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Content::Leaf(_) => None,
            Content::Map(ts) | Content::Array(ts) => Some(NodeId::Id(*ts)),
        }
    }
}

// ── Ops ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    NewMap { id: Ts },
    NewArray { id: Ts },
    MapSet { node: NodeId, key: String, content: Content },
    MapRemove { node: NodeId, key: String },
    ArrayInsert { node: NodeId, index: usize, content: Vec<Content> },
    ArrayRemove { node: NodeId, index: usize, len: usize },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::NewMap { .. } => "new_map",
            Op::NewArray { .. } => "new_array",
            Op::MapSet { .. } => "map_set",
            Op::MapRemove { .. } => "map_remove",
            Op::ArrayInsert { .. } => "array_insert",
            Op::ArrayRemove { .. } => "array_remove",
        }
    }
}

/// The ops committed by one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub sid: u64,
    pub seq: u64,
    pub ops: Vec<Op>,
}

impl Patch {
    pub fn id(&self) -> (u64, u64) {
        (self.sid, self.seq)
    }
}

// ── Prelim ────────────────────────────────────────────────────────────────

/// A value that is not yet part of a document. Composite prelims become
/// freshly created nodes when they are inserted.
#[derive(Debug, Clone, PartialEq)]
pub enum Prelim {
    Leaf(Value),
    Map(Vec<(String, Prelim)>),
    Array(Vec<Prelim>),
}

impl Prelim {
    pub fn empty_map() -> Self {
        Prelim::Map(Vec::new())
    }

    pub fn empty_array() -> Self {
        Prelim::Array(Vec::new())
    }
}

impl From<Value> for Prelim {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Prelim::Array(items.iter().cloned().map(Prelim::from).collect()),
            Value::Object(map) => Prelim::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Prelim::from(v.clone())))
                    .collect(),
            ),
            leaf => Prelim::Leaf(leaf),
        }
    }
}

impl From<serde_json::Value> for Prelim {
    fn from(json: serde_json::Value) -> Self {
        Prelim::from(Value::from(json))
    }
}
