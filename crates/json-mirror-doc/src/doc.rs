//! The in-process shared document.
//!
//! A [`Doc`] owns a graph of keyed and ordered nodes. All mutation happens
//! inside a [`Transaction`]; committing a transaction that changed anything
//! produces one [`Patch`], notifies deep observers of every affected node
//! once, then hands the patch to update listeners for relay to other
//! replicas. Listeners run after the document borrow is released, so they
//! may read the document or open new transactions.
//!
//! Replicas replay patches in order and perform no conflict resolution.

use std::cell::{Cell, RefCell, RefMut};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::clock::{generate_session_id, LogicalClock};
use crate::error::DocError;
use crate::handles::MapRef;
use crate::patch::{Content, NodeId, Op, Patch, Prelim};
use crate::value::{Object, Value};

// ── Node storage ──────────────────────────────────────────────────────────

pub(crate) enum Node {
    Map(IndexMap<String, Content>),
    Array(Vec<Content>),
}

/// Node shape as seen while validating a patch.
#[derive(Clone, Copy)]
enum Shape {
    Map,
    Array(usize),
}

pub(crate) struct DocState {
    clock: LogicalClock,
    seq: u64,
    nodes: HashMap<NodeId, Node>,
    /// child → parent, used to route deep notifications upwards.
    parents: HashMap<NodeId, NodeId>,
    /// Highest patch sequence applied, per session.
    seen: HashMap<u64, u64>,
}

impl DocState {
    fn new(sid: u64) -> Self {
        Self {
            clock: LogicalClock::new(sid),
            seq: 0,
            nodes: HashMap::new(),
            parents: HashMap::new(),
            seen: HashMap::new(),
        }
    }

    /// Entries of a map node. A root that was never written reads as empty.
    pub(crate) fn map(&self, id: &NodeId) -> Result<Option<&IndexMap<String, Content>>, DocError> {
        match self.nodes.get(id) {
            Some(Node::Map(entries)) => Ok(Some(entries)),
            Some(Node::Array(_)) => Err(DocError::WrongNodeType {
                node: id.clone(),
                expected: "a map",
            }),
            None if matches!(id, NodeId::Root(_)) => Ok(None),
            None => Err(DocError::NodeNotFound(id.clone())),
        }
    }

    pub(crate) fn array(&self, id: &NodeId) -> Result<&Vec<Content>, DocError> {
        match self.nodes.get(id) {
            Some(Node::Array(items)) => Ok(items),
            Some(Node::Map(_)) => Err(DocError::WrongNodeType {
                node: id.clone(),
                expected: "an array",
            }),
            None => Err(DocError::NodeNotFound(id.clone())),
        }
    }

    fn map_mut(&mut self, id: &NodeId) -> Result<&mut IndexMap<String, Content>, DocError> {
        if matches!(id, NodeId::Root(_)) {
            self.nodes
                .entry(id.clone())
                .or_insert_with(|| Node::Map(IndexMap::new()));
        }
        match self.nodes.get_mut(id) {
            Some(Node::Map(entries)) => Ok(entries),
            Some(Node::Array(_)) => Err(DocError::WrongNodeType {
                node: id.clone(),
                expected: "a map",
            }),
            None => Err(DocError::NodeNotFound(id.clone())),
        }
    }

    fn array_mut(&mut self, id: &NodeId) -> Result<&mut Vec<Content>, DocError> {
        match self.nodes.get_mut(id) {
            Some(Node::Array(items)) => Ok(items),
            Some(Node::Map(_)) => Err(DocError::WrongNodeType {
                node: id.clone(),
                expected: "an array",
            }),
            None => Err(DocError::NodeNotFound(id.clone())),
        }
    }

    fn adopt(&mut self, parent: &NodeId, content: &Content) {
        if let Some(child) = content.node_id() {
            self.parents.insert(child, parent.clone());
        }
    }

    fn apply_op(&mut self, op: &Op, touched: &mut Vec<NodeId>) -> Result<(), DocError> {
        trace!(op = op.name(), "applying op");
        match op {
            Op::NewMap { id } => {
                self.nodes.insert(NodeId::Id(*id), Node::Map(IndexMap::new()));
            }
            Op::NewArray { id } => {
                self.nodes.insert(NodeId::Id(*id), Node::Array(Vec::new()));
            }
            Op::MapSet { node, key, content } => {
                self.map_mut(node)?.insert(key.clone(), content.clone());
                self.adopt(node, content);
                touched.push(node.clone());
            }
            Op::MapRemove { node, key } => {
                if self.map_mut(node)?.shift_remove(key).is_some() {
                    touched.push(node.clone());
                }
            }
            Op::ArrayInsert { node, index, content } => {
                let items = self.array_mut(node)?;
                if *index > items.len() {
                    return Err(DocError::IndexOutOfRange {
                        index: *index,
                        len: items.len(),
                    });
                }
                items.splice(*index..*index, content.iter().cloned());
                for item in content {
                    self.adopt(node, item);
                }
                touched.push(node.clone());
            }
            Op::ArrayRemove { node, index, len } => {
                let items = self.array_mut(node)?;
                let end = index.saturating_add(*len);
                if end > items.len() {
                    return Err(DocError::IndexOutOfRange {
                        index: end,
                        len: items.len(),
                    });
                }
                items.drain(*index..end);
                if *len > 0 {
                    touched.push(node.clone());
                }
            }
        }
        Ok(())
    }

    /// Check that `ops` apply in order without touching the graph.
    fn validate(&self, ops: &[Op]) -> Result<(), DocError> {
        let mut shapes: HashMap<NodeId, Shape> = HashMap::new();
        for op in ops {
            match op {
                Op::NewMap { id } => {
                    shapes.insert(NodeId::Id(*id), Shape::Map);
                }
                Op::NewArray { id } => {
                    shapes.insert(NodeId::Id(*id), Shape::Array(0));
                }
                Op::MapSet { node, .. } | Op::MapRemove { node, .. } => {
                    if let Shape::Array(_) = self.shape(node, &shapes)? {
                        return Err(DocError::WrongNodeType {
                            node: node.clone(),
                            expected: "a map",
                        });
                    }
                }
                Op::ArrayInsert { node, index, content } => {
                    let len = self.array_len(node, &shapes)?;
                    if *index > len {
                        return Err(DocError::IndexOutOfRange { index: *index, len });
                    }
                    shapes.insert(node.clone(), Shape::Array(len + content.len()));
                }
                Op::ArrayRemove { node, index, len: count } => {
                    let len = self.array_len(node, &shapes)?;
                    let end = index.saturating_add(*count);
                    if end > len {
                        return Err(DocError::IndexOutOfRange { index: end, len });
                    }
                    shapes.insert(node.clone(), Shape::Array(len - count));
                }
            }
        }
        Ok(())
    }

    fn shape(&self, id: &NodeId, pending: &HashMap<NodeId, Shape>) -> Result<Shape, DocError> {
        if let Some(shape) = pending.get(id) {
            return Ok(*shape);
        }
        match self.nodes.get(id) {
            Some(Node::Map(_)) => Ok(Shape::Map),
            Some(Node::Array(items)) => Ok(Shape::Array(items.len())),
            None if matches!(id, NodeId::Root(_)) => Ok(Shape::Map),
            None => Err(DocError::NodeNotFound(id.clone())),
        }
    }

    fn array_len(&self, id: &NodeId, pending: &HashMap<NodeId, Shape>) -> Result<usize, DocError> {
        match self.shape(id, pending)? {
            Shape::Array(len) => Ok(len),
            Shape::Map => Err(DocError::WrongNodeType {
                node: id.clone(),
                expected: "an array",
            }),
        }
    }

    fn collect_ancestors(&self, id: NodeId, out: &mut HashSet<NodeId>) {
        let mut cur = Some(id);
        while let Some(id) = cur {
            cur = self.parents.get(&id).cloned();
            if !out.insert(id) {
                break;
            }
        }
    }

    pub(crate) fn content_value(&self, content: &Content) -> Value {
        match content {
            Content::Leaf(value) => value.clone(),
            Content::Map(ts) | Content::Array(ts) => self.materialize(&NodeId::Id(*ts)),
        }
    }

    /// Recursively convert the subtree at `id` into a plain value.
    pub(crate) fn materialize(&self, id: &NodeId) -> Value {
        match self.nodes.get(id) {
            Some(Node::Map(entries)) => Value::Object(Rc::new(
                entries
                    .iter()
                    .map(|(k, c)| (k.clone(), self.content_value(c)))
                    .collect::<Object>(),
            )),
            Some(Node::Array(items)) => {
                Value::array(items.iter().map(|c| self.content_value(c)).collect())
            }
            None if matches!(id, NodeId::Root(_)) => Value::empty_object(),
            None => Value::Undefined,
        }
    }
}

// ── Transaction ───────────────────────────────────────────────────────────

/// Notification delivered to deep observers once per committed transaction.
#[derive(Debug, Clone)]
pub struct TransactionEvent {
    /// The origin the transaction was opened with, passed through unchanged.
    pub origin: Option<Value>,
    pub patch: Patch,
    /// `false` when the transaction replayed a patch from another replica.
    pub local: bool,
}

struct Commit {
    event: TransactionEvent,
    affected: HashSet<NodeId>,
}

/// Exclusive access to a document for the duration of one atomic change.
pub struct Transaction<'doc> {
    state: RefMut<'doc, DocState>,
    origin: Option<Value>,
    ops: Vec<Op>,
    touched: Vec<NodeId>,
    remote: Option<Patch>,
}

impl<'doc> Transaction<'doc> {
    fn new(state: RefMut<'doc, DocState>, origin: Option<Value>) -> Self {
        Self {
            state,
            origin,
            ops: Vec::new(),
            touched: Vec::new(),
            remote: None,
        }
    }

    pub fn origin(&self) -> Option<&Value> {
        self.origin.as_ref()
    }

    /// Number of ops recorded so far.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn state(&self) -> &DocState {
        &self.state
    }

    pub(crate) fn exec(&mut self, op: Op) -> Result<(), DocError> {
        self.state.apply_op(&op, &mut self.touched)?;
        self.ops.push(op);
        Ok(())
    }

    /// Instantiate a prelim value, creating fresh nodes for every nested
    /// composite before it is attached anywhere.
    pub(crate) fn build(&mut self, prelim: Prelim) -> Result<Content, DocError> {
        match prelim {
            Prelim::Leaf(Value::Opaque(_)) => Err(DocError::OpaqueValue),
            Prelim::Leaf(value @ (Value::Array(_) | Value::Object(_))) => {
                self.build(Prelim::from(value))
            }
            Prelim::Leaf(value) => Ok(Content::Leaf(value)),
            Prelim::Map(entries) => {
                let id = self.state.clock.tick();
                self.exec(Op::NewMap { id })?;
                for (key, child) in entries {
                    let content = self.build(child)?;
                    self.exec(Op::MapSet {
                        node: NodeId::Id(id),
                        key,
                        content,
                    })?;
                }
                Ok(Content::Map(id))
            }
            Prelim::Array(items) => {
                let id = self.state.clock.tick();
                self.exec(Op::NewArray { id })?;
                let content = items
                    .into_iter()
                    .map(|item| self.build(item))
                    .collect::<Result<Vec<_>, _>>()?;
                if !content.is_empty() {
                    self.exec(Op::ArrayInsert {
                        node: NodeId::Id(id),
                        index: 0,
                        content,
                    })?;
                }
                Ok(Content::Array(id))
            }
        }
    }

    /// Replay a remote patch. The patch applies completely or not at all.
    fn apply_remote(&mut self, patch: &Patch) -> Result<bool, DocError> {
        let last = self.state.seen.get(&patch.sid).copied().unwrap_or(0);
        if patch.seq <= last {
            trace!(sid = patch.sid, seq = patch.seq, "skipping patch already applied");
            return Ok(false);
        }
        if patch.seq != last + 1 {
            return Err(DocError::SequenceGap {
                sid: patch.sid,
                expected: last + 1,
                found: patch.seq,
            });
        }
        if let Err(err) = self.state.validate(&patch.ops) {
            warn!(sid = patch.sid, seq = patch.seq, error = %err, "rejecting remote patch");
            return Err(err);
        }
        for op in &patch.ops {
            self.state.apply_op(op, &mut self.touched)?;
        }
        self.state.seen.insert(patch.sid, patch.seq);
        self.remote = Some(patch.clone());
        Ok(true)
    }

    fn commit(self) -> Option<Commit> {
        let Transaction {
            mut state,
            origin,
            ops,
            touched,
            remote,
        } = self;
        let local = remote.is_none();
        let patch = match remote {
            Some(patch) => patch,
            None if ops.is_empty() => return None,
            None => {
                state.seq += 1;
                let (sid, seq) = (state.clock.sid, state.seq);
                state.seen.insert(sid, seq);
                Patch { sid, seq, ops }
            }
        };
        let mut affected = HashSet::new();
        for id in touched {
            state.collect_ancestors(id, &mut affected);
        }
        Some(Commit {
            event: TransactionEvent {
                origin,
                patch,
                local,
            },
            affected,
        })
    }
}

// ── Doc ───────────────────────────────────────────────────────────────────

type DeepObserver = Rc<dyn Fn(&TransactionEvent)>;
type UpdateListener = Rc<dyn Fn(&Patch)>;

pub(crate) struct DocInner {
    sid: u64,
    state: RefCell<DocState>,
    next_listener_id: Cell<u64>,
    observers: RefCell<BTreeMap<u64, (NodeId, DeepObserver)>>,
    update_listeners: RefCell<BTreeMap<u64, UpdateListener>>,
}

/// A replica of a shared document. Cloning yields another handle to the
/// same replica.
#[derive(Clone)]
pub struct Doc {
    inner: Rc<DocInner>,
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl Doc {
    pub fn new() -> Self {
        Self::with_session_id(generate_session_id())
    }

    pub fn with_session_id(sid: u64) -> Self {
        Self {
            inner: Rc::new(DocInner {
                sid,
                state: RefCell::new(DocState::new(sid)),
                next_listener_id: Cell::new(1),
                observers: RefCell::new(BTreeMap::new()),
                update_listeners: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<DocInner>) -> Self {
        Self { inner }
    }

    pub fn session_id(&self) -> u64 {
        self.inner.sid
    }

    /// The named root map. Every replica resolves the same name to the same
    /// node.
    pub fn root(&self, name: &str) -> MapRef {
        MapRef::new(Rc::downgrade(&self.inner), NodeId::Root(name.to_string()))
    }

    pub fn transact<R>(&self, f: impl FnOnce(&mut Transaction<'_>) -> R) -> Result<R, DocError> {
        self.transact_with(None, f)
    }

    /// Run `f` atomically. Observers see one notification tagged with
    /// `origin` once `f` returns. Whatever `f` applied is committed even when
    /// it reports an error of its own.
    pub fn transact_with<R>(
        &self,
        origin: Option<Value>,
        f: impl FnOnce(&mut Transaction<'_>) -> R,
    ) -> Result<R, DocError> {
        let state = self
            .inner
            .state
            .try_borrow_mut()
            .map_err(|_| DocError::TransactionInProgress)?;
        let mut txn = Transaction::new(state, origin);
        let result = f(&mut txn);
        if let Some(commit) = txn.commit() {
            self.dispatch(commit);
        }
        Ok(result)
    }

    /// Replay a patch produced by another replica. Returns `false` when the
    /// patch was already applied.
    ///
    /// Patches of one session must arrive in sequence order; a patch that
    /// skips ahead is rejected with [`DocError::SequenceGap`] and can be
    /// replayed once the missing ones were applied. A patch that does not
    /// apply cleanly changes nothing.
    pub fn apply_update(&self, patch: &Patch) -> Result<bool, DocError> {
        self.apply_update_with(patch, None)
    }

    pub fn apply_update_with(&self, patch: &Patch, origin: Option<Value>) -> Result<bool, DocError> {
        self.transact_with(origin, |txn| txn.apply_remote(patch))?
    }

    /// Highest sequence number applied per session.
    pub fn state_vector(&self) -> Result<BTreeMap<u64, u64>, DocError> {
        let state = self
            .inner
            .state
            .try_borrow()
            .map_err(|_| DocError::TransactionInProgress)?;
        Ok(state.seen.iter().map(|(k, v)| (*k, *v)).collect())
    }

    /// Register a listener for every committed patch, local or replayed.
    pub fn on_update<F>(&self, listener: F) -> u64
    where
        F: Fn(&Patch) + 'static,
    {
        let id = self.next_listener_id();
        self.inner
            .update_listeners
            .borrow_mut()
            .insert(id, Rc::new(listener));
        id
    }

    pub fn off_update(&self, listener_id: u64) -> bool {
        self.inner
            .update_listeners
            .borrow_mut()
            .remove(&listener_id)
            .is_some()
    }

    pub(crate) fn observe_deep<F>(&self, node: NodeId, observer: F) -> u64
    where
        F: Fn(&TransactionEvent) + 'static,
    {
        let id = self.next_listener_id();
        self.inner
            .observers
            .borrow_mut()
            .insert(id, (node, Rc::new(observer)));
        id
    }

    pub(crate) fn unobserve_deep(&self, observer_id: u64) -> bool {
        self.inner
            .observers
            .borrow_mut()
            .remove(&observer_id)
            .is_some()
    }

    fn next_listener_id(&self) -> u64 {
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id.saturating_add(1));
        id
    }

    fn dispatch(&self, commit: Commit) {
        let Commit { event, affected } = commit;
        debug!(
            sid = event.patch.sid,
            seq = event.patch.seq,
            ops = event.patch.ops.len(),
            local = event.local,
            "transaction committed"
        );
        let observers: Vec<DeepObserver> = self
            .inner
            .observers
            .borrow()
            .values()
            .filter(|(node, _)| affected.contains(node))
            .map(|(_, observer)| Rc::clone(observer))
            .collect();
        for observer in observers {
            observer(&event);
        }
        let listeners: Vec<UpdateListener> =
            self.inner.update_listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener(&event.patch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::Entry;
    use serde_json::json;
    use std::cell::RefCell;

    #[test]
    fn empty_transaction_commits_nothing() {
        let doc = Doc::with_session_id(70_000);
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        doc.on_update(move |_| counter.set(counter.get() + 1));
        doc.transact(|_| ()).unwrap();
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn nested_transaction_is_rejected() {
        let doc = Doc::with_session_id(70_000);
        let inner = doc.clone();
        let nested = doc.transact(|_| inner.transact(|_| ())).unwrap();
        assert_eq!(nested, Err(DocError::TransactionInProgress));
    }

    #[test]
    fn nested_prelims_become_nodes() {
        let doc = Doc::with_session_id(70_000);
        let root = doc.root("store");
        doc.transact(|txn| {
            root.set(txn, "room", Prelim::from(json!({"users": ["amy"]})))
        })
        .unwrap()
        .unwrap();

        doc.transact(|txn| {
            let Some(Entry::Map(room)) = root.get(txn, "room") else {
                panic!("room should be a map node");
            };
            assert!(matches!(room.get(txn, "users"), Some(Entry::Array(_))));
        })
        .unwrap();
        assert_eq!(root.to_value().unwrap(), Value::from(json!({"room": {"users": ["amy"]}})));
    }

    #[test]
    fn deep_observer_fires_once_per_transaction_with_origin() {
        let doc = Doc::with_session_id(70_000);
        let root = doc.root("store");
        let seen: Rc<RefCell<Vec<Option<Value>>>> = Rc::default();
        let sink = Rc::clone(&seen);
        root.observe_deep(move |event| sink.borrow_mut().push(event.origin.clone()))
            .unwrap();

        doc.transact_with(Some(Value::from("mine")), |txn| {
            root.set(txn, "a", Value::from(1))?;
            root.set(txn, "b", Prelim::from(json!({"c": [1, 2]})))
        })
        .unwrap()
        .unwrap();

        assert_eq!(*seen.borrow(), vec![Some(Value::from("mine"))]);
    }

    #[test]
    fn nested_change_notifies_root_observer() {
        let doc = Doc::with_session_id(70_000);
        let root = doc.root("store");
        doc.transact(|txn| root.set(txn, "list", Prelim::from(json!([1]))))
            .unwrap()
            .unwrap();
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        root.observe_deep(move |_| counter.set(counter.get() + 1)).unwrap();

        doc.transact(|txn| {
            let Some(Entry::Array(list)) = root.get(txn, "list") else {
                panic!("list should be an array node");
            };
            list.push(txn, Value::from(2))
        })
        .unwrap()
        .unwrap();

        assert_eq!(count.get(), 1);
        assert_eq!(root.to_value().unwrap(), Value::from(json!({"list": [1, 2]})));
    }

    #[test]
    fn replaying_a_patch_twice_is_a_no_op() {
        let a = Doc::with_session_id(70_000);
        let b = Doc::with_session_id(80_000);
        let patches: Rc<RefCell<Vec<Patch>>> = Rc::default();
        let sink = Rc::clone(&patches);
        a.on_update(move |p| sink.borrow_mut().push(p.clone()));

        let root = a.root("store");
        a.transact(|txn| root.set(txn, "count", Value::from(1)))
            .unwrap()
            .unwrap();

        let patch = patches.borrow()[0].clone();
        assert!(b.apply_update(&patch).unwrap());
        assert!(!b.apply_update(&patch).unwrap());
        assert_eq!(b.root("store").to_value().unwrap(), Value::from(json!({"count": 1})));
        assert_eq!(b.state_vector().unwrap().get(&70_000), Some(&1));
    }

    #[test]
    fn observers_may_open_transactions() {
        let doc = Doc::with_session_id(70_000);
        let root = doc.root("store");
        let reader = root.clone();
        let observed: Rc<RefCell<Option<Value>>> = Rc::default();
        let sink = Rc::clone(&observed);
        root.observe_deep(move |_| {
            *sink.borrow_mut() = reader.to_value().ok();
        })
        .unwrap();

        doc.transact(|txn| root.set(txn, "x", Value::Null))
            .unwrap()
            .unwrap();
        assert_eq!(*observed.borrow(), Some(Value::from(json!({"x": null}))));
    }
}
