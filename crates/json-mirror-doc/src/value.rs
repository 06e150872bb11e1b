//! Plain tree values.
//!
//! A [`Value`] is what application code reads and writes. Composite payloads
//! are reference counted, so a patched tree can hand unchanged subtrees over
//! by identity and readers can detect "nothing changed" with [`Value::ptr_eq`].

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Number;

/// Keyed payload of [`Value::Object`].
pub type Object = IndexMap<String, Value>;

// ── Opaque ────────────────────────────────────────────────────────────────

/// A leaf that is never diffed structurally and never written into a shared
/// document. Two opaque values are equal only when they are the same
/// allocation.
#[derive(Clone)]
pub struct Opaque(Rc<dyn Any>);

impl Opaque {
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(a: &Opaque, b: &Opaque) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&a.0), Rc::as_ptr(&b.0))
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({:p})", Rc::as_ptr(&self.0))
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        Opaque::ptr_eq(self, other)
    }
}

// ── Slot ──────────────────────────────────────────────────────────────────

/// Addresses one child of a composite: a key of an object or an index of an
/// array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Key(String),
    Index(usize),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Key(key) => write!(f, "{key}"),
            Slot::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Slot {
    fn from(key: &str) -> Self {
        Slot::Key(key.to_string())
    }
}

impl From<String> for Slot {
    fn from(key: String) -> Self {
        Slot::Key(key)
    }
}

impl From<usize> for Slot {
    fn from(index: usize) -> Self {
        Slot::Index(index)
    }
}

// ── Value ─────────────────────────────────────────────────────────────────

/// Coarse classification used by the diff engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    Opaque,
    Array,
    Object,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Scalar => "scalar",
            ValueKind::Opaque => "opaque",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Opaque(Opaque),
    Array(Rc<Vec<Value>>),
    Object(Rc<Object>),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }

    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(Rc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn empty_object() -> Self {
        Value::Object(Rc::new(Object::new()))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Opaque(_) => ValueKind::Opaque,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
            _ => ValueKind::Scalar,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Value::Opaque(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Both values are composites of the same kind (object/object or
    /// array/array).
    pub fn same_composite_kind(&self, other: &Value) -> bool {
        matches!(
            (self, other),
            (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_))
        )
    }

    /// Identity comparison: composites and opaque leaves compare by
    /// allocation, scalars by value.
    pub fn ptr_eq(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
            (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
            (Value::Opaque(x), Value::Opaque(y)) => Opaque::ptr_eq(x, y),
            (Value::Array(_) | Value::Object(_) | Value::Opaque(_), _)
            | (_, Value::Array(_) | Value::Object(_) | Value::Opaque(_)) => false,
            _ => a == b,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Value::Opaque(o) => Some(o),
            _ => None,
        }
    }

    /// Copy-on-write access to an object payload. Clones the map only when
    /// it is shared with another tree.
    pub fn object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Value::Object(map) => Some(Rc::make_mut(map)),
            _ => None,
        }
    }

    /// Copy-on-write access to an array payload.
    pub fn array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(items) => Some(Rc::make_mut(items)),
            _ => None,
        }
    }

    pub fn get(&self, slot: &Slot) -> Option<&Value> {
        match (self, slot) {
            (Value::Object(map), Slot::Key(key)) => map.get(key),
            (Value::Array(items), Slot::Index(index)) => items.get(*index),
            _ => None,
        }
    }

    pub fn get_key(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Follow a path of slots from this value.
    pub fn pointer(&self, path: &[Slot]) -> Option<&Value> {
        path.iter().try_fold(self, |cur, slot| cur.get(slot))
    }

    /// Copy-on-write access to the child at `slot`.
    pub fn get_mut(&mut self, slot: &Slot) -> Option<&mut Value> {
        match (self, slot) {
            (Value::Object(map), Slot::Key(key)) => Rc::make_mut(map).get_mut(key),
            (Value::Array(items), Slot::Index(index)) => Rc::make_mut(items).get_mut(*index),
            _ => None,
        }
    }

    /// Render as JSON. `Undefined` members and opaque leaves are skipped,
    /// and become `null` where skipping is impossible (array items, root).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Opaque(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined | Value::Opaque(_)))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Opaque::ptr_eq(a, b),
            // IndexMap equality ignores insertion order.
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::object(map.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Value::Opaque(o)
    }
}
