//! A minimal local state container.
//!
//! Holds one [`Value`] tree, merges partial updates into it and notifies
//! subscribers whenever the tree is swapped for a different one.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use json_mirror_doc::{Opaque, Value};
use tracing::trace;

use crate::error::MirrorError;

type Listener = Rc<dyn Fn(&Value, &Value)>;

// ── Action ────────────────────────────────────────────────────────────────

/// A callable stored in the state tree. Actions are opaque leaves: the
/// shared tree never sees them and patching keeps them by identity.
#[derive(Clone)]
pub struct Action(Rc<dyn Fn() -> Result<(), MirrorError>>);

impl Action {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Result<(), MirrorError> + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn call(&self) -> Result<(), MirrorError> {
        (self.0)()
    }

    pub fn into_value(self) -> Value {
        Value::Opaque(Opaque::new(self))
    }

    pub fn from_value(value: &Value) -> Option<&Action> {
        value.as_opaque()?.downcast_ref::<Action>()
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({:p})", Rc::as_ptr(&self.0))
    }
}

/// Shorthand for `Action::new(f).into_value()`.
pub fn action<F>(f: F) -> Value
where
    F: Fn() -> Result<(), MirrorError> + 'static,
{
    Action::new(f).into_value()
}

// ── Store ─────────────────────────────────────────────────────────────────

struct StoreInner {
    state: RefCell<Value>,
    listeners: RefCell<BTreeMap<u64, Listener>>,
    next_listener_id: Cell<u64>,
}

#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl Store {
    pub fn new(initial: Value) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                state: RefCell::new(initial),
                listeners: RefCell::new(BTreeMap::new()),
                next_listener_id: Cell::new(1),
            }),
        }
    }

    /// Current state. Cheap: composite payloads are shared.
    pub fn get(&self) -> Value {
        self.inner.state.borrow().clone()
    }

    /// Merge `partial` into the state, or swap it in when `replace` is set
    /// or either side is not an object.
    pub fn set_state(&self, partial: Value, replace: bool) {
        let current = self.get();
        let next = match (replace, current, partial) {
            (false, mut current @ Value::Object(_), Value::Object(partial)) => {
                if let Some(map) = current.object_mut() {
                    for (key, value) in partial.iter() {
                        map.insert(key.clone(), value.clone());
                    }
                }
                current
            }
            (_, _, partial) => partial,
        };
        self.replace(next);
    }

    /// Like [`set_state`](Self::set_state) with a partial computed from the
    /// current state.
    pub fn set_with<F>(&self, f: F, replace: bool)
    where
        F: FnOnce(&Value) -> Value,
    {
        let partial = f(&self.get());
        self.set_state(partial, replace);
    }

    /// Edit a copy-on-write draft of the state. Subtrees the closure does not
    /// touch keep their identity.
    pub fn produce<F>(&self, f: F)
    where
        F: FnOnce(&mut Value),
    {
        let mut draft = self.get();
        f(&mut draft);
        self.replace(draft);
    }

    /// Swap the whole state. Subscribers are notified unless `next` is the
    /// current tree.
    pub fn replace(&self, next: Value) {
        let previous = {
            let mut state = self.inner.state.borrow_mut();
            if Value::ptr_eq(&state, &next) {
                return;
            }
            std::mem::replace(&mut *state, next.clone())
        };
        let listeners: Vec<Listener> = self.inner.listeners.borrow().values().cloned().collect();
        trace!(listeners = listeners.len(), "store state replaced");
        for listener in listeners {
            listener(&next, &previous);
        }
    }

    /// Register `listener(new, old)`.
    pub fn subscribe<F>(&self, listener: F) -> u64
    where
        F: Fn(&Value, &Value) + 'static,
    {
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id.saturating_add(1));
        self.inner.listeners.borrow_mut().insert(id, Rc::new(listener));
        id
    }

    pub fn unsubscribe(&self, listener_id: u64) -> bool {
        self.inner.listeners.borrow_mut().remove(&listener_id).is_some()
    }

    /// Invoke the action stored under the top-level key `name`.
    pub fn call(&self, name: &str) -> Result<(), MirrorError> {
        let state = self.get();
        let action = state
            .get_key(name)
            .and_then(Action::from_value)
            .cloned()
            .ok_or_else(|| MirrorError::NotAnAction(name.to_string()))?;
        action.call()
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore(Rc::downgrade(&self.inner))
    }
}

/// A store reference that does not keep the store alive.
#[derive(Clone)]
pub struct WeakStore(Weak<StoreInner>);

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(|inner| Store { inner })
    }
}
