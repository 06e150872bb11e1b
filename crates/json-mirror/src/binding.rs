//! Binding between a [`Store`] and a root map of a shared document.
//!
//! Local writes go through a [`Setter`], which updates the store and then
//! patches the shared root in one transaction. Committed shared changes,
//! local or replayed from another replica, are patched back into the store.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use json_mirror_doc::{Doc, MapRef, Value};
use tracing::{debug, error};

use crate::error::MirrorError;
use crate::patch_local::patch_local;
use crate::patch_shared::{patch_shared, SharedNode};
use crate::store::{Store, WeakStore};

// ── Options ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorOptions {
    /// Name of the shared root map that holds the mirrored state.
    pub root_name: String,
    /// Tag attached to every transaction the setter opens.
    pub transaction_origin: Option<Value>,
}

impl MirrorOptions {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            root_name: root_name.into(),
            transaction_origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<Value>) -> Self {
        self.transaction_origin = Some(origin.into());
        self
    }
}

// ── Setter ────────────────────────────────────────────────────────────────

struct SharedTarget {
    doc: Doc,
    root: MapRef,
    origin: Option<Value>,
}

impl SharedTarget {
    fn push(&self, state: &Value) -> Result<(), MirrorError> {
        let node = SharedNode::Map(self.root.clone());
        self.doc
            .transact_with(self.origin.clone(), |txn| patch_shared(txn, &node, state))??;
        Ok(())
    }
}

/// Writes to a store and, when bound, to its shared root.
///
/// Handed to the store initializer so actions can capture it. The setter
/// holds the store weakly.
#[derive(Clone)]
pub struct Setter {
    store: WeakStore,
    target: Option<Rc<SharedTarget>>,
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("bound", &self.target.is_some())
            .finish()
    }
}

impl Setter {
    fn upgrade(&self) -> Result<Store, MirrorError> {
        self.store.upgrade().ok_or(MirrorError::StoreDropped)
    }

    fn push(&self, store: &Store) -> Result<(), MirrorError> {
        match &self.target {
            Some(target) => target.push(&store.get()),
            None => Ok(()),
        }
    }

    /// Shallow-merge `partial` into the state.
    pub fn set(&self, partial: Value) -> Result<(), MirrorError> {
        self.set_state(partial, false)
    }

    pub fn set_state(&self, partial: Value, replace: bool) -> Result<(), MirrorError> {
        let store = self.upgrade()?;
        store.set_state(partial, replace);
        self.push(&store)
    }

    pub fn set_with<F>(&self, f: F, replace: bool) -> Result<(), MirrorError>
    where
        F: FnOnce(&Value) -> Value,
    {
        let store = self.upgrade()?;
        store.set_with(f, replace);
        self.push(&store)
    }

    pub fn produce<F>(&self, f: F) -> Result<(), MirrorError>
    where
        F: FnOnce(&mut Value),
    {
        let store = self.upgrade()?;
        store.produce(f);
        self.push(&store)
    }

    pub fn get(&self) -> Result<Value, MirrorError> {
        Ok(self.upgrade()?.get())
    }
}

/// Build an unbound store from `initializer`.
pub fn create<F>(initializer: F) -> Store
where
    F: FnOnce(&Setter) -> Value,
{
    let store = Store::new(Value::Undefined);
    let setter = Setter {
        store: store.downgrade(),
        target: None,
    };
    store.replace(initializer(&setter));
    store
}

// ── Binding ───────────────────────────────────────────────────────────────

/// A store bound to a shared root. Dropping the handle does not detach the
/// observer; call [`unbind`](Self::unbind) for that.
pub struct MirrorHandle {
    doc: Doc,
    store: Store,
    setter: Setter,
    root: MapRef,
    observer_id: u64,
    last_error: Rc<RefCell<Option<MirrorError>>>,
}

impl fmt::Debug for MirrorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorHandle")
            .field("root", self.root.id())
            .field("observer_id", &self.observer_id)
            .finish()
    }
}

impl MirrorHandle {
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn setter(&self) -> &Setter {
        &self.setter
    }

    pub fn root(&self) -> &MapRef {
        &self.root
    }

    pub fn get(&self) -> Value {
        self.store.get()
    }

    pub fn call(&self, name: &str) -> Result<(), MirrorError> {
        self.store.call(name)
    }

    /// The last failure of the shared-to-local path, if any.
    pub fn last_error(&self) -> Option<MirrorError> {
        self.last_error.borrow().clone()
    }

    pub fn take_error(&self) -> Option<MirrorError> {
        self.last_error.borrow_mut().take()
    }

    /// Stop mirroring shared changes into the store. The setter keeps
    /// writing to the shared root.
    pub fn unbind(&self) -> bool {
        self.root.unobserve_deep(self.observer_id)
    }
}

/// Bind a new store to the root map named in `options`.
///
/// An empty root is seeded from the initial state. A root that already holds
/// data wins: its state is patched into the initial state, keeping local
/// actions.
pub fn bind<F>(doc: &Doc, initializer: F, options: MirrorOptions) -> Result<MirrorHandle, MirrorError>
where
    F: FnOnce(&Setter) -> Value,
{
    let root = doc.root(&options.root_name);
    let store = Store::new(Value::Undefined);
    let target = Rc::new(SharedTarget {
        doc: doc.clone(),
        root: root.clone(),
        origin: options.transaction_origin.clone(),
    });
    let setter = Setter {
        store: store.downgrade(),
        target: Some(Rc::clone(&target)),
    };
    let initial = initializer(&setter);
    store.replace(initial.clone());

    let shared = root.to_value()?;
    if shared == Value::empty_object() {
        debug!(root = %options.root_name, "seeding shared root from initial state");
        target.push(&initial)?;
    } else {
        debug!(root = %options.root_name, "adopting shared root state");
        store.replace(patch_local(&initial, &shared)?);
    }

    let last_error: Rc<RefCell<Option<MirrorError>>> = Rc::default();
    let observer_id = {
        let store = store.downgrade();
        let root_handle = root.clone();
        let sink = Rc::clone(&last_error);
        let root_name = options.root_name.clone();
        root.observe_deep(move |event| {
            let Some(store) = store.upgrade() else {
                return;
            };
            let result = root_handle
                .to_value()
                .map_err(MirrorError::from)
                .and_then(|shared| patch_local(&store.get(), &shared))
                .map(|next| store.replace(next));
            if let Err(err) = result {
                error!(
                    root = %root_name,
                    local = event.local,
                    error = %err,
                    "failed to mirror shared changes into the store"
                );
                *sink.borrow_mut() = Some(err);
            }
        })?
    };

    Ok(MirrorHandle {
        doc: doc.clone(),
        store,
        setter,
        root,
        observer_id,
        last_error,
    })
}

/// Bind a new store to a fresh document.
pub fn mirror<F>(initializer: F, options: MirrorOptions) -> Result<MirrorHandle, MirrorError>
where
    F: FnOnce(&Setter) -> Value,
{
    bind(&Doc::new(), initializer, options)
}
