//! Two-way mirroring between a local state tree and a shared document.
//!
//! The engine is three pure-ish pieces:
//!
//! * [`compute_changes`] turns two plain trees into a per-slot change list,
//! * [`patch_shared`] applies a plain tree to a shared node inside a
//!   transaction,
//! * [`patch_local`] applies a plain tree to a local tree, sharing every
//!   unchanged subtree by identity.
//!
//! [`bind`] wires them to a [`Store`]: setter writes flow into the shared
//! root, committed shared changes flow back into the store.
//!
//! ```no_run
//! use json_mirror::{action, bind, MirrorOptions, Value};
//! use json_mirror_doc::Doc;
//!
//! let doc = Doc::new();
//! let handle = bind(
//!     &doc,
//!     |set| {
//!         let set = set.clone();
//!         Value::object([
//!             ("count", Value::from(0)),
//!             ("inc", action(move || {
//!                 set.set_with(|s| {
//!                     let n = s.get_key("count").and_then(Value::as_i64).unwrap_or(0);
//!                     Value::object([("count", Value::from(n + 1))])
//!                 }, false)
//!             })),
//!         ])
//!     },
//!     MirrorOptions::new("counter").with_origin("ui"),
//! )?;
//! handle.call("inc")?;
//! # Ok::<(), json_mirror::MirrorError>(())
//! ```

mod binding;
mod change;
mod error;
mod patch_local;
mod patch_shared;
mod seq_diff;
mod store;

pub use binding::{bind, create, mirror, MirrorHandle, MirrorOptions, Setter};
pub use change::{compute_changes, Change, ChangeKind};
pub use error::MirrorError;
pub use patch_local::patch_local;
pub use patch_shared::{patch_shared, to_prelim, SharedNode};
pub use store::{action, Action, Store, WeakStore};

pub use json_mirror_doc::{Opaque, Slot, Value};
