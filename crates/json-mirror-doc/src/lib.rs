//! Plain values and a small in-process shared document for json-mirror.
//!
//! The document exposes the surface a replicated JSON document offers to
//! its embedders: named root maps, keyed and ordered nodes, atomic
//! transactions tagged with an origin, deep observers and patch relay
//! between replicas. It does not resolve concurrent edits.

pub mod clock;
mod doc;
mod error;
mod handles;
pub mod patch;
pub mod value;

pub use doc::{Doc, Transaction, TransactionEvent};
pub use error::DocError;
pub use handles::{ArrayRef, Entry, MapRef};
pub use patch::{Content, NodeId, Op, Patch, Prelim};
pub use value::{Object, Opaque, Slot, Value, ValueKind};

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
