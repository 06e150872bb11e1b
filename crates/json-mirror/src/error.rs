use json_mirror_doc::{DocError, Slot};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MirrorError {
    /// Two trees disagree on the shape of a slot that was expected to be
    /// walked recursively.
    #[error("kind mismatch at {path}: expected {expected}, found {found}")]
    KindMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("no action named {0:?}")]
    NotAnAction(String),
    #[error("store was dropped")]
    StoreDropped,
    #[error("shared document error: {0}")]
    Doc(#[from] DocError),
}

impl MirrorError {
    pub(crate) fn kind_mismatch(path: &[Slot], expected: &'static str, found: &'static str) -> Self {
        MirrorError::KindMismatch {
            path: format_path(path),
            expected,
            found,
        }
    }
}

/// Render a slot path as a JSON pointer.
pub(crate) fn format_path(path: &[Slot]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.iter().map(|slot| format!("/{slot}")).collect()
}
