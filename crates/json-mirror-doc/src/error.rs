use thiserror::Error;

use crate::patch::NodeId;

/// Errors returned by shared document operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocError {
    #[error("a transaction is already in progress on this document")]
    TransactionInProgress,
    #[error("document was dropped")]
    DocumentDropped,
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    #[error("node {node} is not {expected}")]
    WrongNodeType { node: NodeId, expected: &'static str },
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("patch {found} of session {sid} arrived before patch {expected}")]
    SequenceGap { sid: u64, expected: u64, found: u64 },
    #[error("opaque values cannot be stored in a shared document")]
    OpaqueValue,
}
