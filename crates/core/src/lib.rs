//! Yard core types: declarative resource objects, ordered batches and the
//! error taxonomy shared by every crate that talks to the remote store.

#![forbid(unsafe_code)]

mod batch;
mod object;

pub use batch::ResourceBatch;
pub use object::{ObjectError, ObjectKey, ResourceObject, TypedResource};

pub use kube::core::GroupVersionKind;

/// Errors returned by the remote object store.
///
/// `NotFound` and `NoMatch` are expected outcomes in several code paths
/// (create-vs-update, already-deleted), so callers match on them instead of
/// treating every error as fatal.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("no matches for kind {kind} in group {group:?}")]
    NoMatch { group: String, kind: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("api error ({code}): {message}")]
    Api { code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// The server does not serve the object's kind (typically a CRD that is gone).
    pub fn is_no_match(&self) -> bool {
        matches!(self, StoreError::NoMatch { .. })
    }
}

pub mod prelude {
    pub use super::{GroupVersionKind, ObjectKey, ResourceBatch, ResourceObject, StoreError, TypedResource};
}
