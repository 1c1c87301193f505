use thiserror::Error;

use crate::objects::ObjectKind;

/// Error type for factory, replay and host-bridge operations.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown object id {0}")]
    UnknownObject(usize),

    #[error("object {id} is a {actual}, not a {expected}; use the matching update method instead")]
    KindMismatch {
        id: usize,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    #[error("markers can only attach to a mesh or points object, object {id} is a {kind}")]
    InvalidAttachment { id: usize, kind: ObjectKind },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("attribute '{attribute}' cannot be driven on a {kind} object")]
    InvalidBinding {
        attribute: String,
        kind: ObjectKind,
    },

    #[error("source object exposes no readable field '{0}'")]
    MissingSourceField(String),

    #[error("a probe is already registered for '{table}.{field}'")]
    DuplicateProbe { table: String, field: String },

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Storage(#[from] simdb_store::StorageError),
}
