//! Commonly used imports for convenience.
//!
//! # Example
//!
//! ```no_run
//! use simdb_store::prelude::*;
//!
//! let mut db = Database::create("session.db", false).unwrap();
//! db.create_table("readings", TableKind::Storing, &[
//!     FieldSpec::new("pressure", FieldKind::Float),
//! ]).unwrap();
//! ```

pub use crate::database::{Database, Line, LineSelection};
pub use crate::errors::{Result, StorageError};
pub use crate::recorder::Recorder;
pub use crate::schema::{FieldKind, FieldSpec, TableKind};
pub use crate::signals::SignalEvent;
pub use crate::value::{Array, Value};
