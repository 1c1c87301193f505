//! # Storage Crate
//!
//! The `store` crate provides the storage core of simdb: a typed
//! convenience layer over SQLite for recording numerical-simulation
//! sessions. It manages table schemas with dynamic field addition,
//! keeps independently-updated tables aligned one-row-per-step,
//! dispatches ordered pre/post-insert signals, and merges or exports
//! closed database files.

pub mod database;
pub mod errors;
pub mod export;
pub mod maintenance;
pub mod prelude;
pub mod recorder;
pub mod schema;
pub mod signals;
pub mod value;

pub use database::{Architecture, Database, Line, LineSelection};
pub use errors::{Result, StorageError};
pub use recorder::Recorder;
pub use schema::{harmonize_name, FieldKind, FieldSpec, TableKind};
pub use signals::{Handler, SignalEvent, SignalKind};
pub use value::{Array, Value};
