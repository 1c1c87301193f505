//! # Render Crate
//!
//! The `render` crate turns simdb recordings into rendering-backend
//! calls. The [`factory::Factory`] creates and updates visual objects
//! backed by storing tables (one table per object, one row per step);
//! [`replay::Replay`] drives any [`backend::Backend`] from a closed
//! recording; [`host`] bridges an externally-owned simulation loop
//! into a factory or plain recorder.

pub mod backend;
pub mod errors;
pub mod factory;
pub mod host;
pub mod objects;
pub mod replay;

pub use backend::{Backend, NullBackend, ObjectHandle};
pub use errors::RenderError;
pub use factory::Factory;
pub use objects::{
    ArrowsSpec, ArrowsUpdate, MarkersSpec, MarkersUpdate, MeshSpec, MeshUpdate, ObjectKind,
    PointsSpec, PointsUpdate, TextSpec, TextUpdate,
};
pub use replay::Replay;
