//! Rendering collaborator boundary.
//!
//! The factory and replay layers never touch a graphics pipeline
//! themselves: they hand fully-resolved per-step object state to a
//! [`Backend`], which translates it into calls on whatever rendering
//! library hosts the session.

use simdb_store::Line;

use crate::errors::RenderError;
use crate::objects::ObjectKind;

/// Identity of a visual object as seen by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHandle {
    /// Creation-order identifier.
    pub id: usize,
    pub kind: ObjectKind,
    /// Backing-table name, `{Kind}_{factory}_{object}`.
    pub table: String,
}

/// A rendering backend driven step by step.
///
/// `create_object` is called once per object with its first recorded
/// state, `update_object` once per object per subsequent step, and
/// `present` once per step after all objects were fed. Recorded rows
/// are sparse: a NULL cell means the attribute did not change that
/// step.
pub trait Backend {
    fn create_object(&mut self, object: &ObjectHandle, state: &Line) -> Result<(), RenderError>;

    fn update_object(&mut self, object: &ObjectHandle, state: &Line) -> Result<(), RenderError>;

    fn present(&mut self, step: usize) -> Result<(), RenderError>;
}

/// Backend that drops everything, for offscreen or storage-only
/// sessions.
#[derive(Debug, Default)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn create_object(&mut self, _object: &ObjectHandle, _state: &Line) -> Result<(), RenderError> {
        Ok(())
    }

    fn update_object(&mut self, _object: &ObjectHandle, _state: &Line) -> Result<(), RenderError> {
        Ok(())
    }

    fn present(&mut self, _step: usize) -> Result<(), RenderError> {
        Ok(())
    }
}
