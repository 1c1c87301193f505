//! Replay of a closed recording through a rendering backend.
//!
//! Objects are discovered from their backing-table names and fed to
//! the backend in creation order, one row per step: row 1 creates
//! every object, each following row updates it, and the backend is
//! presented once per step.

use std::path::Path;

use simdb_store::Database;

use crate::backend::{Backend, ObjectHandle};
use crate::errors::RenderError;
use crate::objects::ObjectKind;

/// Step-synchronous reader over a recording produced by a
/// [`crate::Factory`].
pub struct Replay {
    database: Database,
    objects: Vec<ObjectHandle>,
}

impl Replay {
    /// Open a closed recording file and discover its visual objects.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let database = Database::load(path)?;
        let mut found: Vec<(usize, usize, ObjectKind, String)> = database
            .tables()
            .iter()
            .filter_map(|table| {
                ObjectKind::parse_table_name(table)
                    .map(|(kind, factory, object)| (factory, object, kind, table.to_string()))
            })
            .collect();
        found.sort_by_key(|(factory, object, _, _)| (*factory, *object));

        let objects = found
            .into_iter()
            .enumerate()
            .map(|(id, (_, _, kind, table))| ObjectHandle { id, kind, table })
            .collect();
        Ok(Self { database, objects })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn objects(&self) -> &[ObjectHandle] {
        &self.objects
    }

    /// Number of replayable steps: the smallest row count over all
    /// object tables (they are equal in a well-formed recording).
    pub fn step_count(&self) -> Result<usize, RenderError> {
        let mut shortest = None;
        let mut longest = 0usize;
        for object in &self.objects {
            let rows = self.database.nb_lines(&object.table)?;
            shortest = Some(shortest.map_or(rows, |s: usize| s.min(rows)));
            longest = longest.max(rows);
        }
        let steps = shortest.unwrap_or(0);
        if longest > steps {
            tracing::warn!(
                steps,
                longest,
                "object tables have unequal row counts; replay stops at the shortest"
            );
        }
        Ok(steps)
    }

    /// Feed one step to the backend. Step numbers are 1-based.
    pub fn play_step(&self, backend: &mut dyn Backend, step: usize) -> Result<(), RenderError> {
        for object in &self.objects {
            let state = self
                .database
                .get_line(&object.table, step as i64, None, &[])?;
            if step == 1 {
                backend.create_object(object, &state)?;
            } else {
                backend.update_object(object, &state)?;
            }
        }
        backend.present(step)
    }

    /// Replay the whole recording. Returns the number of steps played.
    pub fn play(&self, backend: &mut dyn Backend) -> Result<usize, RenderError> {
        let steps = self.step_count()?;
        for step in 1..=steps {
            self.play_step(backend, step)?;
        }
        Ok(steps)
    }

    pub fn close(self) -> Result<(), RenderError> {
        Ok(self.database.close(false)?)
    }
}
