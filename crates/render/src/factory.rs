//! Sequential-identifier object factory.
//!
//! Each created object gets the next 0-based identifier and a backing
//! storing table named `{Kind}_{factory}_{object}` holding one row per
//! step. Updates within a step collapse into the last write;
//! [`Factory::render`] closes the step for every object at once, so
//! objects that were not updated still advance by one (default) row.
//!
//! Add all objects before the first `render` call: backing tables all
//! start at row 1, which keeps row `k` meaning step `k` during replay.

use simdb_store::{Database, Recorder, TableKind, Value};

use crate::errors::RenderError;
use crate::objects::{
    ArrowsSpec, ArrowsUpdate, MarkersSpec, MarkersUpdate, MeshSpec, MeshUpdate, ObjectKind,
    PointsSpec, PointsUpdate, TextSpec, TextUpdate,
};

struct ObjectEntry {
    kind: ObjectKind,
    table: String,
}

/// Factory creating and updating visual objects inside a database
/// recording session.
pub struct Factory {
    recorder: Recorder,
    objects: Vec<ObjectEntry>,
    instance: usize,
}

impl Factory {
    /// Wrap a database. The factory owns the recording session.
    pub fn new(database: Database) -> Self {
        Self::with_instance(database, 0)
    }

    /// Several factories can share one visualizer; `instance`
    /// namespaces their backing tables.
    pub fn with_instance(database: Database, instance: usize) -> Self {
        Self {
            recorder: Recorder::new(database),
            objects: Vec::new(),
            instance,
        }
    }

    pub fn database(&self) -> &Database {
        self.recorder.database()
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn kind_of(&self, object_id: usize) -> Option<ObjectKind> {
        self.objects.get(object_id).map(|o| o.kind)
    }

    /// Backing-table name of an object.
    pub fn table_of(&self, object_id: usize) -> Option<&str> {
        self.objects.get(object_id).map(|o| o.table.as_str())
    }

    /// Completed step boundaries so far.
    pub fn step(&self) -> usize {
        self.recorder.steps()
    }

    /// End the current step for every object of the factory.
    pub fn render(&mut self) -> Result<usize, RenderError> {
        Ok(self.recorder.end_step()?)
    }

    /// Close the recording session and the database file.
    pub fn close(self) -> Result<(), RenderError> {
        Ok(self.recorder.close()?)
    }

    /// Give back the wrapped database, e.g. for replay in the same
    /// process.
    pub fn into_database(self) -> Database {
        self.recorder.into_database()
    }

    // ------------------------------------------------------------------
    // Object creation & update
    // ------------------------------------------------------------------

    pub fn add_mesh(&mut self, spec: MeshSpec) -> Result<usize, RenderError> {
        if spec.positions.is_empty() {
            return Err(RenderError::Shape("a mesh needs positions".to_string()));
        }
        if spec.cells.is_empty() {
            return Err(RenderError::Shape("a mesh needs cells".to_string()));
        }
        self.add_object(ObjectKind::Mesh, spec.into_values())
    }

    pub fn update_mesh(&mut self, object_id: usize, update: MeshUpdate) -> Result<(), RenderError> {
        let table = self.check_object(object_id, ObjectKind::Mesh)?;
        self.record(table, update.into_values())
    }

    pub fn add_points(&mut self, spec: PointsSpec) -> Result<usize, RenderError> {
        if spec.positions.is_empty() {
            return Err(RenderError::Shape("a point cloud needs positions".to_string()));
        }
        self.add_object(ObjectKind::Points, spec.into_values())
    }

    pub fn update_points(
        &mut self,
        object_id: usize,
        update: PointsUpdate,
    ) -> Result<(), RenderError> {
        let table = self.check_object(object_id, ObjectKind::Points)?;
        self.record(table, update.into_values())
    }

    pub fn add_arrows(&mut self, spec: ArrowsSpec) -> Result<usize, RenderError> {
        if spec.positions.rows() != spec.vectors.rows() {
            return Err(RenderError::Shape(format!(
                "positions and vectors must pair up: {} positions, {} vectors",
                spec.positions.rows(),
                spec.vectors.rows()
            )));
        }
        self.add_object(ObjectKind::Arrows, spec.into_values())
    }

    pub fn update_arrows(
        &mut self,
        object_id: usize,
        update: ArrowsUpdate,
    ) -> Result<(), RenderError> {
        let table = self.check_object(object_id, ObjectKind::Arrows)?;
        self.record(table, update.into_values())
    }

    pub fn add_markers(&mut self, spec: MarkersSpec) -> Result<usize, RenderError> {
        let attached = self.check_attachment(spec.normal_to)?;
        self.add_object(ObjectKind::Markers, spec.into_values(attached))
    }

    pub fn update_markers(
        &mut self,
        object_id: usize,
        update: MarkersUpdate,
    ) -> Result<(), RenderError> {
        let attached = match update.normal_to {
            Some(target) => Some(self.check_attachment(target)?),
            None => None,
        };
        let table = self.check_object(object_id, ObjectKind::Markers)?;
        self.record(table, update.into_values(attached))
    }

    pub fn add_text(&mut self, spec: TextSpec) -> Result<usize, RenderError> {
        self.add_object(ObjectKind::Text, spec.into_values())
    }

    pub fn update_text(&mut self, object_id: usize, update: TextUpdate) -> Result<(), RenderError> {
        let table = self.check_object(object_id, ObjectKind::Text)?;
        self.record(table, update.into_values())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn add_object(
        &mut self,
        kind: ObjectKind,
        values: Vec<(String, Value)>,
    ) -> Result<usize, RenderError> {
        let object_id = self.objects.len();
        let table = format!("{}_{}_{}", kind.as_str(), self.instance, object_id);
        self.recorder
            .database_mut()
            .create_table(&table, TableKind::Storing, &kind.columns())?;
        self.recorder.track(&table)?;
        self.recorder.record(&table, values)?;
        self.objects.push(ObjectEntry { kind, table });
        Ok(object_id)
    }

    fn check_object(&self, object_id: usize, kind: ObjectKind) -> Result<String, RenderError> {
        let entry = self
            .objects
            .get(object_id)
            .ok_or(RenderError::UnknownObject(object_id))?;
        if entry.kind != kind {
            return Err(RenderError::KindMismatch {
                id: object_id,
                expected: kind,
                actual: entry.kind,
            });
        }
        Ok(entry.table.clone())
    }

    fn check_attachment(&self, target: usize) -> Result<String, RenderError> {
        let entry = self
            .objects
            .get(target)
            .ok_or(RenderError::UnknownObject(target))?;
        if !matches!(entry.kind, ObjectKind::Mesh | ObjectKind::Points) {
            return Err(RenderError::InvalidAttachment {
                id: target,
                kind: entry.kind,
            });
        }
        Ok(entry.table.clone())
    }

    fn record(&mut self, table: String, values: Vec<(String, Value)>) -> Result<(), RenderError> {
        self.recorder.record(&table, values)?;
        Ok(())
    }

    /// Raw attribute write used by the host bridge.
    pub(crate) fn record_attr(
        &mut self,
        object_id: usize,
        attribute: &str,
        value: Value,
    ) -> Result<(), RenderError> {
        let entry = self
            .objects
            .get(object_id)
            .ok_or(RenderError::UnknownObject(object_id))?;
        if !entry.kind.updatable_attrs().contains(&attribute) {
            return Err(RenderError::InvalidBinding {
                attribute: attribute.to_string(),
                kind: entry.kind,
            });
        }
        let table = entry.table.clone();
        self.recorder
            .record(&table, vec![(attribute.to_string(), value)])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simdb_store::Array;
    use tempfile::tempdir;

    fn positions() -> Array {
        Array::from_rows(&[
            vec![0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
        ])
        .unwrap()
    }

    fn cells() -> Array {
        Array::from_rows(&[vec![0.0, 1.0, 2.0]]).unwrap()
    }

    fn scratch_factory(dir: &tempfile::TempDir) -> Factory {
        let db = Database::create(dir.path().join("viz.db"), false).unwrap();
        Factory::new(db)
    }

    #[test]
    fn test_object_ids_are_sequential_per_factory() {
        let dir = tempdir().unwrap();
        let mut factory = scratch_factory(&dir);

        let mesh = factory.add_mesh(MeshSpec::new(positions(), cells())).unwrap();
        let points = factory.add_points(PointsSpec::new(positions())).unwrap();
        let text = factory.add_text(TextSpec::new("step: 0")).unwrap();
        assert_eq!((mesh, points, text), (0, 1, 2));

        assert_eq!(factory.table_of(0), Some("Mesh_0_0"));
        assert_eq!(factory.table_of(1), Some("Points_0_1"));
        assert_eq!(factory.table_of(2), Some("Text_0_2"));
        factory.close().unwrap();
    }

    #[test]
    fn test_update_checks_id_and_kind() {
        let dir = tempdir().unwrap();
        let mut factory = scratch_factory(&dir);
        factory.add_mesh(MeshSpec::new(positions(), cells())).unwrap();

        let err = factory.update_points(0, PointsUpdate::default());
        assert!(matches!(
            err,
            Err(RenderError::KindMismatch {
                id: 0,
                expected: ObjectKind::Points,
                actual: ObjectKind::Mesh,
            })
        ));
        let err = factory.update_mesh(7, MeshUpdate::default());
        assert!(matches!(err, Err(RenderError::UnknownObject(7))));
        factory.close().unwrap();
    }

    #[test]
    fn test_updates_within_a_step_collapse_to_last_write() {
        let dir = tempdir().unwrap();
        let mut factory = scratch_factory(&dir);
        let id = factory.add_mesh(MeshSpec::new(positions(), cells())).unwrap();

        factory
            .update_mesh(
                id,
                MeshUpdate {
                    alpha: Some(0.25),
                    ..Default::default()
                },
            )
            .unwrap();
        factory
            .update_mesh(
                id,
                MeshUpdate {
                    alpha: Some(0.75),
                    ..Default::default()
                },
            )
            .unwrap();
        factory.render().unwrap();

        let db = factory.into_database();
        assert_eq!(db.nb_lines("Mesh_0_0").unwrap(), 1);
        let line = db.get_line("Mesh_0_0", 1, None, &[]).unwrap();
        assert_eq!(line.get("alpha"), Some(&Value::Float(0.75)));
        db.close(false).unwrap();
    }

    #[test]
    fn test_render_advances_every_object() {
        let dir = tempdir().unwrap();
        let mut factory = scratch_factory(&dir);
        let mesh = factory.add_mesh(MeshSpec::new(positions(), cells())).unwrap();
        factory.add_text(TextSpec::new("overlay")).unwrap();

        factory.render().unwrap(); // step 1: creation rows
        factory
            .update_mesh(
                mesh,
                MeshUpdate {
                    alpha: Some(0.5),
                    ..Default::default()
                },
            )
            .unwrap();
        factory.render().unwrap(); // step 2: mesh updated, text silent

        let db = factory.into_database();
        assert_eq!(db.nb_lines("Mesh_0_0").unwrap(), 2);
        assert_eq!(db.nb_lines("Text_0_1").unwrap(), 2);
        // The silent text advanced with a default row.
        let line = db.get_line("Text_0_1", 2, None, &[]).unwrap();
        assert_eq!(line.get("content"), Some(&Value::Null));
        db.close(false).unwrap();
    }

    #[test]
    fn test_markers_attach_to_mesh_or_points_only() {
        let dir = tempdir().unwrap();
        let mut factory = scratch_factory(&dir);
        let mesh = factory.add_mesh(MeshSpec::new(positions(), cells())).unwrap();
        let text = factory.add_text(TextSpec::new("overlay")).unwrap();

        let id = factory
            .add_markers(MarkersSpec::new(mesh, Array::from_vec(vec![0.0])))
            .unwrap();
        let db = factory.database();
        let line = db.get_line(factory.table_of(id).unwrap(), 1, None, &[]).unwrap();
        assert_eq!(
            line.get("normal_to"),
            Some(&Value::Text("Mesh_0_0".to_string()))
        );

        let err = factory.add_markers(MarkersSpec::new(text, Array::from_vec(vec![0.0])));
        assert!(matches!(
            err,
            Err(RenderError::InvalidAttachment {
                kind: ObjectKind::Text,
                ..
            })
        ));
        factory.close().unwrap();
    }

    #[test]
    fn test_arrows_shape_validation_fails_before_any_write() {
        let dir = tempdir().unwrap();
        let mut factory = scratch_factory(&dir);
        let err = factory.add_arrows(ArrowsSpec::new(
            positions(),
            Array::from_rows(&[vec![1.0, 0.0, 0.0]]).unwrap(),
        ));
        assert!(matches!(err, Err(RenderError::Shape(_))));
        assert_eq!(factory.object_count(), 0);
        assert!(factory.database().tables().is_empty());
        factory.close().unwrap();
    }
}
