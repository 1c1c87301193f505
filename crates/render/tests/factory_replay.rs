//! Integration test: record a session through the factory, close the
//! file, then replay it through a backend.

use simdb_store::{Array, Database, Value};
use simdb_render::{
    Backend, Factory, MeshSpec, MeshUpdate, ObjectHandle, ObjectKind, PointsSpec, Replay,
    RenderError, TextSpec,
};
use tempfile::tempdir;

/// Backend that records every call it receives.
#[derive(Default)]
struct TraceBackend {
    created: Vec<(usize, ObjectKind)>,
    updates: Vec<(usize, usize)>, // (step, object id)
    presented: Vec<usize>,
    alphas: Vec<f64>,
}

impl Backend for TraceBackend {
    fn create_object(
        &mut self,
        object: &ObjectHandle,
        state: &simdb_store::Line,
    ) -> Result<(), RenderError> {
        if object.kind == ObjectKind::Mesh {
            if let Some(Value::Float(alpha)) = state.get("alpha") {
                self.alphas.push(*alpha);
            }
        }
        self.created.push((object.id, object.kind));
        Ok(())
    }

    fn update_object(
        &mut self,
        object: &ObjectHandle,
        state: &simdb_store::Line,
    ) -> Result<(), RenderError> {
        if object.kind == ObjectKind::Mesh {
            if let Some(Value::Float(alpha)) = state.get("alpha") {
                self.alphas.push(*alpha);
            }
        }
        self.updates.push((self.presented.len() + 1, object.id));
        Ok(())
    }

    fn present(&mut self, step: usize) -> Result<(), RenderError> {
        self.presented.push(step);
        Ok(())
    }
}

fn triangle() -> (Array, Array) {
    (
        Array::from_rows(&[
            vec![0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
        ])
        .unwrap(),
        Array::from_rows(&[vec![0.0, 1.0, 2.0]]).unwrap(),
    )
}

#[test]
fn test_record_close_replay() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("scene.db");

    // Record three steps with three objects.
    {
        let db = Database::create(&db_path, false).unwrap();
        let mut factory = Factory::new(db);
        let (positions, cells) = triangle();
        let mesh = factory.add_mesh(MeshSpec::new(positions.clone(), cells)).unwrap();
        factory.add_points(PointsSpec::new(positions)).unwrap();
        factory.add_text(TextSpec::new("step overlay")).unwrap();
        factory.render().unwrap();

        for step in 2..=3 {
            factory
                .update_mesh(
                    mesh,
                    MeshUpdate {
                        alpha: Some(1.0 / step as f64),
                        ..Default::default()
                    },
                )
                .unwrap();
            factory.render().unwrap();
        }
        factory.close().unwrap();
    }

    // Replay through a tracing backend.
    let replay = Replay::open(&db_path).unwrap();
    assert_eq!(replay.objects().len(), 3);
    assert_eq!(replay.step_count().unwrap(), 3);

    let mut backend = TraceBackend::default();
    let played = replay.play(&mut backend).unwrap();
    assert_eq!(played, 3);

    // Step 1 creates everything in creation order.
    assert_eq!(
        backend.created,
        vec![
            (0, ObjectKind::Mesh),
            (1, ObjectKind::Points),
            (2, ObjectKind::Text),
        ]
    );
    // Steps 2 and 3 update all three objects each.
    assert_eq!(backend.updates.len(), 6);
    assert_eq!(backend.presented, vec![1, 2, 3]);
    // The mesh's recorded opacity curve came back in step order.
    assert_eq!(backend.alphas, vec![1.0, 0.5, 1.0 / 3.0]);

    replay.close().unwrap();
}

#[test]
fn test_replay_ignores_non_object_tables() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("mixed.db");

    {
        let mut db = Database::create(&db_path, false).unwrap();
        db.add_data(
            "metrics",
            vec![("x".to_string(), Value::Integer(1))],
        )
        .unwrap();
        let mut factory = Factory::new(db);
        let (positions, cells) = triangle();
        factory.add_mesh(MeshSpec::new(positions, cells)).unwrap();
        factory.render().unwrap();
        factory.close().unwrap();
    }

    let replay = Replay::open(&db_path).unwrap();
    assert_eq!(replay.objects().len(), 1);
    assert_eq!(replay.objects()[0].table, "Mesh_0_0");
    replay.close().unwrap();
}
