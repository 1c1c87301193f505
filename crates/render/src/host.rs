//! Bridges into an externally-owned simulation loop.
//!
//! The host framework owns the scene graph and the stepping; these
//! controllers are registered as callback targets and pull named data
//! fields out of externally-owned components at each end-of-step
//! notification. Everything is single-threaded: sources are shared
//! through `Rc`, and the host is expected to call the bridges from
//! its own loop.

use std::rc::Rc;

use simdb_store::{Database, Recorder, TableKind, Value};

use crate::errors::RenderError;
use crate::factory::Factory;

/// A named-field view over an externally-owned component object.
///
/// `read_field` returns `None` for fields the component does not
/// expose; a registered field that turns unreadable mid-session reads
/// as NULL.
pub trait FieldSource {
    fn read_field(&self, field: &str) -> Option<Value>;
}

struct Probe {
    table: String,
    field: String,
    source: Rc<dyn FieldSource>,
    source_field: String,
}

/// Storage-side bridge: records component fields into tables, one row
/// per host step.
///
/// Probes are registered with [`HostRecorder::add_probe`]; the host
/// calls [`HostRecorder::on_step_end`] at the end of each step, which
/// reads every probe and closes the step across all probed tables.
pub struct HostRecorder {
    recorder: Recorder,
    probes: Vec<Probe>,
}

impl HostRecorder {
    pub fn new(database: Database) -> Self {
        Self {
            recorder: Recorder::new(database),
            probes: Vec::new(),
        }
    }

    pub fn database(&self) -> &Database {
        self.recorder.database()
    }

    /// Completed host steps so far.
    pub fn steps(&self) -> usize {
        self.recorder.steps()
    }

    /// Record `source_field` of `source` into `table.field` at every
    /// step. Missing tables and fields are created, with the field
    /// kind inferred from the source's current value.
    pub fn add_probe(
        &mut self,
        table_name: &str,
        field_name: &str,
        source: Rc<dyn FieldSource>,
        source_field: &str,
    ) -> Result<(), RenderError> {
        let sample = source
            .read_field(source_field)
            .ok_or_else(|| RenderError::MissingSourceField(source_field.to_string()))?;

        let database = self.recorder.database_mut();
        let table = if database.has_table(table_name) {
            database.table_schema(table_name)?.name.clone()
        } else {
            database.create_table(table_name, TableKind::Storing, &[])?
        };
        if self
            .probes
            .iter()
            .any(|p| p.table == table && p.field == field_name)
        {
            return Err(RenderError::DuplicateProbe {
                table,
                field: field_name.to_string(),
            });
        }
        if database.table_schema(&table)?.field(field_name).is_none() {
            let kind = match &sample {
                Value::Integer(_) => simdb_store::FieldKind::Integer,
                Value::Float(_) => simdb_store::FieldKind::Float,
                Value::Text(_) => simdb_store::FieldKind::Text,
                Value::Boolean(_) => simdb_store::FieldKind::Boolean,
                Value::Timestamp(_) => simdb_store::FieldKind::Timestamp,
                Value::Array(_) => simdb_store::FieldKind::Array,
                Value::Null => {
                    return Err(RenderError::MissingSourceField(source_field.to_string()))
                }
            };
            database.create_fields(&table, &[simdb_store::FieldSpec::new(field_name, kind)])?;
        }
        self.recorder.track(&table)?;

        self.probes.push(Probe {
            table,
            field: field_name.to_string(),
            source,
            source_field: source_field.to_string(),
        });
        Ok(())
    }

    /// End-of-step notification: read every probe and close the step.
    pub fn on_step_end(&mut self) -> Result<usize, RenderError> {
        for probe in &self.probes {
            let value = match probe.source.read_field(&probe.source_field) {
                Some(value) => value,
                None => {
                    tracing::warn!(
                        table = %probe.table,
                        field = %probe.field,
                        "probed source field became unreadable, recording NULL"
                    );
                    Value::Null
                }
            };
            self.recorder
                .record(&probe.table, vec![(probe.field.clone(), value)])?;
        }
        Ok(self.recorder.end_step()?)
    }

    pub fn close(self) -> Result<(), RenderError> {
        Ok(self.recorder.close()?)
    }
}

struct Binding {
    object: usize,
    attribute: String,
    source: Rc<dyn FieldSource>,
    source_field: String,
}

/// Factory-side bridge: drives visual-object attributes from
/// component fields and renders once per host step.
pub struct FactoryBridge {
    factory: Factory,
    bindings: Vec<Binding>,
}

impl FactoryBridge {
    pub fn new(factory: Factory) -> Self {
        Self {
            factory,
            bindings: Vec::new(),
        }
    }

    /// The wrapped factory, for object creation during scene setup.
    pub fn factory_mut(&mut self) -> &mut Factory {
        &mut self.factory
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Drive `attribute` of `object_id` from `source_field` of
    /// `source` at every step. The attribute must be updatable on the
    /// object's kind.
    pub fn bind(
        &mut self,
        object_id: usize,
        attribute: &str,
        source: Rc<dyn FieldSource>,
        source_field: &str,
    ) -> Result<(), RenderError> {
        let kind = self
            .factory
            .kind_of(object_id)
            .ok_or(RenderError::UnknownObject(object_id))?;
        source
            .read_field(source_field)
            .ok_or_else(|| RenderError::MissingSourceField(source_field.to_string()))?;
        // Reject disabled-at-update attributes at registration time.
        if !kind.updatable_attrs().contains(&attribute) {
            return Err(RenderError::InvalidBinding {
                attribute: attribute.to_string(),
                kind,
            });
        }

        self.bindings.push(Binding {
            object: object_id,
            attribute: attribute.to_string(),
            source,
            source_field: source_field.to_string(),
        });
        Ok(())
    }

    /// End-of-step notification: apply all bindings and render.
    pub fn on_step_end(&mut self) -> Result<usize, RenderError> {
        for binding in &self.bindings {
            let value = binding
                .source
                .read_field(&binding.source_field)
                .unwrap_or(Value::Null);
            self.factory
                .record_attr(binding.object, &binding.attribute, value)?;
        }
        self.factory.render()
    }

    pub fn close(self) -> Result<(), RenderError> {
        self.factory.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    /// Fake externally-owned component exposing one scalar field.
    struct ScalarComponent {
        name: &'static str,
        value: Cell<f64>,
    }

    impl FieldSource for ScalarComponent {
        fn read_field(&self, field: &str) -> Option<Value> {
            (field == self.name).then(|| Value::Float(self.value.get()))
        }
    }

    #[test]
    fn test_host_recorder_records_one_row_per_step() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("host.db"), false).unwrap();
        let mut bridge = HostRecorder::new(db);

        let pressure = Rc::new(ScalarComponent {
            name: "pressure",
            value: Cell::new(0.0),
        });
        bridge
            .add_probe("readings", "pressure", pressure.clone(), "pressure")
            .unwrap();

        for step in 1..=3 {
            pressure.value.set(step as f64);
            bridge.on_step_end().unwrap();
        }
        assert_eq!(bridge.steps(), 3);

        let db = bridge.recorder.into_database();
        assert_eq!(db.nb_lines("readings").unwrap(), 3);
        let line = db.get_line("readings", 2, None, &[]).unwrap();
        assert_eq!(line.get("pressure"), Some(&Value::Float(2.0)));
        db.close(false).unwrap();
    }

    #[test]
    fn test_add_probe_validates_source_field_and_duplicates() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("host.db"), false).unwrap();
        let mut bridge = HostRecorder::new(db);

        let pressure = Rc::new(ScalarComponent {
            name: "pressure",
            value: Cell::new(0.0),
        });
        let err = bridge.add_probe("readings", "pressure", pressure.clone(), "velocity");
        assert!(matches!(err, Err(RenderError::MissingSourceField(_))));

        bridge
            .add_probe("readings", "pressure", pressure.clone(), "pressure")
            .unwrap();
        let err = bridge.add_probe("readings", "pressure", pressure, "pressure");
        assert!(matches!(err, Err(RenderError::DuplicateProbe { .. })));
        bridge.close().unwrap();
    }

    #[test]
    fn test_factory_bridge_drives_bound_attributes() {
        use crate::objects::{MeshSpec, ObjectKind};
        use simdb_store::Array;

        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("bridge.db"), false).unwrap();
        let mut bridge = FactoryBridge::new(Factory::new(db));

        let mesh = bridge
            .factory_mut()
            .add_mesh(MeshSpec::new(
                Array::from_rows(&[vec![0.0, 0.0, 0.0]]).unwrap(),
                Array::from_rows(&[vec![0.0]]).unwrap(),
            ))
            .unwrap();

        let opacity = Rc::new(ScalarComponent {
            name: "opacity",
            value: Cell::new(1.0),
        });
        bridge.bind(mesh, "alpha", opacity.clone(), "opacity").unwrap();

        // Binding a creation-only attribute is rejected.
        let err = bridge.bind(mesh, "cells", opacity.clone(), "opacity");
        assert!(matches!(
            err,
            Err(RenderError::InvalidBinding {
                kind: ObjectKind::Mesh,
                ..
            })
        ));

        opacity.value.set(0.5);
        bridge.on_step_end().unwrap();

        let db = bridge.factory.into_database();
        let line = db.get_line("Mesh_0_0", 1, None, &[]).unwrap();
        assert_eq!(line.get("alpha"), Some(&Value::Float(0.5)));
        db.close(false).unwrap();
    }
}
