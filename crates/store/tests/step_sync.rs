//! Integration tests for step-synchronized recording sessions that
//! span several tables, survive a close/reload cycle, and export.

use simdb_store::export::{self, ExportFormat};
use simdb_store::{
    Database, FieldKind, FieldSpec, LineSelection, Recorder, TableKind, Value,
};
use tempfile::tempdir;

fn scalar(v: i64) -> Vec<(String, Value)> {
    vec![("x".to_string(), Value::Integer(v))]
}

#[test]
fn test_full_recording_session_roundtrip() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("session.db");

    // Record: three tables, five steps, uneven write patterns.
    {
        let mut db = Database::create(&db_path, false).unwrap();
        for table in ["forces", "positions", "energies"] {
            db.create_table(
                table,
                TableKind::Storing,
                &[FieldSpec::new("x", FieldKind::Integer)],
            )
            .unwrap();
        }
        let mut recorder = Recorder::new(db);
        for table in ["forces", "positions", "energies"] {
            recorder.track(table).unwrap();
        }

        for step in 1..=5i64 {
            recorder.record("forces", scalar(step)).unwrap();
            if step % 2 == 0 {
                recorder.record("positions", scalar(step * 10)).unwrap();
            }
            // "energies" is never written explicitly.
            recorder.end_step().unwrap();
        }
        assert_eq!(recorder.steps(), 5);
        recorder.close().unwrap();
    }

    // Replay: after N boundaries every table has exactly N rows and
    // row id k is step k everywhere.
    let db = Database::load(&db_path).unwrap();
    for table in ["forces", "positions", "energies"] {
        assert_eq!(db.nb_lines(table).unwrap(), 5, "table {table}");
    }
    let line = db.get_line("positions", 4, None, &[]).unwrap();
    assert_eq!(line.get("x"), Some(&Value::Integer(40)));
    let line = db.get_line("positions", 3, None, &[]).unwrap();
    assert_eq!(line.get("x"), Some(&Value::Null));
    let line = db.get_line("energies", 5, None, &[]).unwrap();
    assert_eq!(line.get("x"), Some(&Value::Null));
    db.close(false).unwrap();
}

#[test]
fn test_exchange_table_feeds_signals_during_session() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("signals.db");

    let mut db = Database::create(&db_path, false).unwrap();
    db.create_table(
        "status",
        TableKind::Exchange,
        &[FieldSpec::new("value", FieldKind::Integer)],
    )
    .unwrap();

    let (tx, rx) = std::sync::mpsc::channel::<i64>();
    db.register_post_insert(
        "status",
        Box::new(move |event| {
            if let Some(Value::Integer(v)) = event
                .values
                .iter()
                .find(|(name, _)| name == "value")
                .map(|(_, v)| v.clone())
            {
                tx.send(v).ok();
            }
            Ok(())
        }),
        Some("collector"),
    )
    .unwrap();
    db.connect_signals();

    for v in [1, 2, 3] {
        db.add_data("status", vec![("value".to_string(), Value::Integer(v))])
            .unwrap();
    }
    // Only the latest row survives on the exchange table, but every
    // insertion was observed.
    assert_eq!(db.nb_lines("status").unwrap(), 1);
    let observed: Vec<i64> = rx.try_iter().collect();
    assert_eq!(observed, vec![1, 2, 3]);
    db.close(false).unwrap();
}

#[test]
fn test_schema_evolution_mid_session() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("evolve.db"), false).unwrap();

    db.add_data("readings", scalar(1)).unwrap();
    // A field added mid-session applies to later rows; earlier rows
    // read NULL through it.
    db.create_fields(
        "readings",
        &[FieldSpec::new("pressure", FieldKind::Float).with_default(0.0)],
    )
    .unwrap();
    db.add_data(
        "readings",
        vec![
            ("x".to_string(), Value::Integer(2)),
            ("pressure".to_string(), Value::Float(1.5)),
        ],
    )
    .unwrap();

    let lines = db
        .get_lines("readings", &LineSelection::All, None, &[])
        .unwrap();
    assert_eq!(lines[0].get("pressure"), Some(&Value::Null));
    assert_eq!(lines[1].get("pressure"), Some(&Value::Float(1.5)));

    let revisions: Vec<u32> = db
        .table_schema("readings")
        .unwrap()
        .fields()
        .iter()
        .map(|f| f.revision)
        .collect();
    assert_eq!(revisions, vec![1, 2]);
    db.close(false).unwrap();
}

#[test]
fn test_recorded_session_exports_per_step_rows() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("exported.db"), false).unwrap();
    db.create_table(
        "stuff",
        TableKind::Storing,
        &[
            FieldSpec::new("x", FieldKind::Integer),
            FieldSpec::new("y", FieldKind::Text),
        ],
    )
    .unwrap();
    let mut recorder = Recorder::new(db);
    recorder.track("stuff").unwrap();
    recorder
        .record(
            "stuff",
            vec![
                ("x".to_string(), Value::Integer(1)),
                ("y".to_string(), Value::Text("p".to_string())),
            ],
        )
        .unwrap();
    recorder.end_step().unwrap();
    recorder
        .record(
            "stuff",
            vec![
                ("x".to_string(), Value::Integer(2)),
                ("y".to_string(), Value::Text("q".to_string())),
            ],
        )
        .unwrap();
    recorder.end_step().unwrap();

    let db = recorder.into_database();
    let written = export::export(&db, ExportFormat::Csv, dir.path().join("out"), None).unwrap();
    let content = std::fs::read_to_string(&written[0]).unwrap();
    assert_eq!(content, "x,y\n1,p\n2,q\n");
    db.close(false).unwrap();
}
