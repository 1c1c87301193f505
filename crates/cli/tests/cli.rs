use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

use simdb_store::{Database, FieldKind, FieldSpec, TableKind, Value};

fn sample_database(path: &std::path::Path) -> std::path::PathBuf {
    let mut db = Database::create(path, false).unwrap();
    db.create_table(
        "stuff",
        TableKind::Storing,
        &[
            FieldSpec::new("x", FieldKind::Integer),
            FieldSpec::new("y", FieldKind::Text),
        ],
    )
    .unwrap();
    db.add_data(
        "stuff",
        vec![
            ("x".to_string(), Value::Integer(1)),
            ("y".to_string(), Value::Text("p".to_string())),
        ],
    )
    .unwrap();
    db.add_data(
        "stuff",
        vec![
            ("x".to_string(), Value::Integer(2)),
            ("y".to_string(), Value::Text("q".to_string())),
        ],
    )
    .unwrap();
    let path = db.path().to_path_buf();
    db.close(false).unwrap();
    path
}

#[test]
fn test_info_prints_architecture_and_row_counts() {
    let temp = tempdir().unwrap();
    let db_path = sample_database(&temp.path().join("session.db"));

    let mut cmd = Command::cargo_bin("simdb").unwrap();
    cmd.arg("info")
        .arg("--database")
        .arg(&db_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("* StoringTable \"Stuff\""))
        .stdout(predicate::str::contains("- x (Integer)"))
        .stdout(predicate::str::contains("Stuff: 2 row(s)"));
}

#[test]
fn test_export_writes_csv_artifact() {
    let temp = tempdir().unwrap();
    let db_path = sample_database(&temp.path().join("session.db"));
    let out_base = temp.path().join("out");

    let mut cmd = Command::cargo_bin("simdb").unwrap();
    cmd.arg("export")
        .arg("--database")
        .arg(&db_path)
        .arg("--format")
        .arg("csv")
        .arg("--output")
        .arg(&out_base)
        .assert()
        .success()
        .stdout(predicate::str::contains("Data exported to"));

    let content = std::fs::read_to_string(temp.path().join("out_Stuff.csv")).unwrap();
    assert_eq!(content, "x,y\n1,p\n2,q\n");
}

#[test]
fn test_export_rejects_unknown_format() {
    let temp = tempdir().unwrap();
    let db_path = sample_database(&temp.path().join("session.db"));

    let mut cmd = Command::cargo_bin("simdb").unwrap();
    cmd.arg("export")
        .arg("--database")
        .arg(&db_path)
        .arg("--format")
        .arg("xml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown export format"));
}

#[test]
fn test_merge_with_confirmation_skipped() {
    let temp = tempdir().unwrap();
    let first = sample_database(&temp.path().join("one.db"));
    let second = sample_database(&temp.path().join("two.db"));
    let merged = temp.path().join("merged.db");

    let mut cmd = Command::cargo_bin("simdb").unwrap();
    cmd.arg("merge")
        .arg(&first)
        .arg(&second)
        .arg("--output")
        .arg(&merged)
        .arg("--yes")
        .assert()
        .success()
        .stdout(predicate::str::contains("Merge complete"));

    let db = Database::load(&merged).unwrap();
    assert_eq!(db.nb_lines("stuff").unwrap(), 4);
    db.close(false).unwrap();
}

#[test]
fn test_merge_refuses_existing_destination() {
    let temp = tempdir().unwrap();
    let source = sample_database(&temp.path().join("one.db"));
    let existing = temp.path().join("merged.db");
    std::fs::write(&existing, b"keep me").unwrap();

    let mut cmd = Command::cargo_bin("simdb").unwrap();
    cmd.arg("merge")
        .arg(&source)
        .arg("--output")
        .arg(&existing)
        .arg("--yes")
        .assert()
        .failure()
        .stderr(predicate::str::contains("refusing to overwrite"));
    assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");
}

#[test]
fn test_rename_and_remove_roundtrip() {
    let temp = tempdir().unwrap();
    let db_path = sample_database(&temp.path().join("session.db"));

    Command::cargo_bin("simdb")
        .unwrap()
        .arg("rename-table")
        .arg("--database")
        .arg(&db_path)
        .arg("stuff")
        .arg("samples")
        .assert()
        .success();

    Command::cargo_bin("simdb")
        .unwrap()
        .arg("remove-field")
        .arg("--database")
        .arg(&db_path)
        .arg("samples")
        .arg("y")
        .assert()
        .success();

    let db = Database::load(&db_path).unwrap();
    assert_eq!(db.tables(), vec!["Samples"]);
    assert_eq!(db.fields("samples").unwrap(), vec!["x"]);
    db.close(false).unwrap();
}
