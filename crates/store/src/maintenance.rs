//! Utilities operating on closed database files: merging several
//! files into one, renaming or removing tables and fields in place,
//! and exporting without keeping a handle open.

use std::path::{Path, PathBuf};

use crate::database::{Architecture, Database, LineSelection};
use crate::errors::{Result, StorageError};
use crate::export::{self, ExportFormat};
use crate::schema::{harmonize_name, FieldKind, FieldSpec, DT_FIELD};
use crate::value::Value;

/// Outcome of a [`merge`].
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub destination: PathBuf,
    pub tables: usize,
    pub rows: usize,
}

/// Merge several database files into a new one.
///
/// Table schemas are unioned field-wise: a field present in only one
/// source is NULL for the rows coming from the others; the same field
/// name with two different kinds is a conflict. Rows are appended in
/// source-processing order, and foreign-key cells are shifted by the
/// destination's pre-copy row count of their target table so the
/// references stay valid.
///
/// An existing destination file is only overwritten when `overwrite`
/// is set. The union architecture is passed to `confirm` before any
/// file is touched; returning `false` cancels the merge.
pub fn merge(
    sources: &[PathBuf],
    destination: impl AsRef<Path>,
    overwrite: bool,
    mut confirm: impl FnMut(&Architecture) -> bool,
) -> Result<MergeReport> {
    let destination = destination.as_ref();
    if sources.is_empty() {
        return Err(StorageError::Cancelled(
            "no source databases given".to_string(),
        ));
    }
    if destination.exists() && !overwrite {
        return Err(StorageError::OverwriteRefused(destination.to_path_buf()));
    }

    let databases = sources
        .iter()
        .map(Database::load)
        .collect::<Result<Vec<_>>>()?;

    // Union plan: (table name, kind, merged field specs).
    let mut plan: Vec<(String, crate::schema::TableKind, Vec<FieldSpec>)> = Vec::new();
    for db in &databases {
        for table in db.tables() {
            let schema = db.table_schema(table)?;
            let index = match plan.iter().position(|(name, _, _)| name == table) {
                Some(index) => index,
                None => {
                    plan.push((table.to_string(), schema.kind, Vec::new()));
                    plan.len() - 1
                }
            };
            let entry = &mut plan[index];
            for field in schema.fields() {
                if field.name == DT_FIELD {
                    continue;
                }
                let merged_kind = entry
                    .2
                    .iter()
                    .find(|spec| spec.name == field.name)
                    .map(|spec| spec.kind.clone());
                match merged_kind {
                    None => entry.2.push(FieldSpec {
                        name: field.name.clone(),
                        kind: field.kind.clone(),
                        default: field.default.clone(),
                    }),
                    Some(kind) if kind != field.kind => {
                        return Err(StorageError::Conflict(format!(
                            "field '{}' of table '{table}' is declared as {kind} and as {}",
                            field.name, field.kind
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
    }

    // Preview the merged architecture before touching the destination.
    let preview = Architecture {
        database: destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        tables: plan
            .iter()
            .map(|(name, kind, fields)| crate::database::TableDescription {
                name: name.clone(),
                kind: *kind,
                fields: fields
                    .iter()
                    .map(|f| (f.name.clone(), f.kind.to_string(), f.default.is_some()))
                    .collect(),
            })
            .collect(),
    };
    if !confirm(&preview) {
        return Err(StorageError::Cancelled("merge aborted".to_string()));
    }

    let mut merged = Database::create(destination, overwrite)?;
    for (name, kind, fields) in &plan {
        merged.create_table(name, *kind, fields)?;
    }

    let mut rows = 0usize;
    for db in &databases {
        // Offsets must be taken for every table before this source
        // copies anything, so foreign keys between its tables remap
        // consistently.
        let mut offsets: Vec<(String, i64)> = Vec::new();
        for table in db.tables() {
            offsets.push((table.to_string(), merged.nb_lines(table)? as i64));
        }

        for table in db.tables() {
            let schema = db.table_schema(table)?.clone();
            let lines = db.get_lines(table, &LineSelection::All, None, &[])?;
            for line in lines {
                let values: Vec<(String, Value)> = line
                    .values()
                    .iter()
                    .map(|(field, value)| {
                        let shifted = match (schema.field(field).map(|f| &f.kind), value) {
                            (Some(FieldKind::ForeignKey(target)), Value::Integer(id)) => {
                                let offset = offsets
                                    .iter()
                                    .find(|(name, _)| name == target)
                                    .map(|(_, o)| *o)
                                    .unwrap_or(0);
                                Value::Integer(id + offset)
                            }
                            _ => value.clone(),
                        };
                        (field.clone(), shifted)
                    })
                    .collect();
                merged.insert_row_raw(table, &values)?;
                rows += 1;
            }
        }
    }

    let tables = plan.len();
    let destination = merged.path().to_path_buf();
    merged.close(false)?;
    for db in databases {
        db.close(false)?;
    }
    Ok(MergeReport {
        destination,
        tables,
        rows,
    })
}

/// Rename tables of a closed database file.
pub fn rename_tables(database_file: impl AsRef<Path>, renamed: &[(String, String)]) -> Result<()> {
    let mut db = Database::load(database_file)?;
    for (old, _) in renamed {
        db.table_schema(old)?;
    }
    for (old, new) in renamed {
        db.rename_table(old, new)?;
    }
    db.close(false)
}

/// Rename fields of a table of a closed database file.
pub fn rename_fields(
    database_file: impl AsRef<Path>,
    table_name: &str,
    renamed: &[(String, String)],
) -> Result<()> {
    let mut db = Database::load(database_file)?;
    let table = db.table_schema(table_name)?.name.clone();
    let missing = {
        let schema = db.table_schema(&table)?;
        renamed
            .iter()
            .find(|(old, _)| schema.field(old).is_none())
            .map(|(old, _)| old.clone())
    };
    if let Some(old) = missing {
        db.close(false)?;
        return Err(StorageError::UndefinedFields {
            table,
            fields: vec![old],
        });
    }
    for (old, new) in renamed {
        db.rename_field(&table, old, new)?;
    }
    db.close(false)
}

/// Remove tables of a closed database file.
pub fn remove_tables(database_file: impl AsRef<Path>, table_names: &[String]) -> Result<()> {
    let mut db = Database::load(database_file)?;
    for table in table_names {
        db.remove_table(table)?;
    }
    db.close(false)
}

/// Remove fields of a table of a closed database file.
pub fn remove_fields(
    database_file: impl AsRef<Path>,
    table_name: &str,
    field_names: &[String],
) -> Result<()> {
    let mut db = Database::load(database_file)?;
    let table = harmonize_name(table_name);
    for field in field_names {
        db.remove_field(&table, field)?;
    }
    db.close(false)
}

/// Export a closed database file to CSV or JSON artifacts.
pub fn export_file(
    database_file: impl AsRef<Path>,
    format: ExportFormat,
    base_path: impl AsRef<Path>,
    tables: Option<&[String]>,
) -> Result<Vec<PathBuf>> {
    let db = Database::load(database_file)?;
    let written = export::export(&db, format, base_path, tables)?;
    db.close(false)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, FieldSpec, TableKind};
    use tempfile::tempdir;

    fn source_db(path: &Path, fields: &[&str], rows: &[Vec<(&str, i64)>]) -> PathBuf {
        let mut db = Database::create(path, false).unwrap();
        let specs: Vec<FieldSpec> = fields
            .iter()
            .map(|f| FieldSpec::new(*f, FieldKind::Integer))
            .collect();
        db.create_table("t", TableKind::Storing, &specs).unwrap();
        for row in rows {
            let values = row
                .iter()
                .map(|(field, v)| (field.to_string(), Value::Integer(*v)))
                .collect();
            db.add_data("t", values).unwrap();
        }
        let path = db.path().to_path_buf();
        db.close(false).unwrap();
        path
    }

    #[test]
    fn test_merge_unions_schemas_with_null_filled_history() {
        let dir = tempdir().unwrap();
        let first = source_db(
            &dir.path().join("one.db"),
            &["a", "b"],
            &[vec![("a", 1), ("b", 2)]],
        );
        let second = source_db(
            &dir.path().join("two.db"),
            &["a", "c"],
            &[vec![("a", 3), ("c", 4)]],
        );

        let report = merge(
            &[first, second],
            dir.path().join("merged.db"),
            false,
            |_| true,
        )
        .unwrap();
        assert_eq!(report.tables, 1);
        assert_eq!(report.rows, 2);

        let db = Database::load(&report.destination).unwrap();
        assert_eq!(db.fields("t").unwrap(), vec!["a", "b", "c"]);
        let lines = db.get_lines("t", &LineSelection::All, None, &[]).unwrap();
        assert_eq!(lines[0].get("b"), Some(&Value::Integer(2)));
        assert_eq!(lines[0].get("c"), Some(&Value::Null));
        assert_eq!(lines[1].get("b"), Some(&Value::Null));
        assert_eq!(lines[1].get("c"), Some(&Value::Integer(4)));
        db.close(false).unwrap();
    }

    #[test]
    fn test_merge_refuses_existing_destination_without_overwrite() {
        let dir = tempdir().unwrap();
        let source = source_db(&dir.path().join("one.db"), &["a"], &[vec![("a", 1)]]);
        let destination = dir.path().join("existing.db");
        std::fs::write(&destination, b"keep me").unwrap();

        let err = merge(
            &[source.clone()],
            &destination,
            false,
            |_| true,
        );
        assert!(matches!(err, Err(StorageError::OverwriteRefused(_))));
        assert_eq!(std::fs::read(&destination).unwrap(), b"keep me");

        let report = merge(&[source], &destination, true, |_| true).unwrap();
        assert_eq!(report.rows, 1);
    }

    #[test]
    fn test_merge_cancelled_by_confirmation() {
        let dir = tempdir().unwrap();
        let source = source_db(&dir.path().join("one.db"), &["a"], &[vec![("a", 1)]]);
        let destination = dir.path().join("merged.db");
        let err = merge(&[source], &destination, false, |_| false);
        assert!(matches!(err, Err(StorageError::Cancelled(_))));
        assert!(!destination.exists());
    }

    #[test]
    fn test_merge_conflicting_kinds_fails() {
        let dir = tempdir().unwrap();
        let first = source_db(&dir.path().join("one.db"), &["a"], &[vec![("a", 1)]]);

        let mut db = Database::create(dir.path().join("two.db"), false).unwrap();
        db.create_table("t", TableKind::Storing, &[FieldSpec::new("a", FieldKind::Text)])
            .unwrap();
        let second = db.path().to_path_buf();
        db.close(false).unwrap();

        let err = merge(
            &[first, second],
            dir.path().join("merged.db"),
            false,
            |_| true,
        );
        assert!(matches!(err, Err(StorageError::Conflict(_))));
    }

    #[test]
    fn test_merge_remaps_foreign_keys() {
        let dir = tempdir().unwrap();

        let make_source = |path: &Path, young: f64| -> PathBuf {
            let mut db = Database::create(path, false).unwrap();
            db.create_table(
                "material",
                TableKind::Storing,
                &[FieldSpec::new("young", FieldKind::Float)],
            )
            .unwrap();
            db.create_table(
                "body",
                TableKind::Storing,
                &[FieldSpec::foreign_key("material_ref", "material")],
            )
            .unwrap();
            let mat = db
                .add_data("material", vec![("young".to_string(), Value::Float(young))])
                .unwrap();
            db.add_data("body", vec![("material_ref".to_string(), Value::Integer(mat))])
                .unwrap();
            let path = db.path().to_path_buf();
            db.close(false).unwrap();
            path
        };

        let first = make_source(&dir.path().join("one.db"), 1.0);
        let second = make_source(&dir.path().join("two.db"), 2.0);
        let report = merge(
            &[first, second],
            dir.path().join("merged.db"),
            false,
            |_| true,
        )
        .unwrap();

        let db = Database::load(&report.destination).unwrap();
        // The second source's body row must point at the second
        // source's material row, now id 2.
        let body = db.get_line("body", 2, None, &["material"]).unwrap();
        assert_eq!(body.get("material_ref"), Some(&Value::Integer(2)));
        assert_eq!(
            body.nested("material_ref").unwrap().get("young"),
            Some(&Value::Float(2.0))
        );
        db.close(false).unwrap();
    }

    #[test]
    fn test_rename_and_remove_wrappers() {
        let dir = tempdir().unwrap();
        let file = source_db(
            &dir.path().join("work.db"),
            &["a", "b"],
            &[vec![("a", 1), ("b", 2)]],
        );

        rename_tables(&file, &[("t".to_string(), "renamed".to_string())]).unwrap();
        rename_fields(
            &file,
            "renamed",
            &[("a".to_string(), "alpha".to_string())],
        )
        .unwrap();
        remove_fields(&file, "renamed", &["b".to_string()]).unwrap();

        let db = Database::load(&file).unwrap();
        assert_eq!(db.tables(), vec!["Renamed"]);
        assert_eq!(db.fields("renamed").unwrap(), vec!["alpha"]);
        db.close(false).unwrap();

        remove_tables(&file, &["renamed".to_string()]).unwrap();
        let db = Database::load(&file).unwrap();
        assert!(db.tables().is_empty());
        db.close(false).unwrap();
    }
}
