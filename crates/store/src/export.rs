//! Table export to CSV and JSON.
//!
//! CSV artifacts carry one header row with the declared field names
//! followed by one record per row in insertion order. JSON artifacts
//! are arrays of objects keyed by field name, keeping declared field
//! order. One file is written per table (`base_Table.ext`), or one
//! combined JSON document for all tables.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::database::{Database, LineSelection};
use crate::errors::{Result, StorageError};
use crate::value::Value;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(StorageError::UnknownFormat(other.to_string())),
        }
    }
}

/// Serialize one table to CSV.
pub fn table_to_csv(db: &Database, table_name: &str) -> Result<String> {
    let schema = db.table_schema(table_name)?;
    let fields: Vec<String> = schema.fields().iter().map(|f| f.name.clone()).collect();

    let mut out = String::new();
    let header = fields
        .iter()
        .map(|f| csv_escape(f))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&header);
    out.push('\n');

    let lines = db.get_lines(table_name, &LineSelection::All, None, &[])?;
    for line in lines {
        let record = fields
            .iter()
            .map(|f| value_to_csv(line.get(f).unwrap_or(&Value::Null)))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&record);
        out.push('\n');
    }
    Ok(out)
}

/// Serialize one table to a JSON array of objects.
pub fn table_to_json(db: &Database, table_name: &str) -> Result<serde_json::Value> {
    let schema = db.table_schema(table_name)?;
    let fields: Vec<String> = schema.fields().iter().map(|f| f.name.clone()).collect();

    let lines = db.get_lines(table_name, &LineSelection::All, None, &[])?;
    let mut records = Vec::with_capacity(lines.len());
    for line in lines {
        let mut object = serde_json::Map::new();
        for field in &fields {
            object.insert(
                field.clone(),
                value_to_json(line.get(field).unwrap_or(&Value::Null)),
            );
        }
        records.push(serde_json::Value::Object(object));
    }
    Ok(serde_json::Value::Array(records))
}

/// Export tables to one artifact per table, named `base_Table.ext`.
/// Exports every table when `tables` is `None`. Returns the written
/// paths.
pub fn export(
    db: &Database,
    format: ExportFormat,
    base_path: impl AsRef<Path>,
    tables: Option<&[String]>,
) -> Result<Vec<PathBuf>> {
    let base = base_path.as_ref();
    let selected = selected_tables(db, tables)?;

    let mut written = Vec::with_capacity(selected.len());
    for table in selected {
        let path = artifact_path(base, &table, format.extension());
        let content = match format {
            ExportFormat::Csv => table_to_csv(db, &table)?,
            ExportFormat::Json => {
                let mut text = serde_json::to_string_pretty(&table_to_json(db, &table)?)
                    .map_err(|e| StorageError::Encoding(e.to_string()))?;
                text.push('\n');
                text
            }
        };
        std::fs::write(&path, content)?;
        written.push(path);
    }
    Ok(written)
}

/// Export all selected tables into a single JSON document mapping
/// table name to its row array.
pub fn export_combined_json(
    db: &Database,
    path: impl AsRef<Path>,
    tables: Option<&[String]>,
) -> Result<PathBuf> {
    let selected = selected_tables(db, tables)?;
    let mut document = serde_json::Map::new();
    for table in selected {
        document.insert(table.clone(), table_to_json(db, &table)?);
    }
    let mut text = serde_json::to_string_pretty(&serde_json::Value::Object(document))
        .map_err(|e| StorageError::Encoding(e.to_string()))?;
    text.push('\n');

    let path = path.as_ref().to_path_buf();
    std::fs::write(&path, text)?;
    Ok(path)
}

fn selected_tables(db: &Database, tables: Option<&[String]>) -> Result<Vec<String>> {
    match tables {
        None => Ok(db.tables().iter().map(|t| t.to_string()).collect()),
        Some(requested) => requested
            .iter()
            .map(|t| db.table_schema(t).map(|s| s.name.clone()))
            .collect(),
    }
}

fn artifact_path(base: &Path, table: &str, extension: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    let file = format!("{stem}_{table}.{extension}");
    base.parent()
        .map(|p| p.join(&file))
        .unwrap_or_else(|| PathBuf::from(&file))
}

fn value_to_csv(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Text(v) => csv_escape(v),
        Value::Boolean(v) => v.to_string(),
        Value::Timestamp(v) => v.to_string(),
        Value::Array(a) => csv_escape(&array_to_json(a).to_string()),
    }
}

fn csv_escape(text: &str) -> String {
    if text.contains([',', '"', '\n']) {
        let mut escaped = String::with_capacity(text.len() + 2);
        escaped.push('"');
        for c in text.chars() {
            if c == '"' {
                escaped.push('"');
            }
            escaped.push(c);
        }
        escaped.push('"');
        escaped
    } else {
        text.to_string()
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(v) | Value::Timestamp(v) => serde_json::Value::from(*v),
        Value::Float(v) => serde_json::Value::from(*v),
        Value::Text(v) => serde_json::Value::from(v.clone()),
        Value::Boolean(v) => serde_json::Value::from(*v),
        Value::Array(a) => array_to_json(a),
    }
}

/// Arrays export as nested lists following their shape: `[r, c]`
/// arrays become a list of `r` rows.
fn array_to_json(array: &crate::value::Array) -> serde_json::Value {
    match array.shape() {
        [rows, cols] => {
            let mut outer = Vec::with_capacity(*rows);
            for r in 0..*rows {
                let row: Vec<serde_json::Value> = array.data()[r * cols..(r + 1) * cols]
                    .iter()
                    .map(|v| serde_json::Value::from(*v))
                    .collect();
                outer.push(serde_json::Value::Array(row));
            }
            serde_json::Value::Array(outer)
        }
        _ => serde_json::Value::Array(
            array
                .data()
                .iter()
                .map(|v| serde_json::Value::from(*v))
                .collect(),
        ),
    }
}
