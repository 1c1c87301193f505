use anyhow::{Context, Result};
use std::path::Path;

use simdb_store::export::{self, ExportFormat};
use simdb_store::Database;

pub fn export_data(
    database: &Path,
    format: &str,
    output: &Path,
    tables: &[String],
    combined: bool,
) -> Result<()> {
    let format: ExportFormat = format.parse()?;
    let db = Database::load(database).context("Failed to open database")?;
    let tables = (!tables.is_empty()).then_some(tables);

    if combined {
        if format != ExportFormat::Json {
            anyhow::bail!("--combined is only available for the json format");
        }
        let mut path = output.to_path_buf();
        if path.extension().is_none() {
            path.set_extension("json");
        }
        let written = export::export_combined_json(&db, &path, tables)?;
        println!("✓ Data exported to: {}", written.display());
    } else {
        let written = export::export(&db, format, output, tables)?;
        for path in &written {
            println!("✓ Data exported to: {}", path.display());
        }
        if written.is_empty() {
            println!("Nothing to export: the database has no tables.");
        }
    }
    db.close(false)?;
    Ok(())
}
