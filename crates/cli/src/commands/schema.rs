use anyhow::{Context, Result};
use std::path::Path;

use simdb_store::maintenance;

pub fn rename_table(database: &Path, old: &str, new: &str) -> Result<()> {
    maintenance::rename_tables(database, &[(old.to_string(), new.to_string())])
        .context("Renaming failed")?;
    println!("✓ Table '{old}' renamed to '{new}'");
    Ok(())
}

pub fn rename_field(database: &Path, table: &str, old: &str, new: &str) -> Result<()> {
    maintenance::rename_fields(database, table, &[(old.to_string(), new.to_string())])
        .context("Renaming failed")?;
    println!("✓ Field '{table}.{old}' renamed to '{new}'");
    Ok(())
}

pub fn remove_tables(database: &Path, tables: &[String]) -> Result<()> {
    maintenance::remove_tables(database, tables).context("Removal failed")?;
    println!("✓ Removed {} table(s)", tables.len());
    Ok(())
}

pub fn remove_fields(database: &Path, table: &str, fields: &[String]) -> Result<()> {
    maintenance::remove_fields(database, table, fields).context("Removal failed")?;
    println!("✓ Removed {} field(s) from '{table}'", fields.len());
    Ok(())
}
