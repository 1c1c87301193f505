use anyhow::{Context, Result};
use std::path::Path;

use simdb_store::Database;

pub fn show_info(database: &Path) -> Result<()> {
    let db = Database::load(database).context("Failed to open database")?;

    print!("{}", db.architecture());
    println!();
    for table in db.tables() {
        let rows = db.nb_lines(table)?;
        println!("  {table}: {rows} row(s)");
    }
    println!("\nFile size: {} bytes", db.file_size()?);
    db.close(false)?;
    Ok(())
}
