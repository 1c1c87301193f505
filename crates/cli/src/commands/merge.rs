use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use simdb_store::maintenance;

pub fn merge_databases(
    sources: &[PathBuf],
    output: &Path,
    overwrite: bool,
    assume_yes: bool,
) -> Result<()> {
    println!("Merging {} database(s) into {}", sources.len(), output.display());

    let report = maintenance::merge(sources, output, overwrite, |architecture| {
        if assume_yes {
            return true;
        }
        print!("{architecture}");
        loop {
            print!("Confirm new database architecture? (y/n): ");
            std::io::stdout().flush().ok();
            let mut answer = String::new();
            if std::io::stdin().read_line(&mut answer).is_err() {
                return false;
            }
            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => println!("Cannot interpret your entry."),
            }
        }
    })
    .context("Merge failed")?;

    println!(
        "✓ Merge complete: {} table(s), {} row(s) written to {}",
        report.tables,
        report.rows,
        report.destination.display()
    );
    Ok(())
}
