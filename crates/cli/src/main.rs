mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{export, info, merge, schema};

/// simdb: step-synchronized simulation recording databases
///
/// Inspect, export, merge and rewrite closed recording files.
#[derive(Parser, Debug)]
#[command(name = "simdb")]
#[command(author, version, about = "Manage simdb recording files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the architecture of a database: tables, fields, row counts.
    Info {
        /// Database file
        #[arg(short, long, default_value = "database.db")]
        database: PathBuf,
    },

    /// Export tables to CSV or JSON files.
    ///
    /// One artifact is written per table (`base_Table.ext`), or a
    /// single combined JSON document with --combined.
    Export {
        /// Database file
        #[arg(short, long, default_value = "database.db")]
        database: PathBuf,

        /// Output format (csv, json)
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Base path of the written artifacts
        #[arg(short, long, default_value = "export")]
        output: PathBuf,

        /// Tables to export (all tables if omitted)
        #[arg(short, long)]
        tables: Vec<String>,

        /// Write one combined JSON document instead of per-table files
        #[arg(long)]
        combined: bool,
    },

    /// Merge several database files into a new one.
    ///
    /// Table schemas are unioned; rows append in source order. The
    /// merged architecture is shown for confirmation first.
    Merge {
        /// Source database files, processed in order
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Destination database file
        #[arg(short, long, default_value = "merged.db")]
        output: PathBuf,

        /// Overwrite the destination if it already exists
        #[arg(long)]
        overwrite: bool,

        /// Skip the interactive confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Rename a table.
    RenameTable {
        /// Database file
        #[arg(short, long, default_value = "database.db")]
        database: PathBuf,

        /// Current table name
        old: String,

        /// New table name
        new: String,
    },

    /// Rename a field of a table.
    RenameField {
        /// Database file
        #[arg(short, long, default_value = "database.db")]
        database: PathBuf,

        /// Table holding the field
        table: String,

        /// Current field name
        old: String,

        /// New field name
        new: String,
    },

    /// Remove tables. Fails on tables targeted by a foreign key.
    RemoveTable {
        /// Database file
        #[arg(short, long, default_value = "database.db")]
        database: PathBuf,

        /// Tables to remove
        #[arg(required = true)]
        tables: Vec<String>,
    },

    /// Remove fields of a table. Foreign-key fields cannot be removed.
    RemoveField {
        /// Database file
        #[arg(short, long, default_value = "database.db")]
        database: PathBuf,

        /// Table holding the fields
        table: String,

        /// Fields to remove
        #[arg(required = true)]
        fields: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info { database } => {
            info::show_info(&database)?;
        }
        Commands::Export {
            database,
            format,
            output,
            tables,
            combined,
        } => {
            export::export_data(&database, &format, &output, &tables, combined)?;
        }
        Commands::Merge {
            sources,
            output,
            overwrite,
            yes,
        } => {
            merge::merge_databases(&sources, &output, overwrite, yes)?;
        }
        Commands::RenameTable {
            database,
            old,
            new,
        } => {
            schema::rename_table(&database, &old, &new)?;
        }
        Commands::RenameField {
            database,
            table,
            old,
            new,
        } => {
            schema::rename_field(&database, &table, &old, &new)?;
        }
        Commands::RemoveTable { database, tables } => {
            schema::remove_tables(&database, &tables)?;
        }
        Commands::RemoveField {
            database,
            table,
            fields,
        } => {
            schema::remove_fields(&database, &table, &fields)?;
        }
    }

    Ok(())
}
