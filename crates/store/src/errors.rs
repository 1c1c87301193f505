use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for storage results.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database file does not exist: {0}")]
    MissingDatabase(PathBuf),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("table '{0}' already exists")]
    DuplicateTable(String),

    #[error("invalid name '{0}': names must start with a letter and contain only letters, digits and underscores")]
    InvalidName(String),

    #[error("'{0}' is a reserved field name")]
    ReservedField(String),

    #[error("field '{field}' already exists in table '{table}'")]
    DuplicateField { table: String, field: String },

    #[error("some fields are not defined in non-empty table '{table}': {fields:?}")]
    UndefinedFields { table: String, fields: Vec<String> },

    #[error("cannot create a foreign key to '{0}' since this table does not exist")]
    UnknownForeignTable(String),

    #[error("table '{table}' is the target of foreign key '{field}' of table '{referrer}'")]
    ReferencedTable {
        table: String,
        referrer: String,
        field: String,
    },

    #[error("field '{field}' of table '{table}' is a foreign key and cannot be removed")]
    ForeignKeyField { table: String, field: String },

    #[error("field '{field}' of table '{table}' expects {expected}, got {found}")]
    TypeMismatch {
        table: String,
        field: String,
        expected: String,
        found: String,
    },

    #[error("cannot infer a field type for '{0}' from a null value")]
    CannotInfer(String),

    #[error("the number of samples per batch must be the same for all fields: {0}")]
    BatchShape(String),

    #[error("row {row} not found in table '{table}'")]
    UnknownRow { table: String, row: i64 },

    #[error("signals are already connected; handlers must be registered before connect_signals")]
    SignalsConnected,

    #[error("{kind} handler failed on table '{table}': {source}")]
    Handler {
        table: String,
        kind: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("refusing to overwrite existing file without confirmation: {0}")]
    OverwriteRefused(PathBuf),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("merge conflict: {0}")]
    Conflict(String),

    #[error("unknown export format '{0}', available formats are ['csv', 'json']")]
    UnknownFormat(String),

    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
