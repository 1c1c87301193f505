//! Table and field schema types, plus the persisted schema registry
//! encoding.
//!
//! Every database file carries two reserved tables, `_schema_tables_`
//! and `_schema_fields_`, recording the declared tables and the
//! ordered, revisioned field list of each. Loading a file rebuilds the
//! in-memory schema from these instead of reflecting on SQLite's own
//! catalog, so defaults, array columns and foreign-key targets survive
//! a close/reopen cycle.

use std::fmt;

use crate::errors::{Result, StorageError};
use crate::value::Value;

/// Reserved name of the auto-increment row identifier.
pub const ID_FIELD: &str = "id";
/// Reserved name of the automatic timestamp field on exchange tables.
pub const DT_FIELD: &str = "_dt_";

pub(crate) const TABLES_REGISTRY: &str = "_schema_tables_";
pub(crate) const FIELDS_REGISTRY: &str = "_schema_fields_";

/// The two table roles.
///
/// Storing tables accumulate arbitrary volumes of rows; exchange
/// tables keep only their most recent row and carry an automatic
/// `_dt_` timestamp, while their row identifier keeps growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Storing,
    Exchange,
}

impl TableKind {
    pub(crate) fn as_token(self) -> &'static str {
        match self {
            TableKind::Storing => "storing",
            TableKind::Exchange => "exchange",
        }
    }

    pub(crate) fn from_token(token: &str) -> Result<Self> {
        match token {
            "storing" => Ok(TableKind::Storing),
            "exchange" => Ok(TableKind::Exchange),
            other => Err(StorageError::Encoding(format!(
                "unknown table kind '{other}' in schema registry"
            ))),
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Storing => write!(f, "Storing"),
            TableKind::Exchange => write!(f, "Exchange"),
        }
    }
}

/// Declared type of a field. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    Array,
    /// Row identifier of the named table.
    ForeignKey(String),
}

impl FieldKind {
    /// SQLite column type used to store this kind.
    pub(crate) fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Integer | FieldKind::Boolean | FieldKind::Timestamp => "INTEGER",
            FieldKind::ForeignKey(_) => "INTEGER",
            FieldKind::Float => "REAL",
            FieldKind::Text => "TEXT",
            FieldKind::Array => "BLOB",
        }
    }

    pub(crate) fn as_token(&self) -> String {
        match self {
            FieldKind::Integer => "integer".to_string(),
            FieldKind::Float => "float".to_string(),
            FieldKind::Text => "text".to_string(),
            FieldKind::Boolean => "boolean".to_string(),
            FieldKind::Timestamp => "timestamp".to_string(),
            FieldKind::Array => "array".to_string(),
            FieldKind::ForeignKey(table) => format!("fk:{table}"),
        }
    }

    pub(crate) fn from_token(token: &str) -> Result<Self> {
        if let Some(table) = token.strip_prefix("fk:") {
            return Ok(FieldKind::ForeignKey(table.to_string()));
        }
        match token {
            "integer" => Ok(FieldKind::Integer),
            "float" => Ok(FieldKind::Float),
            "text" => Ok(FieldKind::Text),
            "boolean" => Ok(FieldKind::Boolean),
            "timestamp" => Ok(FieldKind::Timestamp),
            "array" => Ok(FieldKind::Array),
            other => Err(StorageError::Encoding(format!(
                "unknown field kind '{other}' in schema registry"
            ))),
        }
    }

    /// Infer a kind from a concrete value. Null carries no type.
    pub(crate) fn infer(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Null => Err(StorageError::CannotInfer(field.to_string())),
            Value::Integer(_) => Ok(FieldKind::Integer),
            Value::Float(_) => Ok(FieldKind::Float),
            Value::Text(_) => Ok(FieldKind::Text),
            Value::Boolean(_) => Ok(FieldKind::Boolean),
            Value::Timestamp(_) => Ok(FieldKind::Timestamp),
            Value::Array(_) => Ok(FieldKind::Array),
        }
    }

    /// Whether `value` may be written into a field of this kind.
    /// Null is always accepted; integers are accepted by float fields.
    pub(crate) fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldKind::Integer, Value::Integer(_)) => true,
            (FieldKind::Float, Value::Float(_) | Value::Integer(_)) => true,
            (FieldKind::Text, Value::Text(_)) => true,
            (FieldKind::Boolean, Value::Boolean(_)) => true,
            (FieldKind::Timestamp, Value::Timestamp(_) | Value::Integer(_)) => true,
            (FieldKind::Array, Value::Array(_)) => true,
            (FieldKind::ForeignKey(_), Value::Integer(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Integer => write!(f, "Integer"),
            FieldKind::Float => write!(f, "Float"),
            FieldKind::Text => write!(f, "Text"),
            FieldKind::Boolean => write!(f, "Boolean"),
            FieldKind::Timestamp => write!(f, "Timestamp"),
            FieldKind::Array => write!(f, "Array"),
            FieldKind::ForeignKey(table) => write!(f, "FK -> {table}"),
        }
    }
}

/// Declaration of a new field: name, kind and optional default.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
        }
    }

    /// Declare a foreign key to `table` (which must already exist at
    /// creation time).
    pub fn foreign_key(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self::new(name, FieldKind::ForeignKey(harmonize_name(&table.into())))
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// A registered field: spec plus the schema revision that added it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub default: Option<Value>,
    pub revision: u32,
}

/// In-memory schema of one table. Fields keep declaration order.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub kind: TableKind,
    pub(crate) fields: Vec<FieldDef>,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Foreign-key fields as (field name, referenced table) pairs.
    pub fn foreign_keys(&self) -> Vec<(&str, &str)> {
        self.fields
            .iter()
            .filter_map(|f| match &f.kind {
                FieldKind::ForeignKey(table) => Some((f.name.as_str(), table.as_str())),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn next_revision(&self) -> u32 {
        self.fields.iter().map(|f| f.revision).max().unwrap_or(0) + 1
    }
}

/// Harmonize a table name: first letter upper-cased, remainder
/// lower-cased. All lookups go through this, so `"stuff"`, `"Stuff"`
/// and `"STUFF"` address the same table.
pub fn harmonize_name(table_name: &str) -> String {
    let mut chars = table_name.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
    }
}

/// Validate a table or field name for use as a SQL identifier.
pub(crate) fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    if valid_first && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}
