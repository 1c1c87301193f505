//! Low-level database operations: connection management, dynamic
//! schema evolution, row insert/update/select with join resolution.

use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};

use crate::errors::{Result, StorageError};
use crate::schema::{
    harmonize_name, validate_identifier, FieldDef, FieldKind, FieldSpec, TableKind, TableSchema,
    DT_FIELD, FIELDS_REGISTRY, ID_FIELD, TABLES_REGISTRY,
};
use crate::signals::{Handler, SignalHub, SignalKind};
use crate::value::{Array, Value};

/// Database connection wrapper with schema management.
///
/// One `Database` owns one SQLite file. Tables and fields can be added
/// at any time before or during a recording session; rows are appended
/// through [`Database::add_data`]/[`Database::add_batch`] and mutated
/// through [`Database::update`]. Signal handlers registered on a table
/// fire around each row insertion once [`Database::connect_signals`]
/// has been called.
pub struct Database {
    conn: Connection,
    path: PathBuf,
    tables: Vec<TableSchema>,
    signals: SignalHub,
}

/// Row selection for [`Database::get_lines`] and
/// [`Database::get_batch`].
#[derive(Debug, Clone)]
pub enum LineSelection {
    /// Every row, in identifier order.
    All,
    /// Inclusive identifier range; negative endpoints address from the
    /// most recent row and out-of-range endpoints clamp to the table.
    Range(i64, i64),
    /// An explicit set of identifiers. Any missing identifier is an
    /// error.
    Ids(Vec<i64>),
}

/// One decoded row: identifier, cell values in declared field order,
/// and nested lines for resolved foreign-key joins.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub id: i64,
    values: Vec<(String, Value)>,
    nested: Vec<(String, Line)>,
}

impl Line {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }

    /// Resolved join for a foreign-key field, if one was requested.
    pub fn nested(&self, field: &str) -> Option<&Line> {
        self.nested
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, l)| l)
    }

    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    pub fn nested_lines(&self) -> &[(String, Line)] {
        &self.nested
    }
}

/// Printable description of a database's tables and fields.
#[derive(Debug, Clone)]
pub struct Architecture {
    pub database: String,
    pub tables: Vec<TableDescription>,
}

#[derive(Debug, Clone)]
pub struct TableDescription {
    pub name: String,
    pub kind: TableKind,
    /// (field name, kind description, has default)
    pub fields: Vec<(String, String, bool)>,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DATABASE {}", self.database)?;
        for table in &self.tables {
            writeln!(f, "  * {}Table \"{}\"", table.kind, table.name)?;
            for (name, kind, has_default) in &table.fields {
                if *has_default {
                    writeln!(f, "    - {name} ({kind}) (default)")?;
                } else {
                    writeln!(f, "    - {name} ({kind})")?;
                }
            }
        }
        Ok(())
    }
}

impl Database {
    /// Create a new database file.
    ///
    /// A missing `.db` extension is appended and missing parent
    /// directories are created. If the file already exists it is
    /// overwritten when `overwrite` is set; otherwise the name is
    /// indexed (`name(1).db`, `name(2).db`, ...) so nothing is lost.
    pub fn create(path: impl AsRef<Path>, overwrite: bool) -> Result<Self> {
        let mut path = path.as_ref().to_path_buf();
        if path.extension().is_none() {
            path.set_extension("db");
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            if overwrite {
                std::fs::remove_file(&path)?;
                remove_sidecar_files(&path);
            } else {
                path = indexed_path(&path);
            }
        }

        let conn = open_connection(&path)?;
        init_registry(&conn)?;
        Ok(Self {
            conn,
            path,
            tables: Vec::new(),
            signals: SignalHub::default(),
        })
    }

    /// Load an existing database file, rebuilding the table schemas
    /// from the persisted registry.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StorageError::MissingDatabase(path));
        }

        let conn = open_connection(&path)?;
        init_registry(&conn)?;

        let mut tables: Vec<TableSchema> = Vec::new();
        {
            let mut stmt = conn.prepare(&format!(
                "SELECT table_name, kind FROM {TABLES_REGISTRY} ORDER BY position"
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (name, kind) = row?;
                tables.push(TableSchema {
                    name,
                    kind: TableKind::from_token(&kind)?,
                    fields: Vec::new(),
                });
            }
        }
        {
            let mut stmt = conn.prepare(&format!(
                "SELECT table_name, field_name, kind, default_value, revision \
                 FROM {FIELDS_REGISTRY} ORDER BY id"
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<Vec<u8>>>(3)?,
                    row.get::<_, u32>(4)?,
                ))
            })?;
            for row in rows {
                let (table, name, kind, default, revision) = row?;
                let default = match default {
                    None => None,
                    Some(bytes) => Some(
                        bincode::deserialize::<Value>(&bytes)
                            .map_err(|e| StorageError::Encoding(e.to_string()))?,
                    ),
                };
                if let Some(schema) = tables.iter_mut().find(|t| t.name == table) {
                    schema.fields.push(FieldDef {
                        name,
                        kind: FieldKind::from_token(&kind)?,
                        default,
                        revision,
                    });
                }
            }
        }

        Ok(Self {
            conn,
            path,
            tables,
            signals: SignalHub::default(),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the backing file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Names of the created tables, in creation order.
    pub fn tables(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn has_table(&self, table_name: &str) -> bool {
        let name = harmonize_name(table_name);
        self.tables.iter().any(|t| t.name == name)
    }

    /// Schema of a table.
    pub fn table_schema(&self, table_name: &str) -> Result<&TableSchema> {
        let name = harmonize_name(table_name);
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or(StorageError::UnknownTable(name))
    }

    /// Names of the fields of a table, in declaration order.
    pub fn fields(&self, table_name: &str) -> Result<Vec<&str>> {
        Ok(self.table_schema(table_name)?.field_names())
    }

    /// Description of every table and its fields.
    pub fn architecture(&self) -> Architecture {
        let database = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tables = self
            .tables
            .iter()
            .map(|t| {
                let mut fields = vec![(ID_FIELD.to_string(), "Integer".to_string(), true)];
                for f in &t.fields {
                    let has_default = f.default.is_some() || f.name == DT_FIELD;
                    fields.push((f.name.clone(), f.kind.to_string(), has_default));
                }
                TableDescription {
                    name: t.name.clone(),
                    kind: t.kind,
                    fields,
                }
            })
            .collect();
        Architecture { database, tables }
    }

    // ------------------------------------------------------------------
    // Schema evolution
    // ------------------------------------------------------------------

    /// Add a new table with customizable fields. Fails if the name is
    /// already taken; nothing is applied if any field spec is invalid.
    /// Exchange tables automatically receive a `_dt_` timestamp field.
    pub fn create_table(
        &mut self,
        table_name: &str,
        kind: TableKind,
        fields: &[FieldSpec],
    ) -> Result<String> {
        let name = harmonize_name(table_name);
        validate_identifier(&name)?;
        if self.has_table(&name) {
            return Err(StorageError::DuplicateTable(name));
        }

        let mut schema = TableSchema {
            name: name.clone(),
            kind,
            fields: Vec::new(),
        };
        self.validate_new_fields(&schema, fields)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            &format!("CREATE TABLE \"{name}\" ({ID_FIELD} INTEGER PRIMARY KEY AUTOINCREMENT)"),
            [],
        )?;
        tx.execute(
            &format!("INSERT INTO {TABLES_REGISTRY} (table_name, kind) VALUES (?1, ?2)"),
            params![name, kind.as_token()],
        )?;
        if kind == TableKind::Exchange {
            apply_fields(
                &tx,
                &mut schema,
                &[FieldSpec::new(DT_FIELD, FieldKind::Timestamp)],
            )?;
        }
        apply_fields(&tx, &mut schema, fields)?;
        tx.commit()?;

        self.tables.push(schema);
        Ok(name)
    }

    /// Add new fields to an existing table. All specs are validated
    /// before any is applied.
    pub fn create_fields(&mut self, table_name: &str, fields: &[FieldSpec]) -> Result<()> {
        let name = harmonize_name(table_name);
        let mut schema = self.table_schema(&name)?.clone();
        self.validate_new_fields(&schema, fields)?;

        let tx = self.conn.transaction()?;
        apply_fields(&tx, &mut schema, fields)?;
        tx.commit()?;

        *self.schema_slot(&name) = schema;
        Ok(())
    }

    fn validate_new_fields(&self, schema: &TableSchema, fields: &[FieldSpec]) -> Result<()> {
        for (i, spec) in fields.iter().enumerate() {
            validate_identifier(&spec.name)?;
            if spec.name == ID_FIELD || spec.name == DT_FIELD {
                return Err(StorageError::ReservedField(spec.name.clone()));
            }
            let collides_existing = schema.field(&spec.name).is_some();
            let collides_sibling = fields[..i].iter().any(|s| s.name == spec.name);
            if collides_existing || collides_sibling {
                return Err(StorageError::DuplicateField {
                    table: schema.name.clone(),
                    field: spec.name.clone(),
                });
            }
            if let FieldKind::ForeignKey(target) = &spec.kind {
                if !self.has_table(target) {
                    return Err(StorageError::UnknownForeignTable(target.clone()));
                }
            }
            if let Some(default) = &spec.default {
                if !default.is_null() && !spec.kind.accepts(default) {
                    return Err(StorageError::TypeMismatch {
                        table: schema.name.clone(),
                        field: spec.name.clone(),
                        expected: spec.kind.to_string(),
                        found: default.type_name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn schema_slot(&mut self, name: &str) -> &mut TableSchema {
        self.tables
            .iter_mut()
            .find(|t| t.name == name)
            .expect("schema checked before mutation")
    }

    /// Rename a table. Foreign keys pointing at it follow the rename.
    pub fn rename_table(&mut self, table_name: &str, new_table_name: &str) -> Result<()> {
        let old = harmonize_name(table_name);
        let new = harmonize_name(new_table_name);
        validate_identifier(&new)?;
        self.table_schema(&old)?;
        if self.has_table(&new) {
            return Err(StorageError::DuplicateTable(new));
        }

        let old_fk = FieldKind::ForeignKey(old.clone()).as_token();
        let new_fk = FieldKind::ForeignKey(new.clone()).as_token();
        let tx = self.conn.transaction()?;
        tx.execute(&format!("ALTER TABLE \"{old}\" RENAME TO \"{new}\""), [])?;
        tx.execute(
            &format!("UPDATE {TABLES_REGISTRY} SET table_name = ?1 WHERE table_name = ?2"),
            params![new, old],
        )?;
        tx.execute(
            &format!("UPDATE {FIELDS_REGISTRY} SET table_name = ?1 WHERE table_name = ?2"),
            params![new, old],
        )?;
        tx.execute(
            &format!("UPDATE {FIELDS_REGISTRY} SET kind = ?1 WHERE kind = ?2"),
            params![new_fk, old_fk],
        )?;
        tx.commit()?;

        for table in &mut self.tables {
            if table.name == old {
                table.name = new.clone();
            }
            for field in &mut table.fields {
                if field.kind == FieldKind::ForeignKey(old.clone()) {
                    field.kind = FieldKind::ForeignKey(new.clone());
                }
            }
        }
        Ok(())
    }

    /// Rename a field of a table. `id` and `_dt_` cannot be renamed.
    pub fn rename_field(
        &mut self,
        table_name: &str,
        field_name: &str,
        new_field_name: &str,
    ) -> Result<()> {
        let name = harmonize_name(table_name);
        let schema = self.table_schema(&name)?;
        if field_name == ID_FIELD || field_name == DT_FIELD || new_field_name == ID_FIELD {
            return Err(StorageError::ReservedField(field_name.to_string()));
        }
        validate_identifier(new_field_name)?;
        if schema.field(field_name).is_none() {
            return Err(StorageError::UndefinedFields {
                table: name,
                fields: vec![field_name.to_string()],
            });
        }
        if schema.field(new_field_name).is_some() {
            return Err(StorageError::DuplicateField {
                table: name,
                field: new_field_name.to_string(),
            });
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            &format!("ALTER TABLE \"{name}\" RENAME COLUMN \"{field_name}\" TO \"{new_field_name}\""),
            [],
        )?;
        tx.execute(
            &format!(
                "UPDATE {FIELDS_REGISTRY} SET field_name = ?1 \
                 WHERE table_name = ?2 AND field_name = ?3"
            ),
            params![new_field_name, name, field_name],
        )?;
        tx.commit()?;

        let slot = self.schema_slot(&name);
        if let Some(field) = slot.fields.iter_mut().find(|f| f.name == field_name) {
            field.name = new_field_name.to_string();
        }
        Ok(())
    }

    /// Remove a table. Fails if any other table declares a foreign key
    /// to it.
    pub fn remove_table(&mut self, table_name: &str) -> Result<()> {
        let name = harmonize_name(table_name);
        self.table_schema(&name)?;
        for other in &self.tables {
            if other.name == name {
                continue;
            }
            for (field, target) in other.foreign_keys() {
                if target == name {
                    return Err(StorageError::ReferencedTable {
                        table: name,
                        referrer: other.name.clone(),
                        field: field.to_string(),
                    });
                }
            }
        }

        let tx = self.conn.transaction()?;
        tx.execute(&format!("DROP TABLE \"{name}\""), [])?;
        tx.execute(
            &format!("DELETE FROM {TABLES_REGISTRY} WHERE table_name = ?1"),
            params![name],
        )?;
        tx.execute(
            &format!("DELETE FROM {FIELDS_REGISTRY} WHERE table_name = ?1"),
            params![name],
        )?;
        tx.commit()?;

        self.tables.retain(|t| t.name != name);
        Ok(())
    }

    /// Remove a field of a table. `id`, `_dt_` and foreign-key fields
    /// cannot be removed.
    pub fn remove_field(&mut self, table_name: &str, field_name: &str) -> Result<()> {
        let name = harmonize_name(table_name);
        let schema = self.table_schema(&name)?;
        if field_name == ID_FIELD || field_name == DT_FIELD {
            return Err(StorageError::ReservedField(field_name.to_string()));
        }
        let Some(field) = schema.field(field_name) else {
            return Err(StorageError::UndefinedFields {
                table: name,
                fields: vec![field_name.to_string()],
            });
        };
        if matches!(field.kind, FieldKind::ForeignKey(_)) {
            return Err(StorageError::ForeignKeyField {
                table: name,
                field: field_name.to_string(),
            });
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            &format!("ALTER TABLE \"{name}\" DROP COLUMN \"{field_name}\""),
            [],
        )?;
        tx.execute(
            &format!("DELETE FROM {FIELDS_REGISTRY} WHERE table_name = ?1 AND field_name = ?2"),
            params![name, field_name],
        )?;
        tx.commit()?;

        self.schema_slot(&name)
            .fields
            .retain(|f| f.name != field_name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    /// Register a handler fired before each row insertion into a
    /// table. Must be called before [`Database::connect_signals`].
    pub fn register_pre_insert(
        &mut self,
        table_name: &str,
        handler: Handler,
        label: Option<&str>,
    ) -> Result<()> {
        self.signals.register(
            harmonize_name(table_name),
            SignalKind::PreInsert,
            handler,
            label.map(str::to_string),
        )
    }

    /// Register a handler fired after each row insertion into a
    /// table. Must be called before [`Database::connect_signals`].
    pub fn register_post_insert(
        &mut self,
        table_name: &str,
        handler: Handler,
        label: Option<&str>,
    ) -> Result<()> {
        self.signals.register(
            harmonize_name(table_name),
            SignalKind::PostInsert,
            handler,
            label.map(str::to_string),
        )
    }

    /// Freeze the registered handlers into the dispatch table. After
    /// this, further registrations are rejected.
    pub fn connect_signals(&mut self) {
        let known: Vec<String> = self.tables.iter().map(|t| t.name.clone()).collect();
        self.signals.connect(&known);
    }

    pub fn signals_connected(&self) -> bool {
        self.signals.is_connected()
    }

    // ------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------

    /// Insert one row and return its identifier.
    ///
    /// Unknown tables are created on the fly as storing tables with
    /// field kinds inferred from the values; unknown fields on an
    /// empty table are created the same way, on a non-empty table they
    /// are an error. Unset fields take their declared default
    /// (timestamp fields default to the current time), otherwise NULL.
    pub fn add_data(&mut self, table_name: &str, values: Vec<(String, Value)>) -> Result<i64> {
        let name = harmonize_name(table_name);
        self.ensure_writable(&name, &values)?;
        let schema = self.table_schema(&name)?.clone();
        let row = materialize_row(&schema, &values)?;

        self.signals
            .emit(&name, SignalKind::PreInsert, None, &row)?;
        if schema.kind == TableKind::Exchange {
            self.conn.execute(&format!("DELETE FROM \"{name}\""), [])?;
        }
        let id = insert_materialized(&self.conn, &schema, &row)?;
        self.signals
            .emit(&name, SignalKind::PostInsert, Some(id), &row)?;
        Ok(id)
    }

    /// Insert N rows in one call, where N is the common length of all
    /// provided columns. Mismatched lengths fail before any write.
    ///
    /// Tables without connected signal handlers take a prepared
    /// single-transaction fast path; tables with handlers insert row
    /// by row so pre/post handlers fire per insertion.
    pub fn add_batch(
        &mut self,
        table_name: &str,
        columns: Vec<(String, Vec<Value>)>,
    ) -> Result<Vec<i64>> {
        let name = harmonize_name(table_name);
        if columns.is_empty() {
            return Err(StorageError::BatchShape("batch has no columns".to_string()));
        }
        let count = columns[0].1.len();
        if columns.iter().any(|(_, samples)| samples.len() != count) {
            let received = columns
                .iter()
                .map(|(field, samples)| format!("{field}: {}", samples.len()))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(StorageError::BatchShape(received));
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let first_row: Vec<(String, Value)> = columns
            .iter()
            .map(|(field, samples)| (field.clone(), samples[0].clone()))
            .collect();
        self.ensure_writable(&name, &first_row)?;
        let schema = self.table_schema(&name)?.clone();

        // Materialize all rows first so shape and type errors surface
        // before any write.
        let mut rows = Vec::with_capacity(count);
        for i in 0..count {
            let values: Vec<(String, Value)> = columns
                .iter()
                .map(|(field, samples)| (field.clone(), samples[i].clone()))
                .collect();
            rows.push(materialize_row(&schema, &values)?);
        }

        let mut ids = Vec::with_capacity(count);
        if self.signals.has_handlers(&name) {
            for row in &rows {
                self.signals.emit(&name, SignalKind::PreInsert, None, row)?;
                if schema.kind == TableKind::Exchange {
                    self.conn.execute(&format!("DELETE FROM \"{name}\""), [])?;
                }
                let id = insert_materialized(&self.conn, &schema, row)?;
                self.signals
                    .emit(&name, SignalKind::PostInsert, Some(id), row)?;
                ids.push(id);
            }
        } else {
            let tx = self.conn.transaction()?;
            if schema.kind == TableKind::Exchange {
                tx.execute(&format!("DELETE FROM \"{name}\""), [])?;
            }
            for row in &rows {
                ids.push(insert_materialized(&tx, &schema, row)?);
            }
            tx.commit()?;
        }
        Ok(ids)
    }

    /// Update the named fields of one row. Never creates a row.
    ///
    /// Negative identifiers address from the most recent row (`-1` is
    /// the latest); unknown or out-of-range identifiers are errors.
    pub fn update(
        &mut self,
        table_name: &str,
        values: Vec<(String, Value)>,
        row_id: i64,
    ) -> Result<()> {
        let name = harmonize_name(table_name);
        let schema = self.table_schema(&name)?.clone();
        let id = self.resolve_row_id(&name, row_id)?;

        let undefined: Vec<String> = values
            .iter()
            .filter(|(field, _)| schema.field(field).is_none())
            .map(|(field, _)| field.clone())
            .collect();
        if !undefined.is_empty() {
            return Err(StorageError::UndefinedFields {
                table: name,
                fields: undefined,
            });
        }
        if values.is_empty() {
            return Ok(());
        }

        let mut assignments = Vec::with_capacity(values.len());
        let mut params: Vec<rusqlite::types::Value> = Vec::with_capacity(values.len() + 1);
        for (i, (field, value)) in values.iter().enumerate() {
            let def = schema.field(field).expect("checked above");
            if !def.kind.accepts(value) {
                return Err(StorageError::TypeMismatch {
                    table: name,
                    field: field.clone(),
                    expected: def.kind.to_string(),
                    found: value.type_name().to_string(),
                });
            }
            assignments.push(format!("\"{field}\" = ?{}", i + 1));
            params.push(bind_value(&def.kind, value)?);
        }
        params.push(rusqlite::types::Value::Integer(id));

        let affected = self.conn.execute(
            &format!(
                "UPDATE \"{name}\" SET {} WHERE {ID_FIELD} = ?{}",
                assignments.join(", "),
                values.len() + 1
            ),
            params_from_iter(params),
        )?;
        if affected == 0 {
            return Err(StorageError::UnknownRow {
                table: name,
                row: row_id,
            });
        }
        Ok(())
    }

    /// Get one row. `fields` restricts the selection; `joins` names
    /// tables whose foreign-key fields are resolved into nested lines,
    /// recursively over the same join set.
    pub fn get_line(
        &self,
        table_name: &str,
        row_id: i64,
        fields: Option<&[&str]>,
        joins: &[&str],
    ) -> Result<Line> {
        let name = harmonize_name(table_name);
        let schema = self.table_schema(&name)?;
        let id = self.resolve_row_id(&name, row_id)?;
        let joins: Vec<String> = joins.iter().map(|j| harmonize_name(j)).collect();
        self.fetch_line(schema, id, fields, &joins)
    }

    /// Get a set of rows as lines.
    pub fn get_lines(
        &self,
        table_name: &str,
        selection: &LineSelection,
        fields: Option<&[&str]>,
        joins: &[&str],
    ) -> Result<Vec<Line>> {
        let name = harmonize_name(table_name);
        let schema = self.table_schema(&name)?;
        let joins: Vec<String> = joins.iter().map(|j| harmonize_name(j)).collect();
        let ids = self.select_ids(&name, selection)?;
        ids.into_iter()
            .map(|id| self.fetch_line(schema, id, fields, &joins))
            .collect()
    }

    /// Get a set of rows as one column per field, in declared field
    /// order.
    pub fn get_batch(
        &self,
        table_name: &str,
        selection: &LineSelection,
        fields: Option<&[&str]>,
    ) -> Result<Vec<(String, Vec<Value>)>> {
        let name = harmonize_name(table_name);
        let schema = self.table_schema(&name)?;
        let selected: Vec<String> = schema
            .fields()
            .iter()
            .filter(|f| fields.is_none_or(|list| list.contains(&f.name.as_str())))
            .map(|f| f.name.clone())
            .collect();

        let lines = self.get_lines(table_name, selection, fields, &[])?;
        let mut columns: Vec<(String, Vec<Value>)> = selected
            .into_iter()
            .map(|name| (name, Vec::with_capacity(lines.len())))
            .collect();
        for line in &lines {
            for (field, column) in &mut columns {
                column.push(line.get(field).cloned().unwrap_or(Value::Null));
            }
        }
        Ok(columns)
    }

    /// Number of rows in a table.
    pub fn nb_lines(&self, table_name: &str) -> Result<usize> {
        let name = harmonize_name(table_name);
        self.table_schema(&name)?;
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{name}\""), [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    /// Close the database, checkpointing and removing WAL sidecar
    /// files. The file itself is erased when `erase_file` is set.
    pub fn close(self, erase_file: bool) -> Result<()> {
        let Database { conn, path, .. } = self;
        if let Err(e) = conn.execute_batch(
            "PRAGMA wal_checkpoint(TRUNCATE);
             PRAGMA journal_mode = DELETE;",
        ) {
            tracing::warn!("failed to checkpoint/truncate WAL: {e}");
        }
        conn.close().map_err(|(_conn, e)| StorageError::Sql(e))?;
        remove_sidecar_files(&path);
        if erase_file && path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Auto-create the table or missing fields so `values` can be
    /// written, following the on-the-fly schema rules of `add_data`.
    fn ensure_writable(&mut self, name: &str, values: &[(String, Value)]) -> Result<()> {
        for (field, _) in values {
            if field == ID_FIELD {
                return Err(StorageError::ReservedField(field.clone()));
            }
        }
        if !self.has_table(name) {
            let specs = infer_specs(values)?;
            self.create_table(name, TableKind::Storing, &specs)?;
            return Ok(());
        }
        let schema = self.table_schema(name)?;
        let undefined: Vec<(String, Value)> = values
            .iter()
            .filter(|(field, _)| schema.field(field).is_none())
            .cloned()
            .collect();
        if undefined.is_empty() {
            return Ok(());
        }
        if self.nb_lines(name)? == 0 {
            let specs = infer_specs(&undefined)?;
            self.create_fields(name, &specs)
        } else {
            Err(StorageError::UndefinedFields {
                table: name.to_string(),
                fields: undefined.into_iter().map(|(field, _)| field).collect(),
            })
        }
    }

    /// Raw append used by the merge utility: no signals, no exchange
    /// clearing, no defaults. Values must match existing fields.
    pub(crate) fn insert_row_raw(
        &mut self,
        table_name: &str,
        values: &[(String, Value)],
    ) -> Result<i64> {
        let schema = self.table_schema(table_name)?.clone();
        let mut row = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            let value = values
                .iter()
                .find(|(name, _)| name == &field.name)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);
            if !field.kind.accepts(&value) {
                return Err(StorageError::TypeMismatch {
                    table: schema.name.clone(),
                    field: field.name.clone(),
                    expected: field.kind.to_string(),
                    found: value.type_name().to_string(),
                });
            }
            row.push((field.name.clone(), value));
        }
        insert_materialized(&self.conn, &schema, &row)
    }

    /// Resolve a possibly-negative row identifier to a real one.
    fn resolve_row_id(&self, name: &str, row_id: i64) -> Result<i64> {
        let missing = || StorageError::UnknownRow {
            table: name.to_string(),
            row: row_id,
        };
        if row_id < 0 {
            let offset = -row_id - 1;
            self.conn
                .query_row(
                    &format!("SELECT {ID_FIELD} FROM \"{name}\" ORDER BY {ID_FIELD} DESC LIMIT 1 OFFSET ?1"),
                    params![offset],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(missing)
        } else if row_id == 0 {
            Err(missing())
        } else {
            self.conn
                .query_row(
                    &format!("SELECT {ID_FIELD} FROM \"{name}\" WHERE {ID_FIELD} = ?1"),
                    params![row_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(missing)
        }
    }

    /// Map an ordinal position (1-based, clamped) to a real row id.
    fn id_at_position(&self, name: &str, position: i64) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {ID_FIELD} FROM \"{name}\" ORDER BY {ID_FIELD} LIMIT 1 OFFSET ?1"),
                params![position - 1],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn select_ids(&self, name: &str, selection: &LineSelection) -> Result<Vec<i64>> {
        match selection {
            LineSelection::All => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT {ID_FIELD} FROM \"{name}\" ORDER BY {ID_FIELD}"))?;
                let ids = stmt.query_map([], |row| row.get(0))?;
                Ok(ids.collect::<std::result::Result<Vec<i64>, _>>()?)
            }
            LineSelection::Range(first, last) => {
                let count = self.nb_lines(name)? as i64;
                if count == 0 {
                    return Ok(Vec::new());
                }
                let resolve = |endpoint: i64| -> i64 {
                    let position = if endpoint < 0 {
                        count + 1 + endpoint
                    } else {
                        endpoint
                    };
                    position.clamp(1, count)
                };
                let start = resolve(*first);
                let end = resolve(*last).max(start);
                let (Some(start_id), Some(end_id)) = (
                    self.id_at_position(name, start)?,
                    self.id_at_position(name, end)?,
                ) else {
                    return Ok(Vec::new());
                };
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {ID_FIELD} FROM \"{name}\" \
                     WHERE {ID_FIELD} BETWEEN ?1 AND ?2 ORDER BY {ID_FIELD}"
                ))?;
                let ids = stmt.query_map(params![start_id, end_id], |row| row.get(0))?;
                Ok(ids.collect::<std::result::Result<Vec<i64>, _>>()?)
            }
            LineSelection::Ids(requested) => requested
                .iter()
                .map(|row_id| self.resolve_row_id(name, *row_id))
                .collect(),
        }
    }

    fn fetch_line(
        &self,
        schema: &TableSchema,
        id: i64,
        fields: Option<&[&str]>,
        joins: &[String],
    ) -> Result<Line> {
        let mut selected: Vec<&FieldDef> = schema
            .fields()
            .iter()
            .filter(|f| fields.is_none_or(|list| list.contains(&f.name.as_str())))
            .collect();
        // Foreign-key fields of joined tables are always needed to
        // resolve the nested lines.
        for (field, target) in schema.foreign_keys() {
            if joins.iter().any(|j| j == target) && !selected.iter().any(|f| f.name == field) {
                if let Some(def) = schema.field(field) {
                    selected.push(def);
                }
            }
        }

        let mut values = Vec::with_capacity(selected.len());
        if selected.is_empty() {
            // Only the identifier exists or was requested.
            self.resolve_row_id(&schema.name, id)?;
        } else {
            let columns = selected
                .iter()
                .map(|f| format!("\"{}\"", f.name))
                .collect::<Vec<_>>()
                .join(", ");
            let raw: Vec<rusqlite::types::Value> = self
                .conn
                .query_row(
                    &format!("SELECT {columns} FROM \"{}\" WHERE {ID_FIELD} = ?1", schema.name),
                    params![id],
                    |row| {
                        (0..selected.len())
                            .map(|i| row.get::<_, rusqlite::types::Value>(i))
                            .collect()
                    },
                )
                .optional()?
                .ok_or(StorageError::UnknownRow {
                    table: schema.name.clone(),
                    row: id,
                })?;
            for (def, raw_value) in selected.iter().zip(raw) {
                values.push((def.name.clone(), decode_value(&def.kind, raw_value)?));
            }
        }

        let mut nested = Vec::new();
        for (field, target) in schema.foreign_keys() {
            if !joins.iter().any(|j| j == target) {
                continue;
            }
            let Some(Value::Integer(fk_id)) = values
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, v)| v)
            else {
                continue;
            };
            let target_schema = self.table_schema(target)?;
            nested.push((
                field.to_string(),
                self.fetch_line(target_schema, *fk_id, fields, joins)?,
            ));
        }

        Ok(Line { id, values, nested })
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("tables", &self.tables.len())
            .field("signals", &self.signals)
            .finish()
    }
}

// ----------------------------------------------------------------------
// Free helpers
// ----------------------------------------------------------------------

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| StorageError::Encoding(format!("cannot open {}: {e}", path.display())))?;
    // Performance pragmas for fast per-step inserts.
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA journal_mode = WAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA cache_size = -64000;",
    )?;
    Ok(conn)
}

fn init_registry(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {TABLES_REGISTRY} (
            position INTEGER PRIMARY KEY AUTOINCREMENT,
            table_name TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS {FIELDS_REGISTRY} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_name TEXT NOT NULL,
            field_name TEXT NOT NULL,
            kind TEXT NOT NULL,
            default_value BLOB,
            revision INTEGER NOT NULL,
            UNIQUE (table_name, field_name)
        );"
    ))?;
    Ok(())
}

/// Next free `name(index).ext` path next to an existing file.
fn indexed_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "db".to_string());
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut index = 1;
    loop {
        let candidate = parent.join(format!("{stem}({index}).{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

fn remove_sidecar_files(path: &Path) {
    for suffix in ["-wal", "-shm"] {
        let sidecar = format!("{}{suffix}", path.display());
        if let Err(e) = std::fs::remove_file(&sidecar) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove {sidecar}: {e}");
            }
        }
    }
}

fn apply_fields(tx: &Transaction<'_>, schema: &mut TableSchema, fields: &[FieldSpec]) -> Result<()> {
    for spec in fields {
        tx.execute(
            &format!(
                "ALTER TABLE \"{}\" ADD COLUMN \"{}\" {}",
                schema.name,
                spec.name,
                spec.kind.sql_type()
            ),
            [],
        )?;
        let revision = schema.next_revision();
        let default_blob = spec
            .default
            .as_ref()
            .map(|v| bincode::serialize(v).map_err(|e| StorageError::Encoding(e.to_string())))
            .transpose()?;
        tx.execute(
            &format!(
                "INSERT INTO {FIELDS_REGISTRY} \
                 (table_name, field_name, kind, default_value, revision) \
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            params![
                schema.name,
                spec.name,
                spec.kind.as_token(),
                default_blob,
                revision
            ],
        )?;
        schema.fields.push(FieldDef {
            name: spec.name.clone(),
            kind: spec.kind.clone(),
            default: spec.default.clone(),
            revision,
        });
    }
    Ok(())
}

fn infer_specs(values: &[(String, Value)]) -> Result<Vec<FieldSpec>> {
    values
        .iter()
        .map(|(field, value)| {
            validate_identifier(field)?;
            Ok(FieldSpec::new(field.clone(), FieldKind::infer(field, value)?))
        })
        .collect()
}

/// Build the full row in declared field order: provided values, then
/// declared defaults, then NULL. Timestamp fields with no default are
/// stamped with the current time.
fn materialize_row(schema: &TableSchema, values: &[(String, Value)]) -> Result<Vec<(String, Value)>> {
    let mut row = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let provided = values
            .iter()
            .find(|(name, _)| name == &field.name)
            .map(|(_, v)| v);
        let value = match provided {
            Some(value) => {
                if !field.kind.accepts(value) {
                    return Err(StorageError::TypeMismatch {
                        table: schema.name.clone(),
                        field: field.name.clone(),
                        expected: field.kind.to_string(),
                        found: value.type_name().to_string(),
                    });
                }
                value.clone()
            }
            None => match (&field.default, &field.kind) {
                (Some(default), _) => default.clone(),
                (None, FieldKind::Timestamp) => Value::Timestamp(unix_now()),
                (None, _) => Value::Null,
            },
        };
        row.push((field.name.clone(), value));
    }
    Ok(row)
}

fn insert_materialized(conn: &Connection, schema: &TableSchema, row: &[(String, Value)]) -> Result<i64> {
    if row.is_empty() {
        conn.execute(
            &format!("INSERT INTO \"{}\" DEFAULT VALUES", schema.name),
            [],
        )?;
        return Ok(conn.last_insert_rowid());
    }
    let columns = row
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=row.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut params: Vec<rusqlite::types::Value> = Vec::with_capacity(row.len());
    for (name, value) in row {
        let def = schema.field(name).ok_or_else(|| StorageError::UndefinedFields {
            table: schema.name.clone(),
            fields: vec![name.clone()],
        })?;
        params.push(bind_value(&def.kind, value)?);
    }
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO \"{}\" ({columns}) VALUES ({placeholders})",
        schema.name
    ))?;
    stmt.execute(params_from_iter(params))?;
    Ok(conn.last_insert_rowid())
}

fn bind_value(kind: &FieldKind, value: &Value) -> Result<rusqlite::types::Value> {
    use rusqlite::types::Value as Sql;
    Ok(match (kind, value) {
        (_, Value::Null) => Sql::Null,
        (FieldKind::Float, Value::Integer(v)) => Sql::Real(*v as f64),
        (_, Value::Integer(v)) => Sql::Integer(*v),
        (_, Value::Float(v)) => Sql::Real(*v),
        (_, Value::Text(v)) => Sql::Text(v.clone()),
        (_, Value::Boolean(v)) => Sql::Integer(i64::from(*v)),
        (_, Value::Timestamp(v)) => Sql::Integer(*v),
        (_, Value::Array(a)) => Sql::Blob(a.to_bytes()?),
    })
}

fn decode_value(kind: &FieldKind, raw: rusqlite::types::Value) -> Result<Value> {
    use rusqlite::types::Value as Sql;
    Ok(match (kind, raw) {
        (_, Sql::Null) => Value::Null,
        (FieldKind::Boolean, Sql::Integer(v)) => Value::Boolean(v != 0),
        (FieldKind::Timestamp, Sql::Integer(v)) => Value::Timestamp(v),
        (FieldKind::Array, Sql::Blob(bytes)) => Value::Array(Array::from_bytes(&bytes)?),
        (_, Sql::Integer(v)) => Value::Integer(v),
        (_, Sql::Real(v)) => Value::Float(v),
        (_, Sql::Text(v)) => Value::Text(v),
        (kind, Sql::Blob(_)) => {
            return Err(StorageError::Encoding(format!(
                "unexpected BLOB in a {kind} field"
            )))
        }
    })
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}
