//! Step-synchronized recording over a set of tables.
//!
//! A [`Recorder`] wraps a [`Database`] and guarantees that every
//! tracked table accumulates exactly one new row per logical step:
//! the first [`Recorder::record`] on a table within a step inserts a
//! row, later calls overwrite it, and [`Recorder::end_step`] inserts a
//! default row into every tracked table that was not written at all.
//! Row identifier `k` therefore addresses step `k` in every tracked
//! table, which is what makes step-synchronous replay possible.

use std::collections::HashSet;

use crate::database::Database;
use crate::errors::Result;
use crate::schema::harmonize_name;
use crate::value::Value;

/// Row synchronizer enforcing the one-row-per-step discipline.
pub struct Recorder {
    database: Database,
    tracked: Vec<String>,
    written: HashSet<String>,
    steps: usize,
}

impl Recorder {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            tracked: Vec::new(),
            written: HashSet::new(),
            steps: 0,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Direct access to the wrapped database. Rows written through
    /// this handle bypass the step accounting.
    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.database
    }

    /// Register a table as a participant of the recording session.
    /// The table must already exist.
    pub fn track(&mut self, table_name: &str) -> Result<()> {
        let name = harmonize_name(table_name);
        self.database.table_schema(&name)?;
        if !self.tracked.contains(&name) {
            self.tracked.push(name);
        }
        Ok(())
    }

    pub fn is_tracked(&self, table_name: &str) -> bool {
        self.tracked.contains(&harmonize_name(table_name))
    }

    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    /// Completed step boundaries so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Write a table's row for the current step.
    ///
    /// The first write of a step inserts a new row; subsequent writes
    /// within the same step update that row, so multiple writes
    /// collapse into the last one. Untracked tables are tracked on
    /// first use.
    pub fn record(&mut self, table_name: &str, values: Vec<(String, Value)>) -> Result<i64> {
        let name = harmonize_name(table_name);
        if !self.is_tracked(&name) {
            // Tables written on the fly join the session; add_data
            // below may create them first.
            if self.database.has_table(&name) {
                self.track(&name)?;
            }
        }
        if self.written.contains(&name) {
            self.database.update(&name, values, -1)?;
            return self.database.get_line(&name, -1, Some(&[]), &[]).map(|l| l.id);
        }
        let id = self.database.add_data(&name, values)?;
        if !self.is_tracked(&name) {
            self.track(&name)?;
        }
        self.written.insert(name);
        Ok(id)
    }

    /// Close the current step: every tracked table that received no
    /// write gets one row with all fields at default/NULL. Returns the
    /// number of completed steps.
    pub fn end_step(&mut self) -> Result<usize> {
        let silent: Vec<String> = self
            .tracked
            .iter()
            .filter(|t| !self.written.contains(*t))
            .cloned()
            .collect();
        for table in silent {
            self.database.add_data(&table, Vec::new())?;
        }
        self.written.clear();
        self.steps += 1;
        Ok(self.steps)
    }

    /// Give the database back, e.g. to close it.
    pub fn into_database(self) -> Database {
        self.database
    }

    /// Close the wrapped database.
    pub fn close(self) -> Result<()> {
        self.database.close(false)
    }
}
