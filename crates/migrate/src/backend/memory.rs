//! In-memory transactional backend
//!
//! Each transaction works on a private copy of the committed state, which
//! `commit` publishes and `rollback` discards, so a second reader never sees
//! half-applied work. Statements are interpreted just enough to track which
//! tables and indexes exist. Failures can be injected to exercise the
//! executor's rollback path.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{MigrationBackend, MigrationTransaction, SchemaHandle};
use crate::error::{MigrateError, MigrateResult};
use crate::sql::split_statements;
use crate::state::{AppliedRecord, TrackingTable};

#[derive(Debug, Clone, Default)]
struct Snapshot {
    tables: BTreeSet<String>,
    indexes: BTreeSet<String>,
    statements: Vec<String>,
    tracking: BTreeMap<String, Vec<AppliedRecord>>,
}

#[derive(Debug, Default)]
struct Inner {
    committed: Snapshot,
    failing_statements: Vec<String>,
    failing_inserts: HashSet<String>,
    transactions_begun: usize,
    commits: usize,
    rollbacks: usize,
}

/// Shared in-memory database; clones observe the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MigrateResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| MigrateError::Backend("memory database lock poisoned".to_string()))
    }

    fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        match self.inner.lock() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    /// Make any statement containing `fragment` fail
    pub fn fail_statements_containing(&self, fragment: impl Into<String>) {
        if let Ok(mut inner) = self.lock() {
            inner.failing_statements.push(fragment.into());
        }
    }

    /// Make inserting the tracking record for `identifier` fail
    pub fn fail_record_insert(&self, identifier: impl Into<String>) {
        if let Ok(mut inner) = self.lock() {
            inner.failing_inserts.insert(identifier.into());
        }
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.failing_statements.clear();
            inner.failing_inserts.clear();
        }
    }

    /// Whether a committed table named `name` exists
    pub fn has_table(&self, name: &str) -> bool {
        self.read(|inner| inner.committed.tables.contains(name))
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.read(|inner| inner.committed.indexes.contains(name))
    }

    /// Committed statements, in execution order
    pub fn statements(&self) -> Vec<String> {
        self.read(|inner| inner.committed.statements.clone())
    }

    /// Committed tracking rows of `table`, or `None` if it was never created
    pub fn tracking_rows(&self, table: &TrackingTable) -> Option<Vec<AppliedRecord>> {
        self.read(|inner| inner.committed.tracking.get(table.name()).cloned())
    }

    /// Insert a tracking row directly, bypassing any unit
    pub fn seed_record(&self, table: &TrackingTable, record: AppliedRecord) {
        if let Ok(mut inner) = self.lock() {
            inner
                .committed
                .tracking
                .entry(table.name().to_string())
                .or_default()
                .push(record);
        }
    }

    pub fn transactions_begun(&self) -> usize {
        self.read(|inner| inner.transactions_begun)
    }

    pub fn commits(&self) -> usize {
        self.read(|inner| inner.commits)
    }

    pub fn rollbacks(&self) -> usize {
        self.read(|inner| inner.rollbacks)
    }
}

#[async_trait]
impl MigrationBackend for MemoryDatabase {
    async fn begin(&self) -> MigrateResult<Box<dyn MigrationTransaction>> {
        let working = {
            let mut inner = self.lock()?;
            inner.transactions_begun += 1;
            inner.committed.clone()
        };

        Ok(Box::new(MemoryTransaction {
            db: self.clone(),
            working,
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Transaction over a private copy of the committed state
pub struct MemoryTransaction {
    db: MemoryDatabase,
    working: Snapshot,
}

impl MemoryTransaction {
    fn tracking_mut(&mut self, table: &TrackingTable) -> MigrateResult<&mut Vec<AppliedRecord>> {
        self.working.tracking.get_mut(table.name()).ok_or_else(|| {
            MigrateError::Backend(format!("relation \"{}\" does not exist", table.name()))
        })
    }

    fn apply_statement(&mut self, statement: &str) -> MigrateResult<u64> {
        let tokens: Vec<String> = statement
            .split_whitespace()
            .map(|t| t.trim_end_matches(';').to_string())
            .collect();
        let upper: Vec<String> = tokens.iter().map(|t| t.to_uppercase()).collect();
        let words: Vec<&str> = upper.iter().map(String::as_str).collect();

        // Object names are the token after the keyword run, minus any column list.
        let name_at = |index: usize| -> Option<String> {
            tokens
                .get(index)
                .map(|t| t.split('(').next().unwrap_or(t).to_lowercase())
        };

        match words.as_slice() {
            ["CREATE", "TABLE", "IF", "NOT", "EXISTS", ..] => {
                if let Some(name) = name_at(5) {
                    self.working.tables.insert(name);
                }
            }
            ["CREATE", "TABLE", ..] => {
                let name = name_at(2).unwrap_or_default();
                if !self.working.tables.insert(name.clone()) {
                    return Err(MigrateError::Backend(format!(
                        "relation \"{}\" already exists",
                        name
                    )));
                }
            }
            ["DROP", "TABLE", "IF", "EXISTS", ..] => {
                if let Some(name) = name_at(4) {
                    self.working.tables.remove(&name);
                }
            }
            ["DROP", "TABLE", ..] => {
                let name = name_at(2).unwrap_or_default();
                if !self.working.tables.remove(&name) {
                    return Err(MigrateError::Backend(format!(
                        "table \"{}\" does not exist",
                        name
                    )));
                }
            }
            ["CREATE", "INDEX", "IF", "NOT", "EXISTS", ..]
            | ["CREATE", "UNIQUE", "INDEX", "IF", "NOT", "EXISTS", ..] => {
                let offset = if words[1] == "UNIQUE" { 6 } else { 5 };
                if let Some(name) = name_at(offset) {
                    self.working.indexes.insert(name);
                }
            }
            ["CREATE", "INDEX", ..] | ["CREATE", "UNIQUE", "INDEX", ..] => {
                let offset = if words[1] == "UNIQUE" { 3 } else { 2 };
                let name = name_at(offset).unwrap_or_default();
                if !self.working.indexes.insert(name.clone()) {
                    return Err(MigrateError::Backend(format!(
                        "relation \"{}\" already exists",
                        name
                    )));
                }
            }
            ["DROP", "INDEX", "IF", "EXISTS", ..] => {
                if let Some(name) = name_at(4) {
                    self.working.indexes.remove(&name);
                }
            }
            ["DROP", "INDEX", ..] => {
                let name = name_at(2).unwrap_or_default();
                if !self.working.indexes.remove(&name) {
                    return Err(MigrateError::Backend(format!(
                        "index \"{}\" does not exist",
                        name
                    )));
                }
            }
            ["ALTER", "TABLE", ..] => {
                let offset = if words.get(2) == Some(&"IF") { 4 } else { 2 };
                let name = name_at(offset).unwrap_or_default();
                if offset == 2 && !self.working.tables.contains(&name) {
                    return Err(MigrateError::Backend(format!(
                        "relation \"{}\" does not exist",
                        name
                    )));
                }
            }
            _ => {}
        }

        self.working.statements.push(statement.to_string());
        Ok(0)
    }
}

#[async_trait]
impl SchemaHandle for MemoryTransaction {
    async fn execute(&mut self, sql: &str) -> MigrateResult<u64> {
        let failing = self.db.read(|inner| {
            inner
                .failing_statements
                .iter()
                .find(|fragment| sql.contains(fragment.as_str()))
                .cloned()
        });
        if let Some(fragment) = failing {
            return Err(MigrateError::Backend(format!(
                "injected failure: statement contains '{}'",
                fragment
            )));
        }

        let mut affected = 0;
        for statement in split_statements(sql) {
            affected += self.apply_statement(&statement)?;
        }
        Ok(affected)
    }
}

#[async_trait]
impl MigrationTransaction for MemoryTransaction {
    fn schema(&mut self) -> &mut dyn SchemaHandle {
        self
    }

    async fn ensure_tracking_table(&mut self, table: &TrackingTable) -> MigrateResult<()> {
        self.working
            .tracking
            .entry(table.name().to_string())
            .or_default();
        Ok(())
    }

    async fn applied_records(&mut self, table: &TrackingTable) -> MigrateResult<Vec<AppliedRecord>> {
        // Row order is insertion order, like the surrogate key.
        Ok(self.tracking_mut(table)?.clone())
    }

    async fn insert_record(&mut self, table: &TrackingTable, identifier: &str) -> MigrateResult<AppliedRecord> {
        let injected = self
            .db
            .read(|inner| inner.failing_inserts.contains(identifier));
        if injected {
            return Err(MigrateError::Backend(format!(
                "injected failure: insert of {} into {}",
                identifier,
                table.name()
            )));
        }

        let rows = self.tracking_mut(table)?;
        if rows.iter().any(|r| r.identifier == identifier) {
            return Err(MigrateError::Backend(format!(
                "duplicate key value violates unique constraint on {}: {}",
                table.name(),
                identifier
            )));
        }
        let record = AppliedRecord::new(identifier, Utc::now());
        rows.push(record.clone());
        Ok(record)
    }

    async fn delete_record(&mut self, table: &TrackingTable, identifier: &str) -> MigrateResult<u64> {
        let rows = self.tracking_mut(table)?;
        let before = rows.len();
        rows.retain(|r| r.identifier != identifier);
        Ok((before - rows.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        let MemoryTransaction { db, working } = *self;
        let mut inner = db.lock()?;
        inner.committed = working;
        inner.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        let mut inner = self.db.lock()?;
        inner.rollbacks += 1;
        Ok(())
    }
}
