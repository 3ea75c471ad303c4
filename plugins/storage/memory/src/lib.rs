use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use logwide_api::{
    Column, ColumnFamily, ColumnList, ColumnName, ColumnValue, Key, MutationBatch, RowKey,
    RowMutation, StorageClient, StorageError,
};

// ═══════════════════════════════════════════════════════════════
//  Table
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
struct Table {
    family: ColumnFamily,
    rows: BTreeMap<RowKey, BTreeMap<ColumnName, ColumnValue>>,
}

impl Table {
    fn new(family: ColumnFamily) -> Self {
        Self {
            family,
            rows: BTreeMap::new(),
        }
    }

    fn check(&self, mutation: &RowMutation) -> Result<(), StorageError> {
        let family = &self.family;
        if mutation.family != *family {
            return Err(StorageError::new(format!(
                "column family '{}' is declared as {:?}/{:?}, batch uses {:?}/{:?}",
                family.name,
                family.key_kind,
                family.column_kind,
                mutation.family.key_kind,
                mutation.family.column_kind
            )));
        }
        if mutation.key.kind() != family.key_kind {
            return Err(StorageError::new(format!(
                "row key '{}' is not a {:?} key of '{}'",
                mutation.key, family.key_kind, family.name
            )));
        }
        if let Some(col) = mutation.columns.iter().find(|c| c.name.kind() != family.column_kind) {
            return Err(StorageError::new(format!(
                "column '{}' is not a {:?} column of '{}'",
                col.name, family.column_kind, family.name
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// In-process wide-column store.
///
/// A batch is checked in full under the write lock before any row is
/// touched, so a rejected batch leaves nothing behind.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with `families` already declared.
    pub fn with_families(families: impl IntoIterator<Item = ColumnFamily>) -> Self {
        let tables = families
            .into_iter()
            .map(|f| (f.name.clone(), Table::new(f)))
            .collect();
        Self {
            tables: RwLock::new(tables),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Table>> {
        match self.tables.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory store read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Table>> {
        match self.tables.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory store write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn family_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Rows currently held by `family`; 0 for an unknown family.
    pub fn row_count(&self, family: &str) -> usize {
        self.read().get(family).map_or(0, |t| t.rows.len())
    }

    /// Columns of one row, ordered by name.
    pub fn columns(&self, family: &str, key: &RowKey) -> Vec<Column> {
        self.read()
            .get(family)
            .and_then(|t| t.rows.get(key))
            .map(|row| {
                row.iter()
                    .map(|(name, value)| Column {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl StorageClient for MemoryStore {
    fn ensure_family(&self, family: &ColumnFamily) -> Result<(), StorageError> {
        let mut tables = self.write();
        match tables.get(&family.name) {
            Some(existing) if existing.family != *family => Err(StorageError::new(format!(
                "column family '{}' already exists with {:?}/{:?}",
                family.name, existing.family.key_kind, existing.family.column_kind
            ))),
            Some(_) => Ok(()),
            None => {
                tracing::debug!(family = %family.name, "declared column family");
                tables.insert(family.name.clone(), Table::new(family.clone()));
                Ok(())
            }
        }
    }

    fn execute(&self, batch: MutationBatch) -> Result<(), StorageError> {
        let mut tables = self.write();
        for mutation in batch.rows() {
            let table = tables.get(&mutation.family.name).ok_or_else(|| {
                StorageError::new(format!("unknown column family '{}'", mutation.family.name))
            })?;
            table.check(mutation)?;
        }

        for mutation in batch.into_rows() {
            let Some(table) = tables.get_mut(&mutation.family.name) else {
                continue;
            };
            let row = table.rows.entry(mutation.key).or_default();
            for Column { name, value } in mutation.columns {
                row.insert(name, value);
            }
        }
        Ok(())
    }

    fn get_row(&self, family: &ColumnFamily, key: &Key) -> Result<Option<ColumnList>, StorageError> {
        let tables = self.read();
        let table = tables
            .get(&family.name)
            .ok_or_else(|| StorageError::new(format!("unknown column family '{}'", family.name)))?;
        Ok(table
            .rows
            .get(key)
            .filter(|row| !row.is_empty())
            .map(|row| {
                ColumnList::new(
                    row.iter()
                        .map(|(name, value)| Column {
                            name: name.clone(),
                            value: value.clone(),
                        })
                        .collect(),
                )
            }))
    }
}
