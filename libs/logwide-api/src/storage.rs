//! Contract between the write path and a wide-column store.
//!
//! The store is a set of named column families. Each family declares the
//! kind of its row keys and of its column names. Writes go through one
//! [`MutationBatch`] per logical event, applied all-or-nothing by
//! [`StorageClient::execute`]; reads are point lookups returning the row's
//! columns ordered by name.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by a store. Opaque to the write path, which passes it
/// to the caller unchanged.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct StorageError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
            source: None,
        }
    }

    pub fn with_source(
        msg: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: msg.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// ---------------------------------------------------------------------------
// Column families and keys
// ---------------------------------------------------------------------------

/// Declared kind of a row key or column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Version-1 time UUID, ordered by embedded time.
    TimeUuid,
    /// UTF-8 text, ordered lexicographically.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnFamily {
    pub name: String,
    pub key_kind: KeyKind,
    pub column_kind: KeyKind,
}

impl ColumnFamily {
    pub fn new(name: impl Into<String>, key_kind: KeyKind, column_kind: KeyKind) -> Self {
        Self {
            name: name.into(),
            key_kind,
            column_kind,
        }
    }

    /// Event table: time-UUID row keys, text column names.
    pub fn primary(name: impl Into<String>) -> Self {
        Self::new(name, KeyKind::TimeUuid, KeyKind::Text)
    }

    /// Reverse index: text row keys, time-UUID column names.
    pub fn index(name: impl Into<String>) -> Self {
        Self::new(name, KeyKind::Text, KeyKind::TimeUuid)
    }
}

/// A row key or a column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    TimeUuid(Uuid),
    Text(String),
}

pub type RowKey = Key;
pub type ColumnName = Key;

impl Key {
    pub fn kind(&self) -> KeyKind {
        match self {
            Key::TimeUuid(_) => KeyKind::TimeUuid,
            Key::Text(_) => KeyKind::Text,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Key::TimeUuid(id) => Some(*id),
            Key::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Key::Text(s) => Some(s),
            Key::TimeUuid(_) => None,
        }
    }
}

/// 60-bit timestamp of a version-1 UUID, in 100ns ticks since 1582-10-15.
pub fn time_ticks(id: &Uuid) -> Option<u64> {
    if id.get_version_num() != 1 {
        return None;
    }
    let b = id.as_bytes();
    let low = u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
    let mid = u64::from(u16::from_be_bytes([b[4], b[5]]));
    let high = u64::from(u16::from_be_bytes([b[6], b[7]]) & 0x0fff);
    Some((high << 48) | (mid << 32) | low)
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::TimeUuid(a), Key::TimeUuid(b)) => time_ticks(a)
                .cmp(&time_ticks(b))
                .then_with(|| a.as_bytes().cmp(b.as_bytes())),
            (Key::Text(a), Key::Text(b)) => a.cmp(b),
            (Key::TimeUuid(_), Key::Text(_)) => Ordering::Less,
            (Key::Text(_), Key::TimeUuid(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::TimeUuid(id) => write!(f, "{id}"),
            Key::Text(s) => f.write_str(s),
        }
    }
}

impl From<Uuid> for Key {
    fn from(id: Uuid) -> Self {
        Key::TimeUuid(id)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// Typed cell value.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Int(i32),
    Long(i64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl ColumnValue {
    fn kind_name(&self) -> &'static str {
        match self {
            ColumnValue::Int(_) => "int",
            ColumnValue::Long(_) => "long",
            ColumnValue::Text(_) => "text",
            ColumnValue::Uuid(_) => "uuid",
            ColumnValue::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Int(v) => write!(f, "{v}"),
            ColumnValue::Long(v) => write!(f, "{v}"),
            ColumnValue::Text(s) => f.write_str(s),
            ColumnValue::Uuid(id) => write!(f, "{id}"),
            ColumnValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::Int(v)
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Long(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::Text(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::Text(v)
    }
}

impl From<Uuid> for ColumnValue {
    fn from(v: Uuid) -> Self {
        ColumnValue::Uuid(v)
    }
}

impl From<DateTime<Utc>> for ColumnValue {
    fn from(v: DateTime<Utc>) -> Self {
        ColumnValue::Timestamp(v)
    }
}

/// One stored column with typed accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: ColumnName,
    pub value: ColumnValue,
}

impl Column {
    pub fn new(name: impl Into<ColumnName>, value: impl Into<ColumnValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    fn mismatch(&self, wanted: &str) -> StorageError {
        StorageError::new(format!(
            "column '{}' holds a {} value, not {wanted}",
            self.name,
            self.value.kind_name()
        ))
    }

    pub fn as_int(&self) -> Result<i32, StorageError> {
        match &self.value {
            ColumnValue::Int(v) => Ok(*v),
            ColumnValue::Long(v) => i32::try_from(*v).map_err(|_| self.mismatch("int")),
            _ => Err(self.mismatch("int")),
        }
    }

    pub fn as_long(&self) -> Result<i64, StorageError> {
        match &self.value {
            ColumnValue::Long(v) => Ok(*v),
            ColumnValue::Int(v) => Ok(i64::from(*v)),
            ColumnValue::Timestamp(ts) => Ok(ts.timestamp_millis()),
            _ => Err(self.mismatch("long")),
        }
    }

    pub fn as_string(&self) -> Result<String, StorageError> {
        match &self.value {
            ColumnValue::Text(s) => Ok(s.clone()),
            _ => Err(self.mismatch("string")),
        }
    }

    pub fn as_uuid(&self) -> Result<Uuid, StorageError> {
        match &self.value {
            ColumnValue::Uuid(id) => Ok(*id),
            _ => Err(self.mismatch("uuid")),
        }
    }

    /// Timestamp cells, or long cells read as epoch milliseconds.
    pub fn as_timestamp(&self) -> Result<DateTime<Utc>, StorageError> {
        match &self.value {
            ColumnValue::Timestamp(ts) => Ok(*ts),
            ColumnValue::Long(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .ok_or_else(|| self.mismatch("timestamp")),
            _ => Err(self.mismatch("timestamp")),
        }
    }
}

/// Columns of one row, ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnList {
    columns: Vec<Column>,
}

impl ColumnList {
    pub fn new(mut columns: Vec<Column>) -> Self {
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &ColumnName) -> Option<&Column> {
        self.columns
            .binary_search_by(|c| c.name.cmp(name))
            .ok()
            .map(|i| &self.columns[i])
    }

    /// Text-named column lookup.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.as_text() == Some(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }
}

impl IntoIterator for ColumnList {
    type Item = Column;
    type IntoIter = std::vec::IntoIter<Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// "Set these columns on this row key" for one family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMutation {
    pub family: ColumnFamily,
    pub key: RowKey,
    pub columns: Vec<Column>,
}

impl RowMutation {
    /// Set a column, replacing an earlier value staged under the same name.
    pub fn put_column(
        &mut self,
        name: impl Into<ColumnName>,
        value: impl Into<ColumnValue>,
    ) -> &mut Self {
        let column = Column::new(name, value);
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => existing.value = column.value,
            None => self.columns.push(column),
        }
        self
    }
}

/// Row mutations across one or more families, applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    rows: Vec<RowMutation>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row mutation for `(family, key)`, created on first use.
    pub fn with_row(&mut self, family: &ColumnFamily, key: impl Into<RowKey>) -> &mut RowMutation {
        let key = key.into();
        let pos = match self
            .rows
            .iter()
            .position(|r| r.family.name == family.name && r.key == key)
        {
            Some(pos) => pos,
            None => {
                self.rows.push(RowMutation {
                    family: family.clone(),
                    key,
                    columns: Vec::new(),
                });
                self.rows.len() - 1
            }
        };
        &mut self.rows[pos]
    }

    pub fn rows(&self) -> &[RowMutation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.rows.iter().map(|r| r.columns.len()).sum()
    }

    pub fn into_rows(self) -> Vec<RowMutation> {
        self.rows
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Store capabilities consumed by the write path.
///
/// Implementations must be safe for concurrent use and must apply a batch
/// atomically: either every row mutation becomes visible or none does.
/// Calls block until the store answers.
pub trait StorageClient: Send + Sync {
    /// Make sure `family` exists with the declared kinds.
    fn ensure_family(&self, _family: &ColumnFamily) -> Result<(), StorageError> {
        Ok(())
    }

    /// Apply every mutation in `batch`, or none.
    fn execute(&self, batch: MutationBatch) -> Result<(), StorageError>;

    /// Point read. `None` when the row has no columns.
    fn get_row(
        &self,
        family: &ColumnFamily,
        key: &RowKey,
    ) -> Result<Option<ColumnList>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1(ticks: u64, node: u8) -> Uuid {
        #[allow(deprecated)]
        let ts = uuid::Timestamp::from_rfc4122(ticks, 0);
        Uuid::new_v1(ts, &[node; 6])
    }

    #[test]
    fn time_uuid_keys_order_by_embedded_time() {
        let early = Key::from(v1(1_000, 9));
        let late = Key::from(v1(2_000, 1));
        assert!(early < late);
        assert_eq!(time_ticks(&v1(1_000, 9)), Some(1_000));
        assert_eq!(time_ticks(&Uuid::new_v4()), None);
    }

    #[test]
    fn text_keys_order_lexicographically() {
        let mut keys = vec![Key::from("web2"), Key::from("db1"), Key::from("web10")];
        keys.sort();
        let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["db1", "web10", "web2"]);
    }

    #[test]
    fn with_row_merges_same_family_and_key() {
        let events = ColumnFamily::primary("logstash");
        let by_host = ColumnFamily::index("by_host");
        let id = v1(5, 1);

        let mut batch = MutationBatch::new();
        batch.with_row(&events, id).put_column("a", 1).put_column("b", "x");
        batch.with_row(&events, id).put_column("a", 2);
        batch.with_row(&by_host, "web1").put_column(v1(7, 2), id);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.column_count(), 3);
        assert_eq!(batch.rows()[0].columns[0].value, ColumnValue::Int(2));
    }

    #[test]
    fn accessors_check_cell_kind() {
        let col = Column::new("response", 403);
        assert_eq!(col.as_int().unwrap(), 403);
        assert_eq!(col.as_long().unwrap(), 403);
        assert!(col.as_string().is_err());
        assert!(col.as_uuid().is_err());

        let ts = Column::new("ts", 1_357_095_845_678_i64);
        assert_eq!(ts.as_timestamp().unwrap().timestamp_millis(), 1_357_095_845_678);

        let err = Column::new("msg", "x").as_int().unwrap_err();
        assert_eq!(err.to_string(), "column 'msg' holds a text value, not int");
    }

    #[test]
    fn column_list_lookup() {
        let list = ColumnList::new(vec![Column::new("b", 2), Column::new("a", 1)]);
        let names: Vec<String> = list.iter().map(|c| c.name.to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(list.get(&Key::from("b")).map(|c| c.value.clone()), Some(ColumnValue::Int(2)));
        assert!(list.column("c").is_none());
    }

    #[test]
    fn storage_error_keeps_source() {
        let io = std::io::Error::other("connection reset");
        let err = StorageError::with_source("batch failed", io);
        assert_eq!(err.to_string(), "batch failed");
        assert!(std::error::Error::source(&err).is_some());
    }
}
