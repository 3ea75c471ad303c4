use std::sync::Arc;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use uuid::Uuid;

use logwide_api::{
    ColumnFamily, ColumnSpec, ColumnType, ColumnValue, EventRecord, EventSchema, Key,
    MutationBatch, StorageClient, Value,
};

use crate::error::EngineError;
use crate::id::UniqueIdGenerator;

/// An index table together with the template its row keys are expanded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDestination {
    pub family: ColumnFamily,
    pub template: String,
}

impl IndexDestination {
    pub fn new(family: ColumnFamily, template: impl Into<String>) -> Self {
        Self {
            family,
            template: template.into(),
        }
    }
}

/// Back-reference from an index row to a primary row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub family: ColumnFamily,
    pub row_key: String,
    pub column: Uuid,
    pub primary_id: Uuid,
}

/// Everything one `write` call stages before touching the store.
#[derive(Debug, Clone)]
pub struct RowWriteRequest {
    pub primary_id: Uuid,
    pub values: Vec<(String, ColumnValue)>,
    pub index_entries: Vec<IndexEntry>,
}

impl RowWriteRequest {
    pub fn into_batch(self, primary: &ColumnFamily) -> MutationBatch {
        let mut batch = MutationBatch::new();
        let row = batch.with_row(primary, self.primary_id);
        for (name, value) in self.values {
            row.put_column(name, value);
        }
        for entry in self.index_entries {
            batch
                .with_row(&entry.family, entry.row_key)
                .put_column(entry.column, entry.primary_id);
        }
        batch
    }
}

/// A primary row read back through a schema, in schema order.
///
/// Columns the row does not hold are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRow {
    pub id: Uuid,
    columns: Vec<(String, Option<ColumnValue>)>,
}

impl TypedRow {
    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&ColumnValue>)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Serialize for TypedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// RowWriter
// ---------------------------------------------------------------------------

/// Turns one record into one atomic batch: the primary row plus a
/// back-reference column in every index table.
///
/// Holds no per-call state; share it across threads behind an `Arc`.
pub struct RowWriter {
    client: Arc<dyn StorageClient>,
    primary: ColumnFamily,
    ids: UniqueIdGenerator,
}

impl std::fmt::Debug for RowWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowWriter")
            .field("primary", &self.primary.name)
            .finish()
    }
}

impl RowWriter {
    pub fn new(client: Arc<dyn StorageClient>, primary: ColumnFamily) -> Self {
        Self {
            client,
            primary,
            ids: UniqueIdGenerator::new(),
        }
    }

    pub fn primary_family(&self) -> &ColumnFamily {
        &self.primary
    }

    /// Validate `record`, stage its mutations and submit them as one batch.
    ///
    /// Returns the generated primary id. Configuration, validation and
    /// format errors are raised before the store is called.
    pub fn write(
        &self,
        record: &EventRecord,
        schema: Option<&EventSchema>,
        destinations: &[IndexDestination],
    ) -> Result<Uuid, EngineError> {
        let request = self.stage(record, schema, destinations)?;
        let primary_id = request.primary_id;
        let index_rows = request.index_entries.len();
        self.client.execute(request.into_batch(&self.primary))?;
        tracing::debug!(
            table = %self.primary.name,
            id = %primary_id,
            index_rows,
            "wrote event"
        );
        Ok(primary_id)
    }

    /// Build the write request without submitting it.
    pub fn stage(
        &self,
        record: &EventRecord,
        schema: Option<&EventSchema>,
        destinations: &[IndexDestination],
    ) -> Result<RowWriteRequest, EngineError> {
        let schema = require_schema(schema)?;
        let ts_column = schema.timestamp_column().ok_or_else(|| {
            EngineError::Configuration("event schema has no column sourced from @timestamp".into())
        })?;

        for column in schema.columns() {
            if record.get(&column.source).is_none_or(Value::is_null) {
                return Err(EngineError::Validation(format!(
                    "record has no field '{}' required by column '{}'",
                    column.source, column.name
                )));
            }
        }

        let timestamp = record
            .parsed_timestamp()
            .map_err(|e| EngineError::from(e).with_context(format!("column '{}'", ts_column.name)))?;

        let mut values = Vec::with_capacity(schema.len());
        for column in schema.columns() {
            let value = if column.is_timestamp_source() {
                timestamp_cell(column, &timestamp)?
            } else {
                field_cell(record, column)?
            };
            values.push((column.name.clone(), value));
        }

        let primary_id = self.ids.new_primary_id();
        let base_millis = timestamp.timestamp_millis();
        let mut index_entries = Vec::with_capacity(destinations.len());
        for dest in destinations {
            let row_key = record
                .format(&dest.template)
                .map_err(|e| EngineError::from(e).with_context(format!("index '{}'", dest.family.name)))?
                .into_owned();
            index_entries.push(IndexEntry {
                family: dest.family.clone(),
                row_key,
                column: self.ids.new_index_id(base_millis),
                primary_id,
            });
        }

        Ok(RowWriteRequest {
            primary_id,
            values,
            index_entries,
        })
    }

    /// Point read of a primary row by its textual id.
    pub fn read(&self, key: &str, schema: Option<&EventSchema>) -> Result<Option<TypedRow>, EngineError> {
        let schema = require_schema(schema)?;
        let id = Uuid::parse_str(key.trim())
            .map_err(|e| EngineError::Validation(format!("invalid row key '{key}': {e}")))?;
        self.read_typed(id, schema)
    }

    pub fn read_id(&self, id: Uuid, schema: Option<&EventSchema>) -> Result<Option<TypedRow>, EngineError> {
        self.read_typed(id, require_schema(schema)?)
    }

    fn read_typed(&self, id: Uuid, schema: &EventSchema) -> Result<Option<TypedRow>, EngineError> {
        let Some(row) = self.client.get_row(&self.primary, &Key::TimeUuid(id))? else {
            return Ok(None);
        };

        let mut columns = Vec::with_capacity(schema.len());
        for spec in schema.columns() {
            let value = match row.column(&spec.name) {
                None => None,
                Some(col) => Some(match spec.column_type {
                    ColumnType::Int => ColumnValue::Int(col.as_int()?),
                    ColumnType::Long => ColumnValue::Long(col.as_long()?),
                    ColumnType::String => ColumnValue::Text(col.as_string()?),
                    ColumnType::Uuid => ColumnValue::Uuid(col.as_uuid()?),
                    ColumnType::Timestamp => ColumnValue::Timestamp(col.as_timestamp()?),
                }),
            };
            columns.push((spec.name.clone(), value));
        }
        Ok(Some(TypedRow { id, columns }))
    }

    /// Primary ids referenced by one index row, oldest index column first.
    pub fn lookup(&self, index: &ColumnFamily, key: &str) -> Result<Vec<Uuid>, EngineError> {
        let Some(row) = self.client.get_row(index, &Key::from(key))? else {
            return Ok(Vec::new());
        };
        row.iter()
            .map(|col| col.as_uuid().map_err(EngineError::from))
            .collect()
    }
}

fn require_schema(schema: Option<&EventSchema>) -> Result<&EventSchema, EngineError> {
    schema.ok_or_else(|| EngineError::Configuration("no event schema configured".into()))
}

/// Cell for the column sourced from `@timestamp`.
fn timestamp_cell(column: &ColumnSpec, ts: &DateTime<FixedOffset>) -> Result<ColumnValue, EngineError> {
    match column.column_type {
        ColumnType::Timestamp => Ok(ColumnValue::Timestamp(ts.with_timezone(&Utc))),
        ColumnType::Long => Ok(ColumnValue::Long(ts.timestamp_millis())),
        ColumnType::String => Ok(ColumnValue::Text(ts.to_rfc3339_opts(SecondsFormat::Millis, true))),
        ColumnType::Int | ColumnType::Uuid => Err(EngineError::Configuration(format!(
            "timestamp column '{}' cannot be of type {}",
            column.name, column.column_type
        ))),
    }
}

/// Cell for an ordinary column: the first element of the source value,
/// coerced to the column type.
fn field_cell(record: &EventRecord, column: &ColumnSpec) -> Result<ColumnValue, EngineError> {
    let invalid = |what: &str| {
        EngineError::Validation(format!(
            "field '{}' for column '{}' {what}",
            column.source, column.name
        ))
    };
    let value = record
        .get(&column.source)
        .and_then(Value::first)
        .filter(|v| !v.is_null())
        .ok_or_else(|| invalid("is empty"))?;

    match column.column_type {
        ColumnType::Int => match value {
            Value::Int(v) => i32::try_from(*v).map_err(|_| invalid("does not fit an int")),
            Value::UInt(_) => Err(invalid("does not fit an int")),
            Value::String(s) => s.trim().parse::<i32>().map_err(|_| invalid("is not an int")),
            _ => Err(invalid("is not an int")),
        }
        .map(ColumnValue::Int),
        ColumnType::Long => match value {
            Value::Int(v) => Ok(*v),
            Value::UInt(_) => Err(invalid("does not fit a long")),
            Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid("is not a long")),
            _ => Err(invalid("is not a long")),
        }
        .map(ColumnValue::Long),
        ColumnType::String => Ok(ColumnValue::Text(value.to_string())),
        ColumnType::Uuid => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(ColumnValue::Uuid)
            .ok_or_else(|| invalid("is not a uuid")),
        ColumnType::Timestamp => match value {
            Value::Int(ms) => chrono::TimeZone::timestamp_millis_opt(&Utc, *ms)
                .single()
                .ok_or_else(|| invalid("is out of range")),
            Value::UInt(_) => Err(invalid("is out of range")),
            Value::String(s) => record
                .parse_time(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| invalid("is not a timestamp")),
            _ => Err(invalid("is not a timestamp")),
        }
        .map(ColumnValue::Timestamp),
    }
}
