use std::fmt;
use std::str::FromStr;

use crate::error::ApiError;
use crate::record::TIMESTAMP;

/// Value type of a target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Long,
    #[default]
    String,
    Uuid,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Long => "long",
            ColumnType::String => "string",
            ColumnType::Uuid => "uuid",
            ColumnType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int" => Ok(ColumnType::Int),
            "long" => Ok(ColumnType::Long),
            "string" => Ok(ColumnType::String),
            "uuid" => Ok(ColumnType::Uuid),
            "timestamp" => Ok(ColumnType::Timestamp),
            _ => Err(ApiError::format(format!("unknown column type '{s}'"))),
        }
    }
}

/// One target column: name, type, and the record key it is populated from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub source: String,
}

impl ColumnSpec {
    /// Whether this column is populated from the record's `@timestamp`.
    pub fn is_timestamp_source(&self) -> bool {
        self.source == TIMESTAMP
    }
}

/// Ordered column mapping for the primary table.
///
/// Order is the declaration order; it drives both validation on write and
/// typed extraction on read.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct EventSchema {
    columns: Vec<ColumnSpec>,
}

impl EventSchema {
    /// Parse `(target_spec, source_field)` pairs.
    ///
    /// `target_spec` is `"name"` or `"name:type"`; an omitted or empty type
    /// means `string`. Fails with a `Format` error on more than one `:`, an
    /// unknown type, an empty name or a repeated name.
    pub fn parse<I, T, S>(specs: I) -> Result<Self, ApiError>
    where
        I: IntoIterator<Item = (T, S)>,
        T: AsRef<str>,
        S: Into<String>,
    {
        let mut columns: Vec<ColumnSpec> = Vec::new();
        for (target, source) in specs {
            let (name, column_type) = parse_target(target.as_ref())?;
            if columns.iter().any(|c| c.name == name) {
                return Err(ApiError::format(format!("column '{name}' is declared twice")));
            }
            columns.push(ColumnSpec {
                name,
                column_type,
                source: source.into(),
            });
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column(name).map(|c| c.column_type)
    }

    pub fn source_of(&self, name: &str) -> Option<&str> {
        self.column(name).map(|c| c.source.as_str())
    }

    /// The column populated from `@timestamp`, required to generate time ids.
    pub fn timestamp_column(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.is_timestamp_source())
    }
}

/// Split `"name[:type]"`.
pub fn parse_target(spec: &str) -> Result<(String, ColumnType), ApiError> {
    let mut parts = spec.split(':');
    let name = parts.next().unwrap_or_default().trim();
    let type_tag = parts.next().map(str::trim).unwrap_or_default();
    if parts.next().is_some() {
        return Err(ApiError::format(format!(
            "target '{spec}' has more than one ':' separator"
        )));
    }
    if name.is_empty() {
        return Err(ApiError::format(format!("target '{spec}' has an empty column name")));
    }
    let column_type = if type_tag.is_empty() {
        ColumnType::default()
    } else {
        type_tag
            .parse()
            .map_err(|e: ApiError| e.with_context(format!("target '{spec}'")))?
    };
    Ok((name.to_string(), column_type))
}
