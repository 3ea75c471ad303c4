use std::fmt;

use chrono::{DateTime, FixedOffset};
use once_cell::sync::OnceCell;
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::ApiError;
use crate::timestamp::{self, TimestampParser};
use crate::value::{Fields, Value};

pub const TIMESTAMP: &str = "@timestamp";
pub const SOURCE: &str = "@source";
pub const SOURCE_HOST: &str = "@source_host";
pub const SOURCE_PATH: &str = "@source_path";
pub const TYPE: &str = "@type";
pub const TAGS: &str = "@tags";
pub const MESSAGE: &str = "@message";
pub const FIELDS: &str = "@fields";

/// Metadata every record carries. `remove` leaves these in place.
const REQUIRED: &[&str] = &[TIMESTAMP, SOURCE, TYPE, TAGS];

/// One inbound log event.
///
/// Top-level metadata (`@timestamp`, `@source`, `@type`, `@tags`, `@message`,
/// ...) is kept apart from user fields (`@fields`). Lookups check metadata
/// first, then fields; writes to a key that is not already metadata land in
/// fields.
///
/// `@timestamp` is stored as normalized text. The parsed form is computed on
/// first use and cached until the raw value is reassigned.
///
/// The cancellation flag has no effect of its own: it marks the record for
/// the caller's filtering and is not part of equality or serialization.
#[derive(Clone)]
pub struct EventRecord {
    metadata: Fields,
    fields: Fields,
    cancelled: bool,
    parsed: OnceCell<DateTime<FixedOffset>>,
    parser: Option<&'static dyn TimestampParser>,
}

/// Add the default metadata `metadata` lacks, after the keys it already has.
fn fill_defaults(metadata: &mut Fields) {
    if !metadata.contains_key(TIMESTAMP) {
        metadata.insert(TIMESTAMP, timestamp::now_iso8601());
    }
    let defaults = [
        (SOURCE, Value::from("unknown")),
        (TYPE, Value::Null),
        (TAGS, Value::Sequence(Vec::new())),
    ];
    for (key, value) in defaults {
        if !metadata.contains_key(key) {
            metadata.insert(key, value);
        }
    }
}

impl EventRecord {
    /// Empty record stamped with the current time.
    pub fn new() -> Self {
        let mut metadata = Fields::new();
        fill_defaults(&mut metadata);
        Self::assemble(metadata, Fields::new())
    }

    /// Build a record from a structured mapping, filling in default metadata.
    ///
    /// `@fields`, when present, must be a mapping. Every other top-level key
    /// is metadata. A missing `@timestamp` becomes the current time.
    pub fn from_fields(data: Fields) -> Result<Self, ApiError> {
        let mut metadata = Fields::new();
        let mut fields = Fields::new();
        for (key, value) in data {
            if key == FIELDS {
                match value {
                    Value::Mapping(map) => fields = map,
                    other => {
                        return Err(ApiError::format(format!(
                            "{FIELDS} must be a mapping, got {}",
                            other.to_json()
                        )));
                    }
                }
            } else {
                metadata.insert(key, value);
            }
        }
        fill_defaults(&mut metadata);
        Ok(Self::assemble(metadata, fields))
    }

    /// Parse a record from its JSON form.
    pub fn from_json(text: &str) -> Result<Self, ApiError> {
        let data: Fields = serde_json::from_str(text)?;
        Self::from_fields(data)
    }

    /// Compact JSON form: metadata keys followed by `@fields`.
    pub fn to_json(&self) -> Result<String, ApiError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Full normalized representation (metadata + `@fields`).
    pub fn to_fields(&self) -> Fields {
        let mut data = self.metadata.clone();
        data.insert(FIELDS, Value::Mapping(self.fields.clone()));
        data
    }

    fn assemble(metadata: Fields, fields: Fields) -> Self {
        Self {
            metadata,
            fields,
            cancelled: false,
            parsed: OnceCell::new(),
            parser: Some(timestamp::default_parser()),
        }
    }

    /// Replace the timestamp parser capability.
    ///
    /// `None` models an environment without a parser: time-based operations
    /// then fail with a `Format` error instead of degrading.
    pub fn with_parser(mut self, parser: Option<&'static dyn TimestampParser>) -> Self {
        self.parser = parser;
        self.parsed = OnceCell::new();
        self
    }

    pub fn parser(&self) -> Option<&'static dyn TimestampParser> {
        self.parser
    }

    // ── Generic access ──

    /// Metadata first, then fields.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key).or_else(|| self.fields.get(key))
    }

    /// Mutates metadata when `key` already is metadata, otherwise writes a field.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        if self.metadata.contains_key(key) {
            if key == TIMESTAMP {
                self.parsed = OnceCell::new();
            }
            self.metadata.insert(key, value);
        } else {
            self.fields.insert(key, value);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.metadata.contains_key(key) || self.fields.contains_key(key)
    }

    /// Remove metadata or a field, metadata first.
    ///
    /// `@timestamp`, `@source`, `@type` and `@tags` always stay present;
    /// removing them is a no-op returning `None`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if REQUIRED.contains(&key) {
            return None;
        }
        self.metadata.remove(key).or_else(|| self.fields.remove(key))
    }

    pub fn metadata(&self) -> &Fields {
        &self.metadata
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }

    /// Replace all data with `other`'s.
    pub fn overwrite(&mut self, other: EventRecord) {
        self.metadata = other.metadata;
        self.fields = other.fields;
        self.parsed = OnceCell::new();
    }

    // ── Timestamp ──

    pub fn timestamp(&self) -> Option<&str> {
        self.metadata.get(TIMESTAMP).and_then(Value::as_str)
    }

    pub fn set_timestamp(&mut self, raw: impl Into<String>) {
        self.metadata.insert(TIMESTAMP, raw.into());
        self.parsed = OnceCell::new();
    }

    /// Parsed `@timestamp`, computed once per raw value.
    pub fn parsed_timestamp(&self) -> Result<DateTime<FixedOffset>, ApiError> {
        let parser = self.require_parser()?;
        self.parsed
            .get_or_try_init(|| match self.timestamp() {
                Some(raw) => parser.parse(raw),
                None => Err(ApiError::format(format!("{TIMESTAMP} is not a string"))),
            })
            .copied()
    }

    pub fn timestamp_millis(&self) -> Result<i64, ApiError> {
        Ok(self.parsed_timestamp()?.timestamp_millis())
    }

    /// Seconds since the unix epoch, with millisecond fraction.
    pub fn unix_timestamp(&self) -> Result<f64, ApiError> {
        Ok(self.timestamp_millis()? as f64 / 1000.0)
    }

    /// Parse arbitrary text with this record's parser capability.
    pub fn parse_time(&self, raw: &str) -> Result<DateTime<FixedOffset>, ApiError> {
        self.require_parser()?.parse(raw)
    }

    fn require_parser(&self) -> Result<&'static dyn TimestampParser, ApiError> {
        self.parser
            .ok_or_else(|| ApiError::format("no timestamp parser available"))
    }

    // ── Well-known metadata ──

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE).and_then(Value::as_str)
    }

    /// Set `@source`.
    ///
    /// A URI-shaped source (`file://host/var/log/app.log`) also sets
    /// `@source_host` and `@source_path`; anything else is copied to
    /// `@source_host` as-is.
    pub fn set_source(&mut self, source: impl Into<String>) {
        let source = source.into();
        match split_uri(&source) {
            Some((host, path)) => {
                self.metadata.insert(SOURCE_HOST, host);
                self.metadata.insert(SOURCE_PATH, path);
            }
            None => {
                self.metadata.insert(SOURCE_HOST, source.clone());
            }
        }
        self.metadata.insert(SOURCE, source);
    }

    pub fn type_name(&self) -> Option<&str> {
        self.metadata.get(TYPE).and_then(Value::as_str)
    }

    pub fn set_type(&mut self, type_name: impl Into<String>) {
        self.metadata.insert(TYPE, type_name.into());
    }

    pub fn message(&self) -> Option<&str> {
        self.metadata.get(MESSAGE).and_then(Value::as_str)
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.metadata.insert(MESSAGE, message.into());
    }

    /// String tags in display order.
    pub fn tags(&self) -> Vec<&str> {
        self.metadata
            .get(TAGS)
            .and_then(Value::as_sequence)
            .map(|tags| tags.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().contains(&tag)
    }

    pub fn set_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags.into_iter().map(|t| Value::String(t.into())).collect();
        self.metadata.insert(TAGS, Value::Sequence(tags));
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = Value::String(tag.into());
        match self.metadata.get_mut(TAGS) {
            Some(Value::Sequence(tags)) => {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
            _ => {
                self.metadata.insert(TAGS, Value::Sequence(vec![tag]));
            }
        }
    }

    // ── Cancellation ──

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    // ── Merging ──

    /// Fold `other` into this record.
    ///
    /// - messages are joined with a newline
    /// - tags become the union, own tags first
    /// - a field only `other` has is copied; a field both have becomes a
    ///   sequence (scalars are promoted) that gains `other`'s value, with
    ///   incoming sequences merged as a union
    pub fn append(&mut self, other: &EventRecord) {
        let message = format!(
            "{}\n{}",
            self.message().unwrap_or_default(),
            other.message().unwrap_or_default()
        );
        self.set_message(message);

        let mut tags = self
            .metadata
            .get(TAGS)
            .and_then(Value::as_sequence)
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        let incoming_tags = other
            .metadata
            .get(TAGS)
            .and_then(Value::as_sequence)
            .unwrap_or_default();
        union_into(&mut tags, incoming_tags);
        self.metadata.insert(TAGS, Value::Sequence(tags));

        for (name, incoming) in other.fields.iter() {
            if !self.fields.contains_key(name) {
                self.fields.insert(name, incoming.clone());
                continue;
            }
            if let Some(existing) = self.fields.get_mut(name) {
                if !matches!(existing, Value::Sequence(_)) {
                    let scalar = std::mem::replace(existing, Value::Null);
                    *existing = Value::Sequence(vec![scalar]);
                }
                if let Value::Sequence(items) = existing {
                    match incoming {
                        Value::Sequence(values) => union_into(items, values),
                        scalar => items.push(scalar.clone()),
                    }
                }
            }
        }
    }
}

impl Default for EventRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for EventRecord {
    fn eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata && self.fields == other.fields
    }
}

impl fmt::Debug for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRecord")
            .field("metadata", &self.metadata)
            .field("fields", &self.fields)
            .field("cancelled", &self.cancelled)
            .field("parser", &self.parser.is_some())
            .finish()
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = self
            .format("%{@timestamp} %{@source}: %{@message}")
            .map_err(|_| fmt::Error)?;
        f.write_str(&line)
    }
}

impl Serialize for EventRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.metadata.len() + 1))?;
        for (k, v) in self.metadata.iter() {
            map.serialize_entry(k, v)?;
        }
        map.serialize_entry(FIELDS, &self.fields)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for EventRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = Fields::deserialize(deserializer)?;
        EventRecord::from_fields(data).map_err(de::Error::custom)
    }
}

/// Set union in place: `target` drops duplicates, then gains the unseen
/// `incoming` items in order.
fn union_into(target: &mut Vec<Value>, incoming: &[Value]) {
    let mut merged: Vec<Value> = Vec::with_capacity(target.len() + incoming.len());
    for item in target.drain(..).chain(incoming.iter().cloned()) {
        if !merged.contains(&item) {
            merged.push(item);
        }
    }
    *target = merged;
}

/// `scheme://[user@]host[:port][/path]` → `(host, path)`.
fn split_uri(raw: &str) -> Option<(String, String)> {
    let (scheme, rest) = raw.split_once("://")?;
    let valid_scheme = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid_scheme {
        return None;
    }
    let (authority, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = host.split_once(':').map_or(host, |(h, _)| h);
    Some((host.to_string(), path.to_string()))
}
