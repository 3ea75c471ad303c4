use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use logwide_api::{ColumnFamily, ColumnType, EventSchema};

use crate::error::EngineError;
use crate::writer::IndexDestination;

/// Output configuration, parsed from TOML.
///
/// ```toml
/// table = "logstash"
/// event_schema = [["ts:timestamp", "@timestamp"], ["response:int", "response"]]
///
/// [nodes]
/// localhost = 9160
///
/// [index_tables]
/// by_host = "%{@source_host}"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Cluster name, reported at setup.
    #[serde(default = "default_name")]
    pub cluster: String,

    /// Store nodes: host -> port.
    #[serde(default = "default_nodes")]
    pub nodes: BTreeMap<String, u16>,

    #[serde(default = "default_name")]
    pub keyspace: String,

    /// Primary column family receiving full records.
    #[serde(default = "default_name")]
    pub table: String,

    /// Ordered `[target_spec, source_field]` pairs.
    #[serde(default = "default_event_schema")]
    pub event_schema: Vec<(String, String)>,

    /// Index column family -> row-key template.
    #[serde(default)]
    pub index_tables: BTreeMap<String, String>,

    /// Only records of this type are written.
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,

    /// Only records carrying every one of these tags are written.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Records carrying any of these tags are skipped.
    #[serde(default)]
    pub exclude_tags: Vec<String>,
}

fn default_name() -> String {
    "logstash".to_string()
}

fn default_nodes() -> BTreeMap<String, u16> {
    BTreeMap::from([("localhost".to_string(), 9160)])
}

fn default_event_schema() -> Vec<(String, String)> {
    vec![
        ("ts:timestamp".to_string(), "@timestamp".to_string()),
        ("message".to_string(), "@message".to_string()),
    ]
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            cluster: default_name(),
            nodes: default_nodes(),
            keyspace: default_name(),
            table: default_name(),
            event_schema: default_event_schema(),
            index_tables: BTreeMap::new(),
            type_name: None,
            tags: Vec::new(),
            exclude_tags: Vec::new(),
        }
    }
}

impl OutputConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Configuration(format!("{}: {e}", path.display())))?;
        Self::parse(&content).map_err(|e| e.with_context(path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str).map_err(|e| EngineError::Configuration(e.to_string()))
    }

    /// Parse the event schema and check everything the write path relies on.
    pub fn validate(&self) -> Result<EventSchema, EngineError> {
        for (what, name) in [("cluster", &self.cluster), ("keyspace", &self.keyspace), ("table", &self.table)] {
            if name.trim().is_empty() {
                return Err(EngineError::Configuration(format!("{what} must not be empty")));
            }
        }
        if self.nodes.is_empty() {
            return Err(EngineError::Configuration("at least one node is required".into()));
        }
        if let Some((host, _)) = self.nodes.iter().find(|(_, port)| **port == 0) {
            return Err(EngineError::Configuration(format!("node '{host}' has port 0")));
        }

        let schema = EventSchema::parse(self.event_schema.iter().map(|(t, s)| (t, s.clone())))
            .map_err(|e| EngineError::Configuration(format!("event_schema: {}", e.message)))?;
        let ts = schema.timestamp_column().ok_or_else(|| {
            EngineError::Configuration("event_schema has no column sourced from @timestamp".into())
        })?;
        if matches!(ts.column_type, ColumnType::Int | ColumnType::Uuid) {
            return Err(EngineError::Configuration(format!(
                "timestamp column '{}' cannot be of type {}",
                ts.name, ts.column_type
            )));
        }

        for (table, template) in &self.index_tables {
            if table.trim().is_empty() {
                return Err(EngineError::Configuration("index table name must not be empty".into()));
            }
            if *table == self.table {
                return Err(EngineError::Configuration(format!(
                    "index table '{table}' is also the primary table"
                )));
            }
            if template.is_empty() {
                return Err(EngineError::Configuration(format!(
                    "index table '{table}' has an empty row-key template"
                )));
            }
        }
        Ok(schema)
    }

    pub fn primary_family(&self) -> ColumnFamily {
        ColumnFamily::primary(&self.table)
    }

    pub fn index_destinations(&self) -> Vec<IndexDestination> {
        self.index_tables
            .iter()
            .map(|(table, template)| IndexDestination::new(ColumnFamily::index(table), template))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_takes_defaults() {
        let config = OutputConfig::parse("").unwrap();
        assert_eq!(config.cluster, "logstash");
        assert_eq!(config.keyspace, "logstash");
        assert_eq!(config.table, "logstash");
        assert_eq!(config.nodes.get("localhost"), Some(&9160));
        let schema = config.validate().unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.timestamp_column().map(|c| c.name.as_str()), Some("ts"));
        assert!(config.index_destinations().is_empty());
    }

    #[test]
    fn parses_full_config() {
        let config = OutputConfig::parse(
            r#"
            cluster = "prod"
            table = "events"
            event_schema = [["ts:timestamp", "@timestamp"], ["response:int", "response"]]
            type = "apache"
            tags = ["web"]
            exclude_tags = ["debug"]

            [nodes]
            "10.0.0.1" = 9160
            "10.0.0.2" = 9161

            [index_tables]
            by_host = "%{@source_host}"
            by_day = "%{+YYYY.MM.dd}"
            "#,
        )
        .unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.type_name.as_deref(), Some("apache"));
        let schema = config.validate().unwrap();
        assert_eq!(schema.column_type("response"), Some(ColumnType::Int));

        let names: Vec<String> = config
            .index_destinations()
            .iter()
            .map(|d| d.family.name.clone())
            .collect();
        assert_eq!(names, vec!["by_day", "by_host"]);
    }

    #[test]
    fn rejects_bad_setups() {
        let cases = [
            r#"event_schema = [["message", "@message"]]"#,
            r#"event_schema = [["ts:int", "@timestamp"]]"#,
            r#"event_schema = [["ts:timestamp:x", "@timestamp"]]"#,
            r#"table = """#,
            "[index_tables]\nlogstash = \"%{host}\"",
            "[index_tables]\nby_host = \"\"",
            "[nodes]\nlocalhost = 0",
        ];
        for case in cases {
            let config = OutputConfig::parse(case).unwrap();
            let err = config.validate().unwrap_err();
            assert!(matches!(err, EngineError::Configuration(_)), "{case}: {err}");
        }
    }

    #[test]
    fn rejects_unknown_keys_and_bad_ports() {
        assert!(OutputConfig::parse("colour = 1").is_err());
        assert!(OutputConfig::parse("[nodes]\nlocalhost = 70000").is_err());
    }

    #[test]
    fn load_adds_path_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.toml");
        std::fs::write(&path, "table = [").unwrap();
        let err = OutputConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("output.toml"), "{err}");

        let missing = OutputConfig::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, EngineError::Configuration(_)));
    }
}
