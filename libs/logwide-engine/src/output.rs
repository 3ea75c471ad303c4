use std::sync::Arc;

use uuid::Uuid;

use logwide_api::{EventRecord, EventSchema, StorageClient};

use crate::config::OutputConfig;
use crate::error::EngineError;
use crate::writer::{IndexDestination, RowWriter, TypedRow};

/// Config-driven receive path: filter, then write the record and its index
/// rows through a [`RowWriter`].
#[derive(Debug)]
pub struct EventOutput {
    config: OutputConfig,
    schema: EventSchema,
    destinations: Vec<IndexDestination>,
    writer: RowWriter,
}

impl EventOutput {
    /// Validate `config` and declare every column family on `client`.
    pub fn new(config: OutputConfig, client: Arc<dyn StorageClient>) -> Result<Self, EngineError> {
        let schema = config.validate()?;
        let primary = config.primary_family();
        let destinations = config.index_destinations();

        let nodes: Vec<String> = config
            .nodes
            .iter()
            .map(|(host, port)| format!("{host}:{port}"))
            .collect();
        tracing::info!(
            cluster = %config.cluster,
            keyspace = %config.keyspace,
            nodes = %nodes.join(","),
            "registering output"
        );

        client
            .ensure_family(&primary)
            .map_err(|e| EngineError::from(e).with_context(&primary.name))?;
        for dest in &destinations {
            client.ensure_family(&dest.family)?;
            tracing::info!(table = %dest.family.name, template = %dest.template, "index table");
        }
        tracing::info!(table = %primary.name, columns = schema.len(), "primary table");

        Ok(Self {
            writer: RowWriter::new(client, primary),
            config,
            schema,
            destinations,
        })
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn schema(&self) -> &EventSchema {
        &self.schema
    }

    pub fn destinations(&self) -> &[IndexDestination] {
        &self.destinations
    }

    pub fn writer(&self) -> &RowWriter {
        &self.writer
    }

    /// Write `record` unless it is cancelled or filtered out.
    ///
    /// `Ok(None)` means the record was skipped.
    pub fn receive(&self, record: &EventRecord) -> Result<Option<Uuid>, EngineError> {
        if record.is_cancelled() {
            tracing::debug!("skipping cancelled record");
            return Ok(None);
        }
        if !self.accepts(record) {
            tracing::debug!(record_type = ?record.type_name(), "record filtered out");
            return Ok(None);
        }
        self.writer
            .write(record, Some(&self.schema), &self.destinations)
            .map(Some)
    }

    /// Whether the type and tag filters let `record` through.
    pub fn accepts(&self, record: &EventRecord) -> bool {
        if let Some(wanted) = self.config.type_name.as_deref().filter(|t| !t.is_empty()) {
            if record.type_name() != Some(wanted) {
                return false;
            }
        }
        self.config.tags.iter().all(|t| record.has_tag(t))
            && !self.config.exclude_tags.iter().any(|t| record.has_tag(t))
    }

    /// Read a primary row back by id.
    pub fn fetch(&self, key: &str) -> Result<Option<TypedRow>, EngineError> {
        self.writer.read(key, Some(&self.schema))
    }

    /// Primary ids listed under `key` in the index table `index`.
    pub fn lookup(&self, index: &str, key: &str) -> Result<Vec<Uuid>, EngineError> {
        let dest = self
            .destinations
            .iter()
            .find(|d| d.family.name == index)
            .ok_or_else(|| EngineError::Configuration(format!("unknown index table '{index}'")))?;
        self.writer.lookup(&dest.family, key)
    }
}
