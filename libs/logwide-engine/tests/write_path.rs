use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use logwide_api::{
    ColumnFamily, ColumnList, ColumnValue, EventRecord, EventSchema, Key, MutationBatch,
    StorageClient, StorageError,
};
use chrono::{DateTime, SecondsFormat};
use logwide_engine::{EngineError, EventOutput, IndexDestination, OutputConfig, RowWriter};
use proptest::prelude::*;
use storage_memory::MemoryStore;

fn families() -> (ColumnFamily, ColumnFamily) {
    (ColumnFamily::primary("logstash"), ColumnFamily::index("by_host"))
}

fn setup() -> (Arc<MemoryStore>, RowWriter) {
    let (events, by_host) = families();
    let store = Arc::new(MemoryStore::with_families([events.clone(), by_host]));
    let writer = RowWriter::new(store.clone(), events);
    (store, writer)
}

fn sample_schema() -> EventSchema {
    EventSchema::parse([
        ("ts:timestamp", "@timestamp"),
        ("response:int", "response"),
        ("msg:string", "msg"),
    ])
    .unwrap()
}

fn sample_record() -> EventRecord {
    EventRecord::from_json(
        r#"{
            "@timestamp": "2013-01-02T03:04:05.678Z",
            "@source": "file://web1/var/log/apache.log",
            "@type": "apache",
            "@fields": {"response": ["403"], "msg": ["failed"], "host": "web1"}
        }"#,
    )
    .unwrap()
}

#[test]
fn write_then_read_returns_typed_columns() {
    let (_store, writer) = setup();
    let schema = sample_schema();

    let id = writer.write(&sample_record(), Some(&schema), &[]).unwrap();
    let row = writer.read(&id.to_string(), Some(&schema)).unwrap().unwrap();

    assert_eq!(row.id, id);
    assert_eq!(row.get("response"), Some(&ColumnValue::Int(403)));
    assert_eq!(row.get("msg"), Some(&ColumnValue::Text("failed".into())));
    match row.get("ts") {
        Some(ColumnValue::Timestamp(ts)) => assert_eq!(ts.timestamp_millis(), 1_357_095_845_678),
        other => panic!("unexpected ts {other:?}"),
    }
}

#[test]
fn index_rows_point_back_to_the_primary_row() {
    let (store, writer) = setup();
    let (_, by_host) = families();
    let dests = [IndexDestination::new(by_host.clone(), "%{host}")];

    let first = writer.write(&sample_record(), Some(&sample_schema()), &dests).unwrap();
    // Two seconds later, outside the first record's jitter window.
    let mut later = sample_record();
    later.set_timestamp("2013-01-02T03:04:07.678Z");
    let second = writer.write(&later, Some(&sample_schema()), &dests).unwrap();

    assert_eq!(store.row_count("logstash"), 2);
    assert_eq!(store.row_count("by_host"), 1);
    assert_eq!(writer.lookup(&by_host, "web1").unwrap(), vec![first, second]);
    assert!(writer.lookup(&by_host, "web2").unwrap().is_empty());
}

#[test]
fn missing_field_writes_nothing() {
    let (store, writer) = setup();
    let (_, by_host) = families();
    let schema = EventSchema::parse([("ts:timestamp", "@timestamp"), ("host", "host")]).unwrap();
    let mut record = sample_record();
    record.fields_mut().remove("host");

    let err = writer
        .write(&record, Some(&schema), &[IndexDestination::new(by_host, "%{@type}")])
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err}");
    assert_eq!(store.row_count("logstash"), 0);
    assert_eq!(store.row_count("by_host"), 0);
}

#[test]
fn absent_schema_is_rejected_before_the_store() {
    let (store, writer) = setup();
    let err = writer.write(&sample_record(), None, &[]).unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
    assert_eq!(store.row_count("logstash"), 0);
}

#[test]
fn batch_failure_is_all_or_nothing() {
    let (store, writer) = setup();
    // Undeclared index family: the store rejects the whole batch.
    let dests = [IndexDestination::new(ColumnFamily::index("by_path"), "%{@source_path}")];
    let err = writer
        .write(&sample_record(), Some(&sample_schema()), &dests)
        .unwrap_err();
    assert!(matches!(err, EngineError::Storage(_)), "{err}");
    assert_eq!(store.row_count("logstash"), 0);
}

#[test]
fn read_of_unknown_or_malformed_key() {
    let (_store, writer) = setup();
    let schema = sample_schema();
    let unknown = uuid::Uuid::new_v4().to_string();
    assert!(writer.read(&unknown, Some(&schema)).unwrap().is_none());
    assert!(matches!(
        writer.read("not-a-key", Some(&schema)),
        Err(EngineError::Validation(_))
    ));
}

/// Store that fails every call with a fixed message.
struct FailingStore {
    calls: AtomicUsize,
}

impl StorageClient for FailingStore {
    fn execute(&self, _batch: MutationBatch) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::with_source(
            "batch rejected",
            std::io::Error::other("connection reset"),
        ))
    }

    fn get_row(&self, _family: &ColumnFamily, _key: &Key) -> Result<Option<ColumnList>, StorageError> {
        Err(StorageError::new("read timed out"))
    }
}

#[test]
fn storage_errors_pass_through_unchanged() {
    let store = Arc::new(FailingStore {
        calls: AtomicUsize::new(0),
    });
    let writer = RowWriter::new(store.clone(), ColumnFamily::primary("logstash"));
    let schema = sample_schema();

    match writer.write(&sample_record(), Some(&schema), &[]) {
        Err(EngineError::Storage(e)) => {
            assert_eq!(e.message(), "batch rejected");
            assert!(std::error::Error::source(&e).is_some());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);

    // Validation failures never reach the store.
    let mut record = sample_record();
    record.fields_mut().remove("msg");
    assert!(writer.write(&record, Some(&schema), &[]).is_err());
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);

    let id = uuid::Uuid::new_v4().to_string();
    assert!(matches!(
        writer.read(&id, Some(&schema)),
        Err(EngineError::Storage(ref e)) if e.message() == "read timed out"
    ));
}

#[test]
fn concurrent_writes_produce_distinct_rows() {
    let (store, writer) = setup();
    let writer = Arc::new(writer);
    let schema = Arc::new(sample_schema());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let writer = Arc::clone(&writer);
            let schema = Arc::clone(&schema);
            thread::spawn(move || {
                let record = sample_record();
                (0..100)
                    .map(|_| writer.write(&record, Some(schema.as_ref()), &[]).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut ids: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 400);
    assert_eq!(store.row_count("logstash"), 400);
}

proptest! {
    #[test]
    fn written_values_read_back_typed(
        response in any::<i32>(),
        msg in "[a-zA-Z0-9 ]{0,24}",
        millis in 0i64..4_102_444_800_000,
    ) {
        let (_store, writer) = setup();
        let schema = sample_schema();
        let stamp = DateTime::from_timestamp_millis(millis)
            .unwrap()
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut record = EventRecord::new();
        record.set_timestamp(stamp);
        record.fields_mut().insert("response", vec![response.to_string()]);
        record.fields_mut().insert("msg", msg.as_str());

        let id = writer.write(&record, Some(&schema), &[]).unwrap();
        let row = writer.read_id(id, Some(&schema)).unwrap().unwrap();
        prop_assert_eq!(row.get("response"), Some(&ColumnValue::Int(response)));
        prop_assert_eq!(row.get("msg"), Some(&ColumnValue::Text(msg.clone())));
        match row.get("ts") {
            Some(ColumnValue::Timestamp(ts)) => prop_assert_eq!(ts.timestamp_millis(), millis),
            other => prop_assert!(false, "unexpected ts {:?}", other),
        }
    }
}

// ---------------------------------------------------------------------------
// EventOutput
// ---------------------------------------------------------------------------

const OUTPUT_TOML: &str = r#"
table = "events"
event_schema = [["ts:timestamp", "@timestamp"], ["message", "@message"], ["host", "@source_host"]]
type = "apache"
exclude_tags = ["debug"]

[index_tables]
by_host = "%{@source_host}"
by_day = "%{+YYYY.MM.dd}"
"#;

fn output() -> (Arc<MemoryStore>, EventOutput) {
    let store = Arc::new(MemoryStore::new());
    let config = OutputConfig::parse(OUTPUT_TOML).unwrap();
    let output = EventOutput::new(config, store.clone()).unwrap();
    (store, output)
}

fn apache_record(message: &str) -> EventRecord {
    let mut record = EventRecord::from_json(r#"{"@timestamp":"2013-01-02T03:04:05Z"}"#).unwrap();
    record.set_type("apache");
    record.set_source("file://web1/var/log/apache.log");
    record.set_message(message);
    record
}

#[test]
fn output_declares_families_and_writes_index_rows() {
    let (store, output) = output();
    assert_eq!(store.family_names(), vec!["by_day", "by_host", "events"]);

    let id = output.receive(&apache_record("GET /")).unwrap().unwrap();
    assert_eq!(output.lookup("by_host", "web1").unwrap(), vec![id]);
    assert_eq!(output.lookup("by_day", "2013.01.02").unwrap(), vec![id]);

    let row = output.fetch(&id.to_string()).unwrap().unwrap();
    assert_eq!(row.get("message"), Some(&ColumnValue::Text("GET /".into())));
    assert_eq!(row.get("host"), Some(&ColumnValue::Text("web1".into())));

    assert!(matches!(
        output.lookup("by_status", "200"),
        Err(EngineError::Configuration(_))
    ));
}

#[test]
fn output_skips_filtered_and_cancelled_records() {
    let (store, output) = output();

    let mut other_type = apache_record("x");
    other_type.set_type("syslog");
    assert_eq!(output.receive(&other_type).unwrap(), None);

    let mut excluded = apache_record("x");
    excluded.add_tag("debug");
    assert_eq!(output.receive(&excluded).unwrap(), None);

    let mut cancelled = apache_record("x");
    cancelled.cancel();
    assert_eq!(output.receive(&cancelled).unwrap(), None);

    assert_eq!(store.row_count("events"), 0);
}

#[test]
fn output_rejects_invalid_configuration() {
    let config = OutputConfig::parse(r#"event_schema = [["message", "@message"]]"#).unwrap();
    let err = EventOutput::new(config, Arc::new(MemoryStore::new())).unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
}

#[test]
fn output_config_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logwide.toml");
    std::fs::write(&path, OUTPUT_TOML).unwrap();
    let config = OutputConfig::load(&path).unwrap();
    assert_eq!(config.table, "events");
    assert_eq!(config.index_tables.len(), 2);
}
