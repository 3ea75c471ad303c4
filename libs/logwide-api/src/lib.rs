pub mod error;
pub mod record;
pub mod schema;
pub mod storage;
pub mod template;
pub mod timestamp;
pub mod value;

pub use error::{ApiError, ErrorKind};
pub use record::EventRecord;
pub use schema::{ColumnSpec, ColumnType, EventSchema};
pub use storage::{
    Column, ColumnFamily, ColumnList, ColumnName, ColumnValue, Key, KeyKind, MutationBatch,
    RowKey, RowMutation, StorageClient, StorageError,
};
pub use timestamp::{Iso8601Parser, TimestampParser};
pub use value::{Fields, Value};
