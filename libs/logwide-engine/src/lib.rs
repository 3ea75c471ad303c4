pub mod config;
pub mod error;
pub mod id;
pub mod output;
pub mod writer;

pub use config::OutputConfig;
pub use error::EngineError;
pub use id::UniqueIdGenerator;
pub use output::EventOutput;
pub use writer::{IndexDestination, IndexEntry, RowWriteRequest, RowWriter, TypedRow};
