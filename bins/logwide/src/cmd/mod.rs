pub mod check;
pub mod ingest;
