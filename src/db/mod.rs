pub mod kv;
pub mod models;
pub mod writer;

pub use kv::{KeyValueStore, SqliteKvStore};
pub use writer::{ReportSink, SqliteReportSink};
