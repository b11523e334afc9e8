pub mod incremental;
pub mod pipeline;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use incremental::{IncrementalScanner, ScanOptions};
pub use pipeline::RiskScanner;
pub use scheduler::ScanScheduler;
