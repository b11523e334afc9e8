pub mod scan_state;

pub use scan_state::{normalize_ticker, ScanReason, ScanStateStore, ScanStats};
