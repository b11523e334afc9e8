//! Shared health state for the /health endpoint.
//! Updated by the scan scheduler, read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
pub struct HealthState {
    /// True while a batch is running.
    pub scan_in_progress: AtomicBool,
    /// Millisecond timestamp of the last completed batch (0 = none).
    pub last_batch_at_ms: AtomicU64,
    pub batches_run: AtomicU64,
    /// Tickers in the last completed batch.
    pub last_batch_size: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_started(&self) {
        self.scan_in_progress.store(true, Ordering::Relaxed);
    }

    pub fn batch_finished(&self, at_ms: u64, tickers: u64) {
        self.last_batch_at_ms.store(at_ms, Ordering::Relaxed);
        self.last_batch_size.store(tickers, Ordering::Relaxed);
        self.batches_run.fetch_add(1, Ordering::Relaxed);
        self.scan_in_progress.store(false, Ordering::Relaxed);
    }

    pub fn scan_in_progress(&self) -> bool {
        self.scan_in_progress.load(Ordering::Relaxed)
    }

    pub fn last_batch_at_ms(&self) -> u64 {
        self.last_batch_at_ms.load(Ordering::Relaxed)
    }

    pub fn batches_run(&self) -> u64 {
        self.batches_run.load(Ordering::Relaxed)
    }

    pub fn last_batch_size(&self) -> u64 {
        self.last_batch_size.load(Ordering::Relaxed)
    }
}
