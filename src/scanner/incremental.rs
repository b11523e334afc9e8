use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::scanner::RiskScanner;
use crate::state::{normalize_ticker, ScanReason, ScanStateStore, ScanStats};
use crate::types::ScanResult;

/// Per-batch knobs.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub lookback_days: u32,
    pub include_explanation: bool,
    pub force_rescan: bool,
    /// Checked between tickers; `true` stops the batch early.
    pub shutdown: Option<watch::Receiver<bool>>,
}

impl ScanOptions {
    pub fn new(lookback_days: u32) -> Self {
        Self { lookback_days, include_explanation: true, force_rescan: false, shutdown: None }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

#[derive(Debug)]
pub struct IncrementalBatch {
    /// Only the tickers that were actually scanned.
    pub results: Vec<ScanResult>,
    pub stats: ScanStats,
    /// Set when the end-of-batch save failed or was skipped. Results are still valid.
    pub save_error: Option<AppError>,
    pub interrupted: bool,
}

/// Skips tickers whose filings have not changed since the last successful scan.
///
/// Decision ladder per ticker: never scanned or stale → scan; otherwise probe
/// the source for 8-K filings newer than the stored date, then Form 4. A probe
/// error scans anyway. Nothing new → skip as `unchanged`.
///
/// State is loaded once, mutated in memory, and saved once at batch end.
/// The save is skipped while persisted state could not be read.
pub struct IncrementalScanner {
    scanner: Arc<RiskScanner>,
    state: ScanStateStore,
    loaded: bool,
}

impl IncrementalScanner {
    pub fn new(scanner: Arc<RiskScanner>, state: ScanStateStore) -> Self {
        Self { scanner, state, loaded: false }
    }

    pub fn state(&self) -> &ScanStateStore {
        &self.state
    }

    pub async fn should_scan(&self, ticker: &str, lookback_days: u32) -> (bool, ScanReason) {
        match self.state.needs_rescan(ticker, lookback_days) {
            (true, reason) => (true, reason),
            (false, _) => self.check_filings(ticker).await,
        }
    }

    #[cfg(test)]
    pub async fn should_scan_at(
        &self,
        ticker: &str,
        lookback_days: u32,
        now: chrono::DateTime<chrono::Utc>,
    ) -> (bool, ScanReason) {
        match self.state.needs_rescan_at(ticker, lookback_days, now) {
            (true, reason) => (true, reason),
            (false, _) => self.check_filings(ticker).await,
        }
    }

    async fn check_filings(&self, ticker: &str) -> (bool, ScanReason) {
        let Some(state) = self.state.get_state(ticker) else {
            return (true, ScanReason::NeverScanned);
        };
        let (last_8k, last_form4) = (state.last_8k_date, state.last_form4_date);
        let ticker = normalize_ticker(ticker);
        let source = self.scanner.source();

        if let Some(since) = last_8k {
            match source.has_new_filings_8k(&ticker, since).await {
                Ok(true) => return (true, ScanReason::New8kFiling),
                Ok(false) => {}
                Err(e) => {
                    warn!(ticker = %ticker, "Failed to check 8-K filings: {e}");
                    return (true, ScanReason::FilingCheckError);
                }
            }
        }

        if let Some(since) = last_form4 {
            match source.has_new_filings_form4(&ticker, since).await {
                Ok(true) => return (true, ScanReason::NewForm4Filing),
                Ok(false) => {}
                Err(e) => {
                    warn!(ticker = %ticker, "Failed to check Form 4 filings: {e}");
                    return (true, ScanReason::FilingCheckError);
                }
            }
        }

        (false, ScanReason::Unchanged)
    }

    /// Drops all scan state, in memory and persisted.
    pub async fn reset(&mut self) -> Result<()> {
        self.state.clear();
        self.loaded = true;
        self.state.save().await
    }

    /// Loads persisted state once. After an earlier failure, entries gathered
    /// in memory since then are kept and persisted ones are merged under them.
    async fn ensure_loaded(&mut self) -> bool {
        if self.loaded {
            return true;
        }
        let outcome = if self.state.is_empty() {
            self.state.load().await
        } else {
            self.state.merge_persisted().await.map(|_| ())
        };
        match outcome {
            Ok(()) => {
                self.loaded = true;
                info!("Loaded scan state for {} tickers", self.state.len());
                true
            }
            Err(e) => {
                error!("Failed to load scan state, continuing with in-memory state: {e}");
                false
            }
        }
    }

    pub async fn scan_incremental(&mut self, tickers: &[String], options: &ScanOptions) -> IncrementalBatch {
        self.ensure_loaded().await;

        let mut results = Vec::new();
        let mut stats = ScanStats { total: tickers.len(), ..Default::default() };
        let mut interrupted = false;

        for (i, raw) in tickers.iter().enumerate() {
            if options.shutdown_requested() {
                warn!("Shutdown requested, stopping after {i} of {} tickers", tickers.len());
                interrupted = true;
                break;
            }

            let ticker = normalize_ticker(raw);
            let progress = format!("[{}/{}]", i + 1, tickers.len());
            let (scan, reason) = if options.force_rescan {
                (true, ScanReason::ForceRescan)
            } else {
                self.should_scan(&ticker, options.lookback_days).await
            };

            if !scan {
                info!("{progress} Skipping {ticker} (reason: {reason})");
                stats.record_skip(reason);
                continue;
            }

            info!("{progress} Scanning {ticker} (reason: {reason})");
            let result = self
                .scanner
                .scan_ticker(&ticker, options.lookback_days, options.include_explanation)
                .await;
            stats.record_scan();

            if let Some(report) = result.report.as_ref().filter(|_| result.success) {
                let (last_8k, last_form4) = match self.scanner.source().latest_filing_dates(&ticker).await {
                    Ok(dates) => dates,
                    Err(e) => {
                        warn!(ticker = %ticker, "Failed to get latest filing dates: {e}");
                        (None, None)
                    }
                };
                self.state.update_state(&ticker, report.risk_score, last_8k, last_form4);
                debug!(ticker = %ticker, ?last_8k, ?last_form4, "Scan state updated");
            }
            results.push(result);
        }

        let save_error = if self.ensure_loaded().await {
            match self.state.save().await {
                Ok(()) => None,
                Err(e) => {
                    error!("Failed to save scan state: {e}");
                    Some(e)
                }
            }
        } else {
            warn!("Scan state never loaded, skipping save to keep persisted entries");
            Some(AppError::Persistence("scan state not loaded, save skipped".into()))
        };

        info!("Incremental scan complete: {stats}");
        IncrementalBatch { results, stats, save_error, interrupted }
    }
}
