use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::config::{ScanConfig, ScanMode, SUMMARY_KEY};
use crate::db::{KeyValueStore, ReportSink};
use crate::error::Result;
use crate::fetcher::StockUniverse;
use crate::report::markdown::format_summary_table;
use crate::scanner::{IncrementalScanner, RiskScanner, ScanOptions};
use crate::state::{ScanStateStore, ScanStats};
use crate::types::{RiskReport, ScanResult, ScanSummary};
use crate::webhook::WebhookService;

/// Runs one batch per interval: resolve tickers, scan, persist, alert,
/// store the run summary.
pub struct ScanScheduler {
    cfg: ScanConfig,
    universe: Arc<StockUniverse>,
    scanner: Arc<RiskScanner>,
    incremental: IncrementalScanner,
    kv: Arc<dyn KeyValueStore>,
    sink: Arc<dyn ReportSink>,
    webhook: WebhookService,
    health: Arc<HealthState>,
    shutdown: Option<watch::Receiver<bool>>,
    pending_reset: bool,
}

impl ScanScheduler {
    pub fn new(
        cfg: ScanConfig,
        universe: Arc<StockUniverse>,
        scanner: Arc<RiskScanner>,
        kv: Arc<dyn KeyValueStore>,
        sink: Arc<dyn ReportSink>,
        webhook: WebhookService,
        health: Arc<HealthState>,
    ) -> Self {
        let incremental = IncrementalScanner::new(Arc::clone(&scanner), ScanStateStore::new(Arc::clone(&kv)));
        let pending_reset = cfg.reset_state;
        Self {
            cfg,
            universe,
            scanner,
            incremental,
            kv,
            sink,
            webhook,
            health,
            shutdown: None,
            pending_reset,
        }
    }

    /// `true` on the channel stops the loop and any batch in flight between tickers.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub async fn run(mut self) {
        let mut ticker = interval(Duration::from_secs(self.cfg.interval_secs.max(1)));
        let mut shutdown = self.shutdown.clone();

        loop {
            // First tick fires immediately: scan on startup.
            match shutdown.as_mut() {
                Some(rx) => tokio::select! {
                    _ = ticker.tick() => {}
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            info!("Scan scheduler stopping");
                            return;
                        }
                        continue;
                    }
                },
                None => {
                    ticker.tick().await;
                }
            }
            if self.shutdown_requested() {
                info!("Scan scheduler stopping");
                return;
            }
            if let Err(e) = self.run_once().await {
                error!("Scan batch failed: {e}");
            }
        }
    }

    /// One full batch. Errors only when the ticker list cannot be resolved;
    /// per-ticker failures are recorded and reported in the summary.
    pub async fn run_once(&mut self) -> Result<ScanSummary> {
        let tickers = self.resolve_tickers().await?;
        let lookback_days = self.lookback_days();
        let use_incremental = self.cfg.incremental_mode && self.cfg.mode != ScanMode::Custom;

        info!(
            mode = %self.cfg.mode,
            tickers = tickers.len(),
            lookback_days,
            include_explanation = self.cfg.include_explanation,
            incremental = use_incremental,
            "Starting scan batch"
        );
        self.health.batch_started();

        let (results, stats) = if use_incremental {
            if std::mem::take(&mut self.pending_reset) {
                match self.incremental.reset().await {
                    Ok(()) => warn!("Scan state reset, every ticker will be rescanned"),
                    Err(e) => error!("Failed to reset scan state: {e}"),
                }
            }
            let options = ScanOptions {
                include_explanation: self.cfg.include_explanation,
                force_rescan: self.cfg.force_rescan,
                shutdown: self.shutdown.clone(),
                ..ScanOptions::new(lookback_days)
            };
            let batch = self.incremental.scan_incremental(&tickers, &options).await;
            if batch.interrupted {
                warn!("Batch interrupted by shutdown");
            }
            info!("Scan state holds {} tickers", self.incremental.state().len());
            (batch.results, Some(batch.stats))
        } else {
            (self.scan_chunked(&tickers, lookback_days).await, None)
        };

        self.publish(&results).await;

        let summary = self.scanner.summary(&results);
        log_summary(&self.cfg.mode, &summary, stats.as_ref());
        let reports: Vec<RiskReport> = results.iter().filter_map(|r| r.report.clone()).collect();
        info!("Scan results:\n{}", format_summary_table(&reports));

        match summary_document(&summary, &self.cfg, use_incremental, stats.as_ref()) {
            Ok(doc) => {
                if let Err(e) = self.kv.set_value(SUMMARY_KEY, &doc).await {
                    error!("Failed to store run summary: {e}");
                }
            }
            Err(e) => error!("Failed to encode run summary: {e}"),
        }

        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        self.health.batch_finished(now_ms, tickers.len() as u64);
        Ok(summary)
    }

    async fn resolve_tickers(&self) -> Result<Vec<String>> {
        let mut tickers = self.universe.get_tickers(self.cfg.mode, &self.cfg.tickers).await?;
        if self.cfg.mode == ScanMode::Custom && tickers.len() > self.cfg.max_tickers {
            warn!(
                "Too many tickers ({}). Processing first {}.",
                tickers.len(),
                self.cfg.max_tickers
            );
            tickers.truncate(self.cfg.max_tickers);
        }
        Ok(tickers)
    }

    fn lookback_days(&self) -> u32 {
        let effective = self.cfg.effective_lookback_days();
        if effective != self.cfg.lookback_days {
            warn!("Lookback clamped from {} to {effective} days", self.cfg.lookback_days);
        }
        effective
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Custom lists and small universes go in one pass; larger ones in chunks
    /// of the batch size, checking for shutdown between chunks.
    async fn scan_chunked(&self, tickers: &[String], lookback_days: u32) -> Vec<ScanResult> {
        let include_explanation = self.cfg.include_explanation;
        let batch_size = self.cfg.effective_batch_size();
        if batch_size != self.cfg.batch_size {
            warn!("Batch size clamped from {} to {batch_size}", self.cfg.batch_size);
        }

        if self.cfg.mode == ScanMode::Custom || tickers.len() <= batch_size {
            if self.shutdown_requested() {
                return Vec::new();
            }
            return self.scanner.scan_multiple(tickers, lookback_days, include_explanation).await;
        }

        let total_batches = tickers.len().div_ceil(batch_size);
        info!("Processing {} tickers in {total_batches} batches (batch size: {batch_size})", tickers.len());

        let mut results = Vec::with_capacity(tickers.len());
        for (n, chunk) in tickers.chunks(batch_size).enumerate() {
            if self.shutdown_requested() {
                warn!("Shutdown requested, stopping before batch {}/{total_batches}", n + 1);
                break;
            }
            info!("Processing batch {}/{total_batches} ({} tickers)", n + 1, chunk.len());
            results.extend(self.scanner.scan_multiple(chunk, lookback_days, include_explanation).await);
            info!("Progress: {}/{} tickers processed", results.len(), tickers.len());
        }
        results
    }

    /// Stores every outcome and fires alerts. Sink and webhook errors are
    /// logged; they never abort the batch.
    async fn publish(&self, results: &[ScanResult]) {
        for result in results {
            match &result.report {
                Some(report) if result.success => {
                    info!(
                        ticker = %result.ticker,
                        top_signal = report.top_signal().unwrap_or("none"),
                        "Risk Score {}/100 ({})",
                        report.risk_score,
                        report.risk_level
                    );
                    if let Err(e) = self.sink.accept(report).await {
                        error!(ticker = %result.ticker, "Failed to store report: {e}");
                    }
                    if let Err(e) = self.webhook.notify(report).await {
                        warn!(ticker = %result.ticker, "Webhook failed: {e}");
                    }
                }
                _ => {
                    let message = result.error.as_deref().unwrap_or("unknown error");
                    error!(ticker = %result.ticker, "{message}");
                    if let Err(e) = self.sink.record_failure(&result.ticker, message).await {
                        error!(ticker = %result.ticker, "Failed to record failure: {e}");
                    }
                }
            }
        }
    }
}

fn log_summary(mode: &ScanMode, summary: &ScanSummary, stats: Option<&ScanStats>) {
    info!("Scan complete (mode: {mode})");
    match stats {
        Some(s) => info!("Total: {}, scanned: {}, skipped: {}", s.total, s.scanned, s.skipped),
        None => info!("Processed: {} tickers", summary.total),
    }
    info!("Successful: {}, failed: {}", summary.successful, summary.failed);
    if summary.high_risk_count > 0 {
        warn!(
            "{} ticker(s) with HIGH risk: {}",
            summary.high_risk_count,
            summary.high_risk_tickers.join(", ")
        );
    }
    if summary.elevated_count > 0 {
        info!(
            "{} ticker(s) with ELEVATED risk: {}",
            summary.elevated_count,
            summary.elevated_tickers.join(", ")
        );
    }
}

fn summary_document(
    summary: &ScanSummary,
    cfg: &ScanConfig,
    incremental: bool,
    stats: Option<&ScanStats>,
) -> Result<Value> {
    let mut doc = serde_json::to_value(summary)?;
    doc["scan_mode"] = json!(cfg.mode.to_string());
    doc["batch_size"] = match cfg.mode {
        ScanMode::Custom => Value::Null,
        _ => json!(cfg.effective_batch_size()),
    };
    doc["incremental_mode"] = json!(incremental);
    if let Some(s) = stats {
        doc["incremental_stats"] = json!({
            "total": s.total,
            "scanned": s.scanned,
            "skipped": s.skipped,
            "skip_reasons": s.reasons,
        });
    }
    doc["completed_at"] = json!(Utc::now().to_rfc3339());
    Ok(doc)
}
