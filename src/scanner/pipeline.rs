use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::analyzer::Analyzer;
use crate::api::latency::ScanLatency;
use crate::error::AppError;
use crate::fetcher::FilingSource;
use crate::report::build_report;
use crate::scorer::RuleScorer;
use crate::state::normalize_ticker;
use crate::types::{ScanResult, ScanSummary};

/// Full scan of one ticker: collect → analyze → score → report.
pub struct RiskScanner {
    source: Arc<dyn FilingSource>,
    analyzer: Arc<dyn Analyzer>,
    scorer: Arc<RuleScorer>,
    latency: Arc<ScanLatency>,
}

impl RiskScanner {
    pub fn new(
        source: Arc<dyn FilingSource>,
        analyzer: Arc<dyn Analyzer>,
        scorer: Arc<RuleScorer>,
        latency: Arc<ScanLatency>,
    ) -> Self {
        Self { source, analyzer, scorer, latency }
    }

    pub fn source(&self) -> &Arc<dyn FilingSource> {
        &self.source
    }

    /// Never fails: errors are captured in the returned result.
    pub async fn scan_ticker(&self, ticker: &str, lookback_days: u32, include_explanation: bool) -> ScanResult {
        let ticker = normalize_ticker(ticker);
        info!(ticker = %ticker, lookback_days, "Scanning");
        let started = Instant::now();

        let data = match self.source.collect(&ticker, lookback_days).await {
            Ok(data) => data,
            Err(e) => {
                error!(ticker = %ticker, "Collection error: {e}");
                return ScanResult::failed(ticker, failure_message(Stage::Collect, &e));
            }
        };
        info!(ticker = %ticker, filings = data.total_filings(), "Collected filings");

        debug!(ticker = %ticker, provider = %self.analyzer.provider_name(), "Analyzing");
        let analysis = match self.analyzer.analyze(&data, include_explanation).await {
            Ok(analysis) => analysis,
            Err(e) => {
                error!(ticker = %ticker, "Analysis error: {e}");
                return ScanResult::failed(ticker, failure_message(Stage::Analyze, &e));
            }
        };

        let scoring = self.scorer.score(&analysis, Some(&data));
        let report = build_report(&ticker, &data, &analysis, &scoring, self.scorer.scoring_method());
        self.latency.record(started.elapsed());

        info!(
            ticker = %ticker,
            score = report.risk_score,
            level = %report.risk_level,
            "Scan complete"
        );
        ScanResult::ok(report)
    }

    /// Sequential, in input order.
    pub async fn scan_multiple(
        &self,
        tickers: &[String],
        lookback_days: u32,
        include_explanation: bool,
    ) -> Vec<ScanResult> {
        let mut results = Vec::with_capacity(tickers.len());
        for (i, ticker) in tickers.iter().enumerate() {
            info!("[{}/{}] Processing {ticker}", i + 1, tickers.len());
            results.push(self.scan_ticker(ticker, lookback_days, include_explanation).await);
        }
        results
    }

    pub fn summary(&self, results: &[ScanResult]) -> ScanSummary {
        ScanSummary::from_results(results)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Collect,
    Analyze,
}

/// Collector and analyzer errors are labelled by stage; anything that does
/// not belong to the stage it surfaced from keeps its plain message.
fn failure_message(stage: Stage, e: &AppError) -> String {
    match stage {
        Stage::Collect if e.is_collection() => format!("Collection failed: {e}"),
        Stage::Analyze if e.is_analyzer() => format!("Analysis failed: {e}"),
        _ => {
            warn!(?stage, "Unexpected error: {e}");
            e.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::scanner::testing::{FakeAnalyzer, FakeSource};
    use crate::types::RiskLevel;

    fn scanner(source: FakeSource, analyzer: FakeAnalyzer) -> (RiskScanner, Arc<ScanLatency>) {
        let cfg = ScoringConfig { use_category_scoring: false, ..ScoringConfig::default() };
        let latency = Arc::new(ScanLatency::new());
        let s = RiskScanner::new(
            Arc::new(source),
            Arc::new(analyzer),
            Arc::new(RuleScorer::new(cfg).unwrap()),
            Arc::clone(&latency),
        );
        (s, latency)
    }

    #[tokio::test]
    async fn successful_scan_builds_report() {
        let (s, latency) = scanner(FakeSource::new(), FakeAnalyzer::auditor_change(50));
        let result = s.scan_ticker(" acme ", 30, false).await;
        assert!(result.success);
        assert_eq!(result.ticker, "ACME");
        let report = result.report.unwrap();
        assert_eq!(report.risk_score, 65);
        assert_eq!(report.risk_level, RiskLevel::Elevated);
        assert_eq!(report.scoring_details.adjustment_reasons, vec!["+15 for auditor change"]);
        assert_eq!(report.scoring_details.scoring_method, "Rule-based adjustments");
        assert_eq!(latency.len(), 1);
    }

    #[tokio::test]
    async fn failures_are_labelled_by_stage() {
        let source = FakeSource::new().fail_collect("BAD");
        let analyzer = FakeAnalyzer::quiet(10).fail_for("OOPS");
        let (s, latency) = scanner(source, analyzer);

        let tickers = vec!["BAD".to_string(), "OOPS".to_string(), "OK".to_string()];
        let results = s.scan_multiple(&tickers, 30, true).await;

        assert!(results[0].error.as_deref().unwrap().starts_with("Collection failed: "));
        assert!(results[1].error.as_deref().unwrap().starts_with("Analysis failed: "));
        assert!(results[2].success);
        assert_eq!(latency.len(), 1);

        let summary = s.summary(&results);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failed_tickers, vec!["BAD", "OOPS"]);
    }

    #[test]
    fn unexpected_errors_keep_plain_message() {
        let e = AppError::Persistence("disk full".into());
        assert_eq!(failure_message(Stage::Collect, &e), "Persistence error: disk full");
        let e = AppError::Fetch { url: "feed".into(), status: Some(503) };
        assert_eq!(failure_message(Stage::Collect, &e), "Collection failed: Failed to fetch feed (HTTP 503)");
    }
}
