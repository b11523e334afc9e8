//! Scripted collaborators for scanner tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::analyzer::Analyzer;
use crate::error::{AppError, Result};
use crate::fetcher::FilingSource;
use crate::types::{AnalysisResult, FilingData, RedFlag, RiskLevel, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    New,
    Nothing,
    Error,
}

#[derive(Default)]
pub struct FakeSource {
    collect_fail: Mutex<HashSet<String>>,
    probe_8k: Mutex<HashMap<String, Probe>>,
    probe_form4: Mutex<HashMap<String, Probe>>,
    latest: Mutex<HashMap<String, (Option<NaiveDate>, Option<NaiveDate>)>>,
    latest_fail: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_collect(self, ticker: &str) -> Self {
        self.collect_fail.lock().unwrap().insert(ticker.to_string());
        self
    }

    pub fn with_latest(self, ticker: &str, eight_k: Option<&str>, form4: Option<&str>) -> Self {
        self.set_latest(ticker, eight_k, form4);
        self
    }

    pub fn set_latest(&self, ticker: &str, eight_k: Option<&str>, form4: Option<&str>) {
        let parse = |d: Option<&str>| d.map(|s| s.parse::<NaiveDate>().unwrap());
        self.latest.lock().unwrap().insert(ticker.to_string(), (parse(eight_k), parse(form4)));
    }

    pub fn set_latest_fail(&self, fail: bool) {
        *self.latest_fail.lock().unwrap() = fail;
    }

    pub fn set_probe_8k(&self, ticker: &str, probe: Probe) {
        self.probe_8k.lock().unwrap().insert(ticker.to_string(), probe);
    }

    pub fn set_probe_form4(&self, ticker: &str, probe: Probe) {
        self.probe_form4.lock().unwrap().insert(ticker.to_string(), probe);
    }

    /// Calls whose label starts with `prefix`, e.g. `"collect"` or `"probe_8k:ACME"`.
    pub fn calls(&self, prefix: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn log(&self, call: &str, ticker: &str) {
        self.calls.lock().unwrap().push(format!("{call}:{ticker}"));
    }

    fn probe(map: &Mutex<HashMap<String, Probe>>, ticker: &str) -> Result<bool> {
        match map.lock().unwrap().get(ticker).copied().unwrap_or(Probe::Nothing) {
            Probe::New => Ok(true),
            Probe::Nothing => Ok(false),
            Probe::Error => Err(AppError::Fetch { url: format!("feed/{ticker}"), status: Some(503) }),
        }
    }
}

#[async_trait]
impl FilingSource for FakeSource {
    async fn collect(&self, ticker: &str, lookback_days: u32) -> Result<FilingData> {
        self.log("collect", ticker);
        if self.collect_fail.lock().unwrap().contains(ticker) {
            return Err(AppError::TickerNotFound(ticker.to_string()));
        }
        Ok(FilingData {
            ticker: ticker.to_string(),
            cik: "0000000001".to_string(),
            filings_8k: vec![],
            filings_form4: vec![],
            collected_at: Utc::now(),
            lookback_days,
        })
    }

    async fn has_new_filings_8k(&self, ticker: &str, _since: NaiveDate) -> Result<bool> {
        self.log("probe_8k", ticker);
        Self::probe(&self.probe_8k, ticker)
    }

    async fn has_new_filings_form4(&self, ticker: &str, _since: NaiveDate) -> Result<bool> {
        self.log("probe_form4", ticker);
        Self::probe(&self.probe_form4, ticker)
    }

    async fn latest_filing_dates(&self, ticker: &str) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        self.log("latest", ticker);
        if *self.latest_fail.lock().unwrap() {
            return Err(AppError::Fetch { url: format!("feed/{ticker}/latest"), status: None });
        }
        Ok(self.latest.lock().unwrap().get(ticker).copied().unwrap_or((None, None)))
    }
}

pub struct FakeAnalyzer {
    result: AnalysisResult,
    fail: HashSet<String>,
    pub calls: AtomicUsize,
}

impl FakeAnalyzer {
    pub fn quiet(score: u8) -> Self {
        Self {
            result: AnalysisResult {
                risk_score: score,
                risk_level: Some(RiskLevel::from_score(score)),
                reasoning: "quiet".into(),
                ..Default::default()
            },
            fail: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn auditor_change(score: u8) -> Self {
        let mut a = Self::quiet(score);
        a.result.red_flags.push(RedFlag {
            signal_type: "AUDITOR_CHANGE".into(),
            title: "Auditor dismissed".into(),
            severity: Severity::High,
            details: String::new(),
            evidence_url: None,
            filing_date: None,
        });
        a
    }

    pub fn fail_for(mut self, ticker: &str) -> Self {
        self.fail.insert(ticker.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze(&self, data: &FilingData, _include_explanation: bool) -> Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail.contains(&data.ticker) {
            return Err(AppError::Analyzer("model unavailable".into()));
        }
        Ok(self.result.clone())
    }

    fn provider_name(&self) -> String {
        "fake".to_string()
    }
}
