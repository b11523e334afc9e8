use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::config::SCAN_STATE_KEY;
use crate::db::KeyValueStore;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Per-ticker state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerScanState {
    pub last_scan_time: DateTime<Utc>,
    #[serde(default)]
    pub last_8k_date: Option<NaiveDate>,
    #[serde(default)]
    pub last_form4_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "bounded_score")]
    pub last_risk_score: u8,
}

impl TickerScanState {
    /// Strictly older than the lookback window. Exactly `lookback_days` is fresh.
    pub fn is_stale(&self, lookback_days: u32, now: DateTime<Utc>) -> bool {
        now - self.last_scan_time > chrono::Duration::days(i64::from(lookback_days))
    }
}

fn bounded_score<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u8, D::Error> {
    let raw = f64::deserialize(d)?;
    Ok(raw.round().clamp(0.0, 100.0) as u8)
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanReason {
    NeverScanned,
    Stale,
    /// Not stale by time; a filing probe decides.
    CheckFilings,
    New8kFiling,
    NewForm4Filing,
    /// A probe failed; scan anyway.
    FilingCheckError,
    Unchanged,
    ForceRescan,
}

impl std::fmt::Display for ScanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanReason::NeverScanned => "never_scanned",
            ScanReason::Stale => "stale",
            ScanReason::CheckFilings => "check_filings",
            ScanReason::New8kFiling => "new_8k_filing",
            ScanReason::NewForm4Filing => "new_form4_filing",
            ScanReason::FilingCheckError => "filing_check_error",
            ScanReason::Unchanged => "unchanged",
            ScanReason::ForceRescan => "force_rescan",
        };
        write!(f, "{s}")
    }
}

/// Outcome counters for one incremental batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub total: usize,
    pub scanned: usize,
    pub skipped: usize,
    /// Skip reason tally.
    pub reasons: BTreeMap<ScanReason, usize>,
}

impl ScanStats {
    pub fn record_scan(&mut self) {
        self.scanned += 1;
    }

    pub fn record_skip(&mut self, reason: ScanReason) {
        self.skipped += 1;
        *self.reasons.entry(reason).or_insert(0) += 1;
    }
}

impl std::fmt::Display for ScanStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "total={} scanned={} skipped={}", self.total, self.scanned, self.skipped)?;
        if !self.reasons.is_empty() {
            let parts: Vec<String> =
                self.reasons.iter().map(|(r, n)| format!("{r}={n}")).collect();
            write!(f, " ({})", parts.join(", "))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

/// Ticker → last scan metadata, persisted as one JSON document.
/// Owned by a single writer; not shared across tasks.
pub struct ScanStateStore {
    kv: Arc<dyn KeyValueStore>,
    states: HashMap<String, TickerScanState>,
}

impl ScanStateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv, states: HashMap::new() }
    }

    /// Replaces in-memory state with the persisted map. Bad entries are dropped.
    pub async fn load(&mut self) -> Result<()> {
        self.states = self.read_persisted().await?;
        debug!("Loaded scan state for {} tickers", self.states.len());
        Ok(())
    }

    /// Adds persisted entries for tickers not yet held in memory.
    /// In-memory entries are newer and win. Returns how many were added.
    pub async fn merge_persisted(&mut self) -> Result<usize> {
        let persisted = self.read_persisted().await?;
        let mut added = 0;
        for (ticker, state) in persisted {
            if let Entry::Vacant(slot) = self.states.entry(ticker) {
                slot.insert(state);
                added += 1;
            }
        }
        debug!("Merged {added} persisted scan state entries");
        Ok(added)
    }

    async fn read_persisted(&self) -> Result<HashMap<String, TickerScanState>> {
        let mut states = HashMap::new();
        let Some(raw) = self.kv.get_value(SCAN_STATE_KEY).await? else {
            debug!("No persisted scan state");
            return Ok(states);
        };
        let serde_json::Value::Object(entries) = raw else {
            warn!("Persisted scan state is not an object, starting empty");
            return Ok(states);
        };

        for (ticker, value) in entries {
            match serde_json::from_value::<TickerScanState>(value) {
                Ok(state) => {
                    states.insert(normalize_ticker(&ticker), state);
                }
                Err(e) => warn!(ticker = %ticker, "Dropping malformed scan state entry: {e}"),
            }
        }
        Ok(states)
    }

    pub async fn save(&self) -> Result<()> {
        let value = serde_json::to_value(self.snapshot())?;
        self.kv.set_value(SCAN_STATE_KEY, &value).await
    }

    pub fn get_state(&self, ticker: &str) -> Option<&TickerScanState> {
        self.states.get(&normalize_ticker(ticker))
    }

    pub fn update_state(
        &mut self,
        ticker: &str,
        risk_score: u8,
        last_8k_date: Option<NaiveDate>,
        last_form4_date: Option<NaiveDate>,
    ) {
        self.update_state_at(ticker, risk_score, last_8k_date, last_form4_date, Utc::now());
    }

    /// Omitted dates keep their previous value.
    pub fn update_state_at(
        &mut self,
        ticker: &str,
        risk_score: u8,
        last_8k_date: Option<NaiveDate>,
        last_form4_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) {
        let key = normalize_ticker(ticker);
        let previous = self.states.get(&key);
        let state = TickerScanState {
            last_scan_time: now,
            last_8k_date: last_8k_date.or_else(|| previous.and_then(|p| p.last_8k_date)),
            last_form4_date: last_form4_date.or_else(|| previous.and_then(|p| p.last_form4_date)),
            last_risk_score: risk_score.min(100),
        };
        self.states.insert(key, state);
    }

    pub fn needs_rescan(&self, ticker: &str, lookback_days: u32) -> (bool, ScanReason) {
        self.needs_rescan_at(ticker, lookback_days, Utc::now())
    }

    pub fn needs_rescan_at(
        &self,
        ticker: &str,
        lookback_days: u32,
        now: DateTime<Utc>,
    ) -> (bool, ScanReason) {
        match self.get_state(ticker) {
            None => (true, ScanReason::NeverScanned),
            Some(state) if state.is_stale(lookback_days, now) => (true, ScanReason::Stale),
            Some(_) => (false, ScanReason::CheckFilings),
        }
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Sorted copy, for persistence and the API.
    pub fn snapshot(&self) -> BTreeMap<String, TickerScanState> {
        self.states.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::kv::MemoryKvStore;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn store() -> (Arc<MemoryKvStore>, ScanStateStore) {
        let kv = Arc::new(MemoryKvStore::default());
        let store = ScanStateStore::new(kv.clone());
        (kv, store)
    }

    #[test]
    fn never_scanned_then_recorded() {
        let (_, mut s) = store();
        assert_eq!(s.needs_rescan("aapl", 30), (true, ScanReason::NeverScanned));

        s.update_state("AAPL", 75, Some(date("2024-01-10")), None);
        let st = s.get_state(" aapl ").unwrap();
        assert_eq!(st.last_risk_score, 75);
        assert_eq!(st.last_8k_date, Some(date("2024-01-10")));
        assert_eq!(st.last_form4_date, None);
    }

    #[test]
    fn omitted_dates_are_preserved() {
        let (_, mut s) = store();
        s.update_state_at("MSFT", 40, Some(date("2024-01-10")), Some(date("2024-01-05")), at(2024, 1, 11));
        s.update_state_at("MSFT", 55, None, Some(date("2024-02-01")), at(2024, 2, 2));
        s.update_state_at("MSFT", 60, None, None, at(2024, 2, 3));

        let st = s.get_state("MSFT").unwrap();
        assert_eq!(st.last_8k_date, Some(date("2024-01-10")));
        assert_eq!(st.last_form4_date, Some(date("2024-02-01")));
        assert_eq!(st.last_risk_score, 60);
        assert_eq!(st.last_scan_time, at(2024, 2, 3));
    }

    #[test]
    fn staleness_boundary_is_strict() {
        let (_, mut s) = store();
        let scanned = at(2024, 3, 1);
        s.update_state_at("NVDA", 20, None, None, scanned);

        let exactly = scanned + chrono::Duration::days(30);
        assert_eq!(s.needs_rescan_at("NVDA", 30, exactly), (false, ScanReason::CheckFilings));

        let past = exactly + chrono::Duration::seconds(1);
        assert_eq!(s.needs_rescan_at("NVDA", 30, past), (true, ScanReason::Stale));

        let st = s.get_state("NVDA").unwrap();
        assert!(!st.is_stale(30, exactly));
        assert!(st.is_stale(30, past));
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let (kv, mut s) = store();
        s.update_state_at("AAPL", 75, Some(date("2024-01-10")), None, at(2024, 1, 11));
        s.save().await.unwrap();

        let persisted = kv.values.lock().unwrap().get(SCAN_STATE_KEY).cloned().unwrap();
        assert_eq!(persisted["AAPL"]["last_8k_date"], "2024-01-10");
        assert_eq!(persisted["AAPL"]["last_form4_date"], serde_json::Value::Null);

        let mut fresh = ScanStateStore::new(kv.clone());
        fresh.load().await.unwrap();
        assert_eq!(fresh.get_state("AAPL"), s.get_state("AAPL"));
    }

    #[tokio::test]
    async fn load_drops_corrupt_entries_and_keeps_good_ones() {
        let (kv, mut s) = store();
        kv.values.lock().unwrap().insert(
            SCAN_STATE_KEY.to_string(),
            json!({
                "AAPL": {"last_scan_time": "2024-01-11T12:00:00Z", "last_8k_date": "2024-01-10", "last_risk_score": 75},
                "MSFT": {"last_scan_time": "not a time"},
                "TSLA": "garbage",
                "goog": {"last_scan_time": "2024-01-11T12:00:00Z", "last_risk_score": 250}
            }),
        );

        s.load().await.unwrap();
        assert_eq!(s.len(), 2);
        assert!(s.get_state("MSFT").is_none());
        assert_eq!(s.get_state("GOOG").unwrap().last_risk_score, 100);
        assert_eq!(s.get_state("GOOG").unwrap().last_8k_date, None);
    }

    #[tokio::test]
    async fn merge_keeps_newer_in_memory_entries() {
        let (kv, mut s) = store();
        kv.values.lock().unwrap().insert(
            SCAN_STATE_KEY.to_string(),
            json!({
                "KEEP1": {"last_scan_time": "2024-01-01T00:00:00Z", "last_risk_score": 10},
                "NEW": {"last_scan_time": "2024-01-01T00:00:00Z", "last_risk_score": 10}
            }),
        );
        s.update_state_at("NEW", 80, None, None, at(2024, 2, 1));

        assert_eq!(s.merge_persisted().await.unwrap(), 1);
        assert_eq!(s.len(), 2);
        assert_eq!(s.get_state("NEW").unwrap().last_risk_score, 80);
        assert_eq!(s.get_state("KEEP1").unwrap().last_risk_score, 10);

        kv.fail_reads.store(true, Ordering::Relaxed);
        assert!(s.merge_persisted().await.is_err());
        assert_eq!(s.len(), 2);
    }

    #[tokio::test]
    async fn clear_then_save_empties_persisted_state() {
        let (kv, mut s) = store();
        s.update_state("AAPL", 10, None, None);
        s.save().await.unwrap();
        assert!(!s.is_empty());

        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.needs_rescan("AAPL", 30), (true, ScanReason::NeverScanned));
        s.save().await.unwrap();
        let persisted = kv.values.lock().unwrap().get(SCAN_STATE_KEY).cloned().unwrap();
        assert_eq!(persisted, json!({}));
    }

    #[tokio::test]
    async fn save_failure_is_returned() {
        let (kv, mut s) = store();
        s.update_state("AAPL", 10, None, None);
        kv.fail_writes.store(true, Ordering::Relaxed);
        assert!(s.save().await.is_err());
    }

    #[test]
    fn stats_display_lists_reasons() {
        let mut stats = ScanStats { total: 3, ..Default::default() };
        stats.record_scan();
        stats.record_skip(ScanReason::Unchanged);
        stats.record_skip(ScanReason::Unchanged);
        assert_eq!(stats.to_string(), "total=3 scanned=1 skipped=2 (unchanged=2)");

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["reasons"]["unchanged"], 2);
    }
}
