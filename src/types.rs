use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Risk level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// score < 30
    Low,
    /// score 30–49
    Moderate,
    /// score 50–69
    Elevated,
    /// score >= 70
    High,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        use crate::config::risk_thresholds::*;
        if score < MODERATE_MIN {
            RiskLevel::Low
        } else if score < ELEVATED_MIN {
            RiskLevel::Moderate
        } else if score < HIGH_MIN {
            RiskLevel::Elevated
        } else {
            RiskLevel::High
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::Elevated => "elevated",
            RiskLevel::High => "high",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "moderate" => Ok(RiskLevel::Moderate),
            "elevated" => Ok(RiskLevel::Elevated),
            "high" => Ok(RiskLevel::High),
            other => Err(crate::error::AppError::Config(format!("unknown risk level '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Signals produced by the analyzer
// ---------------------------------------------------------------------------

/// Unknown severities from the model are treated as medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl From<String> for Severity {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Severity::High,
            "low" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedFlag {
    /// Machine-readable type such as `AUDITOR_CHANGE`.
    #[serde(rename = "type", default = "unknown_signal")]
    pub signal_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub evidence_url: Option<String>,
    #[serde(default)]
    pub filing_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsiderPattern {
    #[serde(rename = "type", default = "unknown_signal")]
    pub signal_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub evidence_url: Option<String>,
}

fn unknown_signal() -> String {
    "UNKNOWN".to_string()
}

/// Direction and strength of insider trading. Unknown strings map to neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum NetActivity {
    HeavySelling,
    NetSelling,
    #[default]
    Neutral,
    NetBuying,
    HeavyBuying,
}

impl From<String> for NetActivity {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "heavy_selling" => NetActivity::HeavySelling,
            "net_selling" => NetActivity::NetSelling,
            "net_buying" => NetActivity::NetBuying,
            "heavy_buying" => NetActivity::HeavyBuying,
            _ => NetActivity::Neutral,
        }
    }
}

impl std::fmt::Display for NetActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetActivity::HeavySelling => "heavy_selling",
            NetActivity::NetSelling => "net_selling",
            NetActivity::Neutral => "neutral",
            NetActivity::NetBuying => "net_buying",
            NetActivity::HeavyBuying => "heavy_buying",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InsiderSummary {
    pub net_activity: NetActivity,
    pub total_sold: i64,
    pub total_bought: i64,
    pub insiders_selling: u32,
    pub insiders_buying: u32,
}

impl InsiderSummary {
    pub fn is_empty(&self) -> bool {
        self.total_sold == 0
            && self.total_bought == 0
            && self.insiders_selling == 0
            && self.insiders_buying == 0
    }
}

/// Full analyzer output, consumed read-only by the scoring engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisResult {
    pub red_flags: Vec<RedFlag>,
    pub insider_patterns: Vec<InsiderPattern>,
    pub insider_summary: InsiderSummary,
    pub risk_score: u8,
    pub risk_level: Option<RiskLevel>,
    pub reasoning: String,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoringResult {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub base_score: i32,
    pub total_adjustments: i32,
    pub adjustment_reasons: Vec<String>,
    pub category_score: Option<u8>,
}

// ---------------------------------------------------------------------------
// Raw filings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filing8K {
    pub date: NaiveDate,
    pub form_type: String,
    pub title: String,
    pub url: String,
    pub content_snippet: Option<String>,
    /// Labels like `4.01 - Changes in Registrant's Certifying Accountant`.
    pub items: Vec<String>,
}

impl Filing8K {
    pub fn has_critical_item(&self) -> bool {
        self.items.iter().any(|i| i.contains("4.01") || i.contains("4.02"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsiderTransaction {
    pub date: NaiveDate,
    pub insider_name: String,
    pub insider_title: String,
    pub transaction_code: String,
    pub shares: f64,
    pub price: f64,
    pub total_value: i64,
    pub url: String,
    pub is_director: bool,
    pub is_officer: bool,
}

impl InsiderTransaction {
    pub fn is_sale(&self) -> bool {
        self.transaction_code == "S"
    }

    pub fn is_purchase(&self) -> bool {
        self.transaction_code == "P"
    }

    pub fn code_description(&self) -> &'static str {
        match self.transaction_code.as_str() {
            "P" => "Open market purchase",
            "S" => "Open market sale",
            "A" => "Grant/Award",
            "D" => "Disposition to issuer",
            "F" => "Tax withholding",
            "M" => "Option exercise",
            "G" => "Gift",
            "C" => "Conversion",
            "J" => "Other acquisition/disposition",
            _ => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingData {
    pub ticker: String,
    pub cik: String,
    pub filings_8k: Vec<Filing8K>,
    pub filings_form4: Vec<InsiderTransaction>,
    pub collected_at: DateTime<Utc>,
    pub lookback_days: u32,
}

impl FilingData {
    pub fn total_filings(&self) -> usize {
        self.filings_8k.len() + self.filings_form4.len()
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingCounts {
    #[serde(rename = "8k_count")]
    pub eight_k_count: usize,
    pub form4_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringDetails {
    pub base_score: i32,
    pub category_score: Option<u8>,
    pub adjustments: i32,
    pub adjustment_reasons: Vec<String>,
    pub scoring_method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub ticker: String,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub red_flags: Vec<RedFlag>,
    pub red_flags_count: usize,
    pub insider_patterns: Vec<InsiderPattern>,
    pub insider_summary: InsiderSummary,
    pub explanation: Option<String>,
    pub reasoning: String,
    pub evidence_links: Vec<String>,
    pub filings_analyzed: FilingCounts,
    pub scoring_details: ScoringDetails,
    pub analyzed_at: DateTime<Utc>,
    pub lookback_days: u32,
}

impl RiskReport {
    pub fn exceeds_threshold(&self, threshold: u8) -> bool {
        self.risk_score >= threshold
    }

    /// Title of the first red flag, or of the first insider pattern.
    pub fn top_signal(&self) -> Option<&str> {
        self.red_flags
            .first()
            .map(|f| f.title.as_str())
            .or_else(|| self.insider_patterns.first().map(|p| p.title.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub ticker: String,
    pub report: Option<RiskReport>,
    pub error: Option<String>,
    pub success: bool,
}

impl ScanResult {
    pub fn ok(report: RiskReport) -> Self {
        Self { ticker: report.ticker.clone(), report: Some(report), error: None, success: true }
    }

    pub fn failed(ticker: impl Into<String>, error: impl Into<String>) -> Self {
        Self { ticker: ticker.into(), report: None, error: Some(error.into()), success: false }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub high_risk_count: usize,
    pub elevated_count: usize,
    pub high_risk_tickers: Vec<String>,
    pub elevated_tickers: Vec<String>,
    pub failed_tickers: Vec<String>,
}

impl ScanSummary {
    pub fn from_results(results: &[ScanResult]) -> Self {
        let mut summary = ScanSummary { total: results.len(), ..Default::default() };
        for r in results {
            match &r.report {
                Some(report) if r.success => {
                    summary.successful += 1;
                    match report.risk_level {
                        RiskLevel::High => summary.high_risk_tickers.push(r.ticker.clone()),
                        RiskLevel::Elevated => summary.elevated_tickers.push(r.ticker.clone()),
                        _ => {}
                    }
                }
                _ => {
                    summary.failed += 1;
                    summary.failed_tickers.push(r.ticker.clone());
                }
            }
        }
        summary.high_risk_count = summary.high_risk_tickers.len();
        summary.elevated_count = summary.elevated_tickers.len();
        summary
    }
}
