use crate::error::{AppError, Result};

pub const SEC_BASE_URL: &str = "https://www.sec.gov";
pub const SEC_TICKERS_URL: &str = "https://www.sec.gov/files/company_tickers.json";
pub const SEC_USER_AGENT: &str = "SEC-Filing-Risk-Scanner/1.0 (contact@example.com)";
pub const LLM_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const LLM_MODEL: &str = "llama-3.3-70b-versatile";
pub const SP500_URL: &str = "https://en.wikipedia.org/wiki/List_of_S%26P_500_companies";
pub const NASDAQ100_URL: &str = "https://en.wikipedia.org/wiki/Nasdaq-100";
pub const UNIVERSE_USER_AGENT: &str = "StockRadar/1.0 (stock-risk-scanner@example.com)";

/// Minimum spacing between EDGAR requests. SEC allows ~10 req/s.
pub const SEC_REQUEST_DELAY_MS: u64 = 150;

/// Minimum spacing between Wikipedia requests.
pub const UNIVERSE_REQUEST_DELAY_MS: u64 = 500;

/// Retry backoff for EDGAR and LLM requests, in milliseconds. One retry per entry.
pub const RETRY_BACKOFF_MS: &[u64] = &[2_000, 4_000, 8_000];

/// LLM response cache TTL (seconds).
pub const LLM_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Ticker universe cache TTL (seconds).
pub const UNIVERSE_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Characters of 8-K body text kept as the analysis snippet.
pub const FILING_SNIPPET_CHARS: usize = 2_000;

/// Key under which the scan state map is persisted.
pub const SCAN_STATE_KEY: &str = "ticker_states";

/// Key under which the last run summary is persisted.
pub const SUMMARY_KEY: &str = "summary";

/// Valid ranges for operator-supplied scan parameters.
pub const MIN_LOOKBACK_DAYS: u32 = 7;
pub const MAX_LOOKBACK_DAYS: u32 = 90;
pub const MIN_BATCH_SIZE: usize = 10;
pub const MAX_BATCH_SIZE: usize = 100;

/// Risk level cutoffs (inclusive lower bounds). The only place these live.
pub mod risk_thresholds {
    pub const MODERATE_MIN: u8 = 30;
    pub const ELEVATED_MIN: u8 = 50;
    pub const HIGH_MIN: u8 = 70;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Custom,
    Sp500,
    Nasdaq100,
}

impl std::str::FromStr for ScanMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "custom" => Ok(ScanMode::Custom),
            "sp500" => Ok(ScanMode::Sp500),
            "nasdaq100" => Ok(ScanMode::Nasdaq100),
            other => Err(AppError::Config(format!(
                "invalid SCAN_MODE '{other}', expected custom, sp500 or nasdaq100"
            ))),
        }
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanMode::Custom => "custom",
            ScanMode::Sp500 => "sp500",
            ScanMode::Nasdaq100 => "nasdaq100",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookFormat {
    Generic,
    Discord,
    Slack,
}

impl std::str::FromStr for WebhookFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "generic" => Ok(WebhookFormat::Generic),
            "discord" => Ok(WebhookFormat::Discord),
            "slack" => Ok(WebhookFormat::Slack),
            other => Err(AppError::Config(format!("invalid WEBHOOK_FORMAT '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecConfig {
    pub base_url: String,
    pub tickers_url: String,
    pub user_agent: String,
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for SecConfig {
    fn default() -> Self {
        Self {
            base_url: SEC_BASE_URL.to_string(),
            tickers_url: SEC_TICKERS_URL.to_string(),
            user_agent: SEC_USER_AGENT.to_string(),
            request_delay_ms: SEC_REQUEST_DELAY_MS,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: LLM_BASE_URL.to_string(),
            model: LLM_MODEL.to_string(),
            api_key: None,
            temperature: 0.1,
            max_tokens: 1_000,
            timeout_secs: 30,
        }
    }
}

/// Scoring knobs. The numbers are defaults, not derived constants.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub use_category_scoring: bool,
    /// Share of the base score taken from the category model, in percent.
    /// The rest comes from the analyzer's own score.
    pub category_blend_pct: u32,
    pub auditor_change_penalty: i32,
    pub financial_restatement_penalty: i32,
    pub multiple_flags_penalty: i32,
    pub multiple_flags_threshold: usize,
    pub high_severity_pattern_penalty: i32,
    pub high_severity_pattern_threshold: usize,
    pub insider_combo_penalty: i32,
    pub item_401_penalty: i32,
    pub item_402_penalty: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            use_category_scoring: true,
            category_blend_pct: 60,
            auditor_change_penalty: 15,
            financial_restatement_penalty: 20,
            multiple_flags_penalty: 10,
            multiple_flags_threshold: 3,
            high_severity_pattern_penalty: 10,
            high_severity_pattern_threshold: 2,
            insider_combo_penalty: 5,
            item_401_penalty: 15,
            item_402_penalty: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub format: WebhookFormat,
    pub alert_threshold: u8,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            format: WebhookFormat::Generic,
            alert_threshold: 70,
            timeout_secs: 10,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub mode: ScanMode,
    pub tickers: Vec<String>,
    pub max_tickers: usize,
    pub lookback_days: u32,
    pub batch_size: usize,
    pub incremental_mode: bool,
    pub force_rescan: bool,
    /// Drop all scan state before the first incremental batch.
    pub reset_state: bool,
    pub include_explanation: bool,
    pub run_once: bool,
    pub interval_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::Custom,
            tickers: Vec::new(),
            max_tickers: 20,
            lookback_days: 30,
            batch_size: 50,
            incremental_mode: true,
            force_rescan: false,
            reset_state: false,
            include_explanation: true,
            run_once: false,
            interval_secs: 86_400,
        }
    }
}

impl ScanConfig {
    /// Lookback clamped to the supported window.
    pub fn effective_lookback_days(&self) -> u32 {
        self.lookback_days.clamp(MIN_LOOKBACK_DAYS, MAX_LOOKBACK_DAYS)
    }

    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub sec: SecConfig,
    pub llm: LlmConfig,
    pub scoring: ScoringConfig,
    pub webhook: WebhookConfig,
    pub scan: ScanConfig,
    pub universe_user_agent: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let scoring_defaults = ScoringConfig::default();
        let scan_defaults = ScanConfig::default();

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "scanner.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            sec: SecConfig {
                base_url: std::env::var("SEC_BASE_URL").unwrap_or_else(|_| SEC_BASE_URL.to_string()),
                tickers_url: std::env::var("SEC_TICKERS_URL")
                    .unwrap_or_else(|_| SEC_TICKERS_URL.to_string()),
                user_agent: std::env::var("SEC_USER_AGENT")
                    .unwrap_or_else(|_| SEC_USER_AGENT.to_string()),
                request_delay_ms: std::env::var("SEC_REQUEST_DELAY_MS")
                    .unwrap_or_else(|_| SEC_REQUEST_DELAY_MS.to_string())
                    .parse::<u64>()
                    .unwrap_or(SEC_REQUEST_DELAY_MS),
                timeout_secs: 30,
            },
            llm: LlmConfig {
                base_url: std::env::var("LLM_BASE_URL").unwrap_or_else(|_| LLM_BASE_URL.to_string()),
                model: std::env::var("LLM_MODEL").unwrap_or_else(|_| LLM_MODEL.to_string()),
                api_key: std::env::var("GROQ_API_KEY").ok().filter(|k| !k.trim().is_empty()),
                ..LlmConfig::default()
            },
            scoring: ScoringConfig {
                use_category_scoring: env_bool("CATEGORY_SCORING", true),
                category_blend_pct: std::env::var("CATEGORY_BLEND_PCT")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse::<u32>()
                    .map_err(|_| {
                        AppError::Config("CATEGORY_BLEND_PCT must be an integer 0-100".to_string())
                    })?,
                ..scoring_defaults
            },
            webhook: WebhookConfig {
                url: std::env::var("WEBHOOK_URL").ok().filter(|u| !u.trim().is_empty()),
                format: std::env::var("WEBHOOK_FORMAT")
                    .unwrap_or_else(|_| "generic".to_string())
                    .parse()?,
                alert_threshold: std::env::var("ALERT_THRESHOLD")
                    .unwrap_or_else(|_| "70".to_string())
                    .parse::<u8>()
                    .unwrap_or(70)
                    .min(100),
                ..WebhookConfig::default()
            },
            scan: ScanConfig {
                mode: std::env::var("SCAN_MODE")
                    .unwrap_or_else(|_| "custom".to_string())
                    .parse()?,
                tickers: parse_ticker_list(&std::env::var("TICKERS").unwrap_or_default()),
                max_tickers: std::env::var("MAX_TICKERS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse::<usize>()
                    .unwrap_or(scan_defaults.max_tickers),
                lookback_days: std::env::var("LOOKBACK_DAYS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse::<u32>()
                    .unwrap_or(scan_defaults.lookback_days),
                batch_size: std::env::var("BATCH_SIZE")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse::<usize>()
                    .unwrap_or(scan_defaults.batch_size),
                incremental_mode: env_bool("INCREMENTAL_MODE", true),
                force_rescan: env_bool("FORCE_RESCAN", false),
                reset_state: env_bool("RESET_SCAN_STATE", false),
                include_explanation: env_bool("INCLUDE_EXPLANATION", true),
                run_once: env_bool("RUN_ONCE", false),
                interval_secs: std::env::var("SCAN_INTERVAL_SECS")
                    .unwrap_or_else(|_| "86400".to_string())
                    .parse::<u64>()
                    .unwrap_or(scan_defaults.interval_secs),
            },
            universe_user_agent: UNIVERSE_USER_AGENT.to_string(),
        })
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| parse_bool(&v).unwrap_or(default))
        .unwrap_or(default)
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Comma-separated tickers, trimmed, uppercased, empties dropped.
pub fn parse_ticker_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_list_is_normalised() {
        assert_eq!(parse_ticker_list(" aapl, msft ,,brk.b "), vec!["AAPL", "MSFT", "BRK.B"]);
        assert!(parse_ticker_list("").is_empty());
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn scan_parameters_are_clamped() {
        let cfg = ScanConfig { lookback_days: 365, batch_size: 3, ..ScanConfig::default() };
        assert_eq!(cfg.effective_lookback_days(), MAX_LOOKBACK_DAYS);
        assert_eq!(cfg.effective_batch_size(), MIN_BATCH_SIZE);

        let cfg = ScanConfig { lookback_days: 1, batch_size: 500, ..ScanConfig::default() };
        assert_eq!(cfg.effective_lookback_days(), MIN_LOOKBACK_DAYS);
        assert_eq!(cfg.effective_batch_size(), MAX_BATCH_SIZE);
    }

    #[test]
    fn scan_mode_parses() {
        assert_eq!("SP500".parse::<ScanMode>().unwrap(), ScanMode::Sp500);
        assert_eq!("nasdaq100".parse::<ScanMode>().unwrap(), ScanMode::Nasdaq100);
        assert!("dow".parse::<ScanMode>().is_err());
    }
}
