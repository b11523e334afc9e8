use std::time::{Duration, Instant};

use dashmap::DashMap;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{
    ScanMode, NASDAQ100_URL, SP500_URL, UNIVERSE_CACHE_TTL_SECS, UNIVERSE_REQUEST_DELAY_MS,
};
use crate::error::{AppError, Result};
use crate::state::normalize_ticker;

/// Used when an index page cannot be fetched or parsed.
pub const FALLBACK_TOP_100: &[&str] = &[
    "AAPL", "MSFT", "AMZN", "NVDA", "GOOGL", "META", "TSLA", "BRK.B", "UNH", "XOM",
    "JNJ", "JPM", "V", "PG", "MA", "HD", "CVX", "MRK", "ABBV", "LLY",
    "PEP", "KO", "COST", "AVGO", "WMT", "MCD", "CSCO", "TMO", "ACN", "ABT",
    "DHR", "NEE", "ADBE", "CRM", "NFLX", "AMD", "TXN", "NKE", "PM", "WFC",
    "UPS", "RTX", "HON", "BMY", "QCOM", "ORCL", "LOW", "INTC", "AMGN", "UNP",
    "IBM", "CAT", "SPGI", "BA", "GE", "DE", "ELV", "LMT", "INTU", "AMAT",
    "AXP", "SBUX", "MDLZ", "MS", "GS", "GILD", "BLK", "ADI", "ISRG", "CVS",
    "PLD", "SYK", "REGN", "VRTX", "C", "NOW", "CI", "LRCX", "TMUS", "SCHW",
    "ZTS", "MMC", "MO", "CB", "CME", "EOG", "SLB", "PYPL", "DUK", "SO",
    "APD", "NOC", "ITW", "HUM", "MRNA", "SNPS", "CDNS", "CL", "FDX", "ATVI",
];

/// Index membership lists scraped from Wikipedia, cached per index.
pub struct StockUniverse {
    client: reqwest::Client,
    sp500_url: String,
    nasdaq100_url: String,
    cache: DashMap<&'static str, (Vec<String>, Instant)>,
    ttl: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl StockUniverse {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            sp500_url: SP500_URL.to_string(),
            nasdaq100_url: NASDAQ100_URL.to_string(),
            cache: DashMap::new(),
            ttl: Duration::from_secs(UNIVERSE_CACHE_TTL_SECS),
            last_request: Mutex::new(None),
        })
    }

    #[cfg(test)]
    pub fn with_urls(mut self, sp500_url: impl Into<String>, nasdaq100_url: impl Into<String>) -> Self {
        self.sp500_url = sp500_url.into();
        self.nasdaq100_url = nasdaq100_url.into();
        self
    }

    /// Tickers for a scan mode. `custom` returns the given list, normalised.
    pub async fn get_tickers(&self, mode: ScanMode, custom: &[String]) -> Result<Vec<String>> {
        match mode {
            ScanMode::Custom => {
                let tickers: Vec<String> = custom
                    .iter()
                    .map(|t| normalize_ticker(t))
                    .filter(|t| !t.is_empty())
                    .collect();
                if tickers.is_empty() {
                    return Err(AppError::Config(
                        "custom scan mode requires a non-empty TICKERS list".to_string(),
                    ));
                }
                Ok(tickers)
            }
            ScanMode::Sp500 => Ok(self.index_tickers("sp500", "symbol").await),
            ScanMode::Nasdaq100 => Ok(self.index_tickers("nasdaq100", "ticker").await),
        }
    }

    async fn index_tickers(&self, key: &'static str, column: &str) -> Vec<String> {
        if let Some(cached) = self.cached(key) {
            info!("Using cached {key} list ({} tickers)", cached.len());
            return cached;
        }

        let url = if key == "sp500" { &self.sp500_url } else { &self.nasdaq100_url };
        match self.fetch(url).await {
            Ok(html) => {
                let tickers = parse_ticker_table(&html, column);
                if !tickers.is_empty() {
                    info!("Fetched {key} list: {} tickers", tickers.len());
                    self.cache.insert(key, (tickers.clone(), Instant::now()));
                    return tickers;
                }
                warn!("No {column} column found on {url}");
            }
            Err(e) => warn!("Failed to fetch {key} list: {e}"),
        }

        info!("Using fallback list ({} tickers)", FALLBACK_TOP_100.len());
        FALLBACK_TOP_100.iter().map(|t| t.to_string()).collect()
    }

    fn cached(&self, key: &'static str) -> Option<Vec<String>> {
        let expired = match self.cache.get(key) {
            Some(entry) if entry.1.elapsed() < self.ttl => return Some(entry.0.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.cache.remove(key);
        }
        None
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        {
            let mut last = self.last_request.lock().await;
            let delay = Duration::from_millis(UNIVERSE_REQUEST_DELAY_MS);
            if let Some(prev) = *last {
                if prev.elapsed() < delay {
                    tokio::time::sleep(delay - prev.elapsed()).await;
                }
            }
            *last = Some(Instant::now());
        }

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Fetch { url: url.to_string(), status: Some(status.as_u16()) });
        }
        Ok(resp.text().await?)
    }
}

/// Reads the first `wikitable` whose header row has `column` (case-insensitive).
/// Footnote markers are stripped; symbols other than letters and dots are dropped.
pub fn parse_ticker_table(html: &str, column: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let (Ok(table_sel), Ok(th_sel), Ok(tr_sel), Ok(cell_sel)) = (
        Selector::parse("table.wikitable"),
        Selector::parse("th"),
        Selector::parse("tr"),
        Selector::parse("td, th"),
    ) else {
        return Vec::new();
    };

    for table in doc.select(&table_sel) {
        let headers: Vec<String> = table.select(&th_sel).map(|th| cell_text(th).to_lowercase()).collect();
        let Some(idx) = headers.iter().position(|h| h == column) else {
            continue;
        };

        return table
            .select(&tr_sel)
            .skip(1)
            .filter_map(|row| {
                let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();
                let raw = cell_text(*cells.get(idx)?);
                let ticker = raw.split('[').next().unwrap_or("").trim().to_uppercase();
                let valid = !ticker.is_empty()
                    && ticker.chars().any(|c| c.is_ascii_alphabetic())
                    && ticker.chars().all(|c| c.is_ascii_alphabetic() || c == '.');
                valid.then_some(ticker)
            })
            .collect();
    }
    Vec::new()
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SP500_PAGE: &str = r#"<html><body>
        <table class="wikitable"><tr><th>Date</th><th>Added</th></tr><tr><td>2024</td><td>X</td></tr></table>
        <table class="wikitable sortable">
          <tr><th>Symbol</th><th>Security</th></tr>
          <tr><td><a href="/x">MMM</a></td><td>3M</td></tr>
          <tr><td>BRK.B[3]</td><td>Berkshire</td></tr>
          <tr><td>1234</td><td>bad</td></tr>
          <tr><td>aos</td><td>A. O. Smith</td></tr>
        </table></body></html>"#;

    #[test]
    fn parses_symbol_column() {
        assert_eq!(parse_ticker_table(SP500_PAGE, "symbol"), vec!["MMM", "BRK.B", "AOS"]);
        assert!(parse_ticker_table(SP500_PAGE, "ticker").is_empty());
    }

    #[tokio::test]
    async fn custom_mode_requires_tickers() {
        let u = StockUniverse::new("test").unwrap();
        assert!(u.get_tickers(ScanMode::Custom, &[]).await.is_err());
        let got = u.get_tickers(ScanMode::Custom, &[" aapl".to_string()]).await.unwrap();
        assert_eq!(got, vec!["AAPL"]);
    }

    #[tokio::test]
    async fn index_fetch_is_cached_and_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sp500"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SP500_PAGE))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ndx"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let u = StockUniverse::new("test")
            .unwrap()
            .with_urls(format!("{}/sp500", server.uri()), format!("{}/ndx", server.uri()));

        let first = u.get_tickers(ScanMode::Sp500, &[]).await.unwrap();
        let second = u.get_tickers(ScanMode::Sp500, &[]).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);

        let ndx = u.get_tickers(ScanMode::Nasdaq100, &[]).await.unwrap();
        assert_eq!(ndx.len(), FALLBACK_TOP_100.len());
        assert_eq!(ndx[0], "AAPL");
    }
}
