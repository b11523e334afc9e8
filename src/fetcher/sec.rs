use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{SecConfig, RETRY_BACKOFF_MS};
use crate::error::{AppError, Result};
use crate::fetcher::edgar::{self, FeedEntry, FormType};
use crate::fetcher::FilingSource;
use crate::state::normalize_ticker;
use crate::types::{Filing8K, FilingData, InsiderTransaction};

const COLLECT_FEED_COUNT: u32 = 40;
const PROBE_FEED_COUNT: u32 = 10;

/// EDGAR client. All requests share one rate limiter, so concurrent callers
/// are serialised to the configured spacing.
pub struct SecCollector {
    client: reqwest::Client,
    cfg: SecConfig,
    /// Ticker → 10-digit CIK, filled from company_tickers.json on first use.
    cik_cache: DashMap<String, String>,
    last_request: Mutex<Option<Instant>>,
    backoff_ms: Vec<u64>,
}

impl SecCollector {
    pub fn new(cfg: SecConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            cfg,
            cik_cache: DashMap::new(),
            last_request: Mutex::new(None),
            backoff_ms: RETRY_BACKOFF_MS.to_vec(),
        })
    }

    #[cfg(test)]
    /// Replaces the retry backoff table. One retry per entry.
    pub fn with_backoff(mut self, backoff_ms: Vec<u64>) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        let delay = Duration::from_millis(self.cfg.request_delay_ms);
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let mut attempt = 0usize;
        loop {
            self.rate_limit().await;
            let err = match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.text().await?);
                    }
                    if status.as_u16() == 429 {
                        let retry_after = resp
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok());
                        AppError::RateLimited { source_name: "SEC EDGAR".to_string(), retry_after }
                    } else {
                        let err = AppError::Fetch { url: url.to_string(), status: Some(status.as_u16()) };
                        if !status.is_server_error() {
                            return Err(err);
                        }
                        err
                    }
                }
                Err(e) => AppError::Http(e),
            };

            let Some(&backoff) = self.backoff_ms.get(attempt) else {
                return Err(err);
            };
            warn!("EDGAR request failed ({err}), retry {} in {backoff}ms", attempt + 1);
            tokio::time::sleep(Duration::from_millis(backoff)).await;
            attempt += 1;
        }
    }

    async fn resolve_cik(&self, ticker: &str) -> Result<String> {
        if let Some(cik) = self.cik_cache.get(ticker) {
            return Ok(cik.clone());
        }
        if self.cik_cache.is_empty() {
            let body = self.get_text(&self.cfg.tickers_url).await?;
            let json: serde_json::Value = serde_json::from_str(&body)?;
            for (t, cik) in edgar::parse_company_tickers(&json) {
                self.cik_cache.insert(t, cik);
            }
            info!("Loaded {} ticker → CIK mappings", self.cik_cache.len());
        }
        self.cik_cache
            .get(ticker)
            .map(|c| c.clone())
            .ok_or_else(|| AppError::TickerNotFound(ticker.to_string()))
    }

    async fn fetch_feed(&self, cik: &str, form: FormType, count: u32) -> Result<Vec<FeedEntry>> {
        let url = edgar::feed_url(&self.cfg.base_url, cik, form, count);
        let body = self.get_text(&url).await?;
        Ok(edgar::parse_feed(&body))
    }

    async fn has_new_filings(&self, ticker: &str, since: NaiveDate, form: FormType) -> Result<bool> {
        let ticker = normalize_ticker(ticker);
        let cik = self.resolve_cik(&ticker).await?;
        let entries = self.fetch_feed(&cik, form, PROBE_FEED_COUNT).await?;
        let found = entries.iter().any(|e| e.date.is_some_and(|d| d > since));
        debug!(ticker = %ticker, form = %form, since = %since, found, "Filing probe");
        Ok(found)
    }

    async fn latest_date(&self, cik: &str, form: FormType) -> Result<Option<NaiveDate>> {
        let entries = self.fetch_feed(cik, form, 1).await?;
        Ok(entries.first().and_then(|e| e.date))
    }

    async fn collect_8k(&self, cik: &str, cutoff: NaiveDate) -> Result<Vec<Filing8K>> {
        let entries = self.fetch_feed(cik, FormType::EightK, COLLECT_FEED_COUNT).await?;
        let mut filings = Vec::new();
        for entry in entries {
            let Some(date) = entry.date.filter(|d| *d >= cutoff) else { continue };
            let url = entry.url.unwrap_or_default();
            let (content_snippet, items) = if url.is_empty() {
                (None, Vec::new())
            } else {
                match self.fetch_8k_content(&url).await {
                    Ok(content) => content,
                    Err(e) => {
                        warn!("Failed to fetch 8-K content from {url}: {e}");
                        (None, Vec::new())
                    }
                }
            };
            filings.push(Filing8K {
                date,
                form_type: "8-K".to_string(),
                title: entry.title.unwrap_or_else(|| "8-K Filing".to_string()),
                url,
                content_snippet,
                items,
            });
        }
        Ok(filings)
    }

    async fn fetch_8k_content(&self, filing_url: &str) -> Result<(Option<String>, Vec<String>)> {
        let index = self.get_text(filing_url).await?;
        let Some(doc_url) = edgar::find_main_document(&index, filing_url) else {
            return Ok((None, Vec::new()));
        };
        let doc = self.get_text(&doc_url).await?;
        let text = edgar::extract_text(&doc);
        Ok((Some(edgar::snippet(&text)), edgar::extract_8k_items(&text)))
    }

    async fn collect_form4(&self, cik: &str, cutoff: NaiveDate) -> Result<Vec<InsiderTransaction>> {
        let entries = self.fetch_feed(cik, FormType::Form4, COLLECT_FEED_COUNT).await?;
        let mut transactions = Vec::new();
        for entry in entries {
            let Some(date) = entry.date.filter(|d| *d >= cutoff) else { continue };
            let Some(url) = entry.url else { continue };
            match self.fetch_form4_transactions(&url, date).await {
                Ok(txns) => transactions.extend(txns),
                Err(e) => warn!("Failed to parse Form 4 details from {url}: {e}"),
            }
        }
        Ok(transactions)
    }

    async fn fetch_form4_transactions(
        &self,
        filing_url: &str,
        date: NaiveDate,
    ) -> Result<Vec<InsiderTransaction>> {
        let index = self.get_text(filing_url).await?;
        let Some(xml_url) = edgar::find_form4_xml(&index, filing_url) else {
            return Ok(Vec::new());
        };
        let xml = self.get_text(&xml_url).await?;
        Ok(edgar::parse_form4_xml(&xml, date, filing_url))
    }
}

#[async_trait]
impl FilingSource for SecCollector {
    async fn collect(&self, ticker: &str, lookback_days: u32) -> Result<FilingData> {
        let ticker = normalize_ticker(ticker);
        let collected_at = Utc::now();
        let cik = self.resolve_cik(&ticker).await?;
        let cutoff = collected_at.date_naive() - chrono::Duration::days(i64::from(lookback_days));

        let (filings_8k, filings_form4) =
            tokio::join!(self.collect_8k(&cik, cutoff), self.collect_form4(&cik, cutoff));
        let filings_8k = filings_8k?;
        let filings_form4 = filings_form4?;

        info!(
            ticker = %ticker,
            cik = %cik,
            filings_8k = filings_8k.len(),
            form4_transactions = filings_form4.len(),
            "Collected filings"
        );

        Ok(FilingData { ticker, cik, filings_8k, filings_form4, collected_at, lookback_days })
    }

    async fn has_new_filings_8k(&self, ticker: &str, since: NaiveDate) -> Result<bool> {
        self.has_new_filings(ticker, since, FormType::EightK).await
    }

    async fn has_new_filings_form4(&self, ticker: &str, since: NaiveDate) -> Result<bool> {
        self.has_new_filings(ticker, since, FormType::Form4).await
    }

    async fn latest_filing_dates(
        &self,
        ticker: &str,
    ) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let ticker = normalize_ticker(ticker);
        let cik = self.resolve_cik(&ticker).await?;
        let (latest_8k, latest_form4) = tokio::join!(
            self.latest_date(&cik, FormType::EightK),
            self.latest_date(&cik, FormType::Form4)
        );
        let latest_8k = latest_8k.unwrap_or_else(|e| {
            warn!(ticker = %ticker, "Latest 8-K date lookup failed: {e}");
            None
        });
        let latest_form4 = latest_form4.unwrap_or_else(|e| {
            warn!(ticker = %ticker, "Latest Form 4 date lookup failed: {e}");
            None
        });
        Ok((latest_8k, latest_form4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn collector(server: &MockServer) -> SecCollector {
        let cfg = SecConfig {
            base_url: server.uri(),
            tickers_url: format!("{}/files/company_tickers.json", server.uri()),
            request_delay_ms: 0,
            ..SecConfig::default()
        };
        SecCollector::new(cfg).unwrap().with_backoff(vec![1, 1])
    }

    fn feed(entries: &[(&str, &str)]) -> String {
        let body: String = entries
            .iter()
            .map(|(date, href)| {
                format!(
                    r#"<entry><content type="text/xml"><filing-date>{date}</filing-date></content>
                       <link rel="alternate" type="text/html" href="{href}"/>
                       <title>filing</title><updated>{date}T12:00:00-04:00</updated></entry>"#
                )
            })
            .collect();
        format!(r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom">{body}</feed>"#)
    }

    async fn mount_tickers(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/files/company_tickers.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "0": {"cik_str": 320193, "ticker": "AAPL", "title": "Apple Inc."}
            })))
            .mount(server)
            .await;
    }

    async fn mount_feed(server: &MockServer, form: &str, count: &str, body: String) {
        Mock::given(method("GET"))
            .and(path("/cgi-bin/browse-edgar"))
            .and(query_param("type", form))
            .and(query_param("count", count))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn today_minus(days: i64) -> String {
        (Utc::now().date_naive() - chrono::Duration::days(days)).to_string()
    }

    #[tokio::test]
    async fn collect_reads_8k_items_and_form4_transactions() {
        let server = MockServer::start().await;
        mount_tickers(&server).await;
        let uri = server.uri();

        let (recent, stale, f4_date) = (today_minus(3), today_minus(200), today_minus(2));
        let (recent_url, stale_url, f4_url) = (
            format!("{uri}/a/8k/index.htm"),
            format!("{uri}/a/old/index.htm"),
            format!("{uri}/a/f4/index.htm"),
        );
        mount_feed(
            &server,
            "8-K",
            "40",
            feed(&[(recent.as_str(), recent_url.as_str()), (stale.as_str(), stale_url.as_str())]),
        )
        .await;
        mount_feed(&server, "4", "40", feed(&[(f4_date.as_str(), f4_url.as_str())])).await;

        Mock::given(method("GET"))
            .and(path("/a/8k/index.htm"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><a href="aapl-8k.htm">8-K</a></body></html>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/8k/aapl-8k.htm"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body><p>Item 4.01 Changes in Registrant's Certifying Accountant</p></body></html>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/f4/index.htm"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="/a/f4/form4.xml">form4.xml</a>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/f4/form4.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<ownershipDocument><reportingOwner><rptOwnerName>Jane Doe</rptOwnerName>
                   <isDirector>1</isDirector></reportingOwner>
                   <nonDerivativeTransaction><transactionCode>S</transactionCode>
                   <transactionShares><value>100</value></transactionShares>
                   <transactionPricePerShare><value>10</value></transactionPricePerShare>
                   </nonDerivativeTransaction></ownershipDocument>"#,
            ))
            .mount(&server)
            .await;

        let data = collector(&server).collect("aapl", 30).await.unwrap();
        assert_eq!(data.ticker, "AAPL");
        assert_eq!(data.cik, "0000320193");
        assert_eq!(data.filings_8k.len(), 1);
        assert!(data.filings_8k[0].has_critical_item());
        assert!(data.filings_8k[0].content_snippet.as_deref().unwrap().contains("Item 4.01"));
        assert_eq!(data.filings_form4.len(), 1);
        assert_eq!(data.filings_form4[0].insider_title, "Director");
        assert_eq!(data.filings_form4[0].total_value, 1_000);
    }

    #[tokio::test]
    async fn unknown_ticker_is_an_error() {
        let server = MockServer::start().await;
        mount_tickers(&server).await;
        let err = collector(&server).collect("ZZZZ", 30).await.unwrap_err();
        assert!(matches!(err, AppError::TickerNotFound(ref t) if t == "ZZZZ"));
    }

    #[tokio::test]
    async fn probe_compares_dates_strictly() {
        let server = MockServer::start().await;
        mount_tickers(&server).await;
        mount_feed(&server, "8-K", "10", feed(&[("2024-01-10", "https://x/1")])).await;

        let sec = collector(&server);
        let same_day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        assert!(!sec.has_new_filings_8k("AAPL", same_day).await.unwrap());
        let day_before = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert!(sec.has_new_filings_8k("AAPL", day_before).await.unwrap());
    }

    #[tokio::test]
    async fn probe_failure_propagates_after_retries() {
        let server = MockServer::start().await;
        mount_tickers(&server).await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/browse-edgar"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = collector(&server)
            .has_new_filings_form4("AAPL", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fetch { status: Some(503), .. }));
    }

    #[tokio::test]
    async fn transient_server_error_is_retried() {
        let server = MockServer::start().await;
        mount_tickers(&server).await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/browse-edgar"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_feed(&server, "8-K", "10", feed(&[("2024-03-01", "https://x/1")])).await;

        let found = collector(&server)
            .has_new_filings_8k("AAPL", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .await
            .unwrap();
        assert!(found);
    }

    #[tokio::test]
    async fn latest_dates_tolerate_one_failed_feed() {
        let server = MockServer::start().await;
        mount_tickers(&server).await;
        mount_feed(&server, "8-K", "1", feed(&[("2024-02-01", "https://x/1")])).await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/browse-edgar"))
            .and(query_param("type", "4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (k8, f4) = collector(&server).latest_filing_dates("AAPL").await.unwrap();
        assert_eq!(k8, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(f4, None);
    }
}
