use std::time::Duration;

use tracing::{info, warn};

use crate::config::WebhookConfig;
use crate::error::{AppError, Result};
use crate::report::webhook::payload;
use crate::types::RiskReport;

/// Posts alert payloads. 5xx responses and timeouts are retried with
/// exponential backoff; anything else below 400 counts as delivered.
pub struct WebhookService {
    client: reqwest::Client,
    cfg: WebhookConfig,
    retry_base: Duration,
}

impl WebhookService {
    pub fn new(cfg: WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self { client, cfg, retry_base: Duration::from_secs(1) })
    }

    #[cfg(test)]
    /// Base delay; attempt `n` waits `base * 2^n`.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.cfg.url.is_some()
    }

    pub fn should_alert(&self, report: &RiskReport) -> bool {
        report.exceeds_threshold(self.cfg.alert_threshold)
    }

    /// Sends an alert when a URL is configured and the report crosses the
    /// threshold. Returns whether an alert went out.
    pub async fn notify(&self, report: &RiskReport) -> Result<bool> {
        let Some(url) = self.cfg.url.as_deref() else {
            return Ok(false);
        };
        if !self.should_alert(report) {
            return Ok(false);
        }
        self.send_alert(url, report).await?;
        info!(ticker = %report.ticker, score = report.risk_score, "Webhook alert sent");
        Ok(true)
    }

    pub async fn send_alert(&self, url: &str, report: &RiskReport) -> Result<()> {
        let body = payload(report, self.cfg.format);
        let mut attempt = 0u32;
        loop {
            let retryable = attempt < self.cfg.max_retries;
            match self.client.post(url).json(&body).send().await {
                Ok(resp) if resp.status().as_u16() < 400 => return Ok(()),
                Ok(resp) if resp.status().is_server_error() && retryable => {
                    warn!(status = %resp.status(), attempt, "Webhook server error, retrying");
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text: String = resp.text().await.unwrap_or_default().chars().take(200).collect();
                    return Err(AppError::Webhook {
                        url: url.to_string(),
                        reason: format!("HTTP {}: {text}", status.as_u16()),
                    });
                }
                Err(e) if e.is_timeout() && retryable => {
                    warn!(attempt, "Webhook timed out, retrying");
                }
                Err(e) if e.is_timeout() => {
                    return Err(AppError::Webhook { url: url.to_string(), reason: "Timeout".to_string() });
                }
                Err(e) => {
                    return Err(AppError::Webhook { url: url.to_string(), reason: e.to_string() });
                }
            }
            tokio::time::sleep(self.retry_base * 2u32.pow(attempt)).await;
            attempt += 1;
        }
    }
}
