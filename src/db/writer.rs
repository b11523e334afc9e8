use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::types::RiskReport;

/// Destination for finished scan output.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn accept(&self, report: &RiskReport) -> Result<()>;
    async fn record_failure(&self, ticker: &str, error: &str) -> Result<()>;
}

/// Persists reports and failures to SQLite. Each report is stored whole as JSON
/// next to the columns the API filters on.
pub struct SqliteReportSink {
    pool: sqlx::SqlitePool,
}

impl SqliteReportSink {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportSink for SqliteReportSink {
    async fn accept(&self, report: &RiskReport) -> Result<()> {
        let report_json = serde_json::to_string(report)?;
        let risk_level = report.risk_level.to_string();
        let analyzed_at = report.analyzed_at.to_rfc3339();
        let created_at = chrono::Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO reports (
                ticker, risk_score, risk_level, red_flags, report_json, analyzed_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.ticker)
        .bind(i64::from(report.risk_score))
        .bind(risk_level)
        .bind(report.red_flags_count as i64)
        .bind(report_json)
        .bind(analyzed_at)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        debug!(ticker = %report.ticker, score = report.risk_score, "Report stored");
        Ok(())
    }

    async fn record_failure(&self, ticker: &str, error: &str) -> Result<()> {
        let created_at = chrono::Utc::now().timestamp_millis();
        sqlx::query("INSERT INTO scan_failures (ticker, error, created_at) VALUES (?, ?, ?)")
            .bind(ticker)
            .bind(error)
            .bind(created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
