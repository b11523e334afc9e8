use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::health::HealthState;
use crate::api::latency::ScanLatency;
use crate::config::{SCAN_STATE_KEY, SUMMARY_KEY};
use crate::db::models::{FailureRow, ReportRow};
use crate::db::KeyValueStore;
use crate::error::AppError;
use crate::report::markdown::format_report;
use crate::state::normalize_ticker;
use crate::types::RiskReport;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub health: Arc<HealthState>,
    pub latency: Arc<ScanLatency>,
    pub kv: Arc<dyn KeyValueStore>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/reports", get(get_reports))
        .route("/reports/:ticker", get(get_ticker_reports))
        .route("/reports/:ticker/markdown", get(get_ticker_markdown))
        .route("/failures", get(get_failures))
        .route("/state", get(get_scan_state))
        .route("/summary", get(get_summary))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

const REPORT_COLUMNS: &str =
    "id, ticker, risk_score, risk_level, red_flags, report_json, analyzed_at, created_at";

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ReportsQuery {
    pub min_score: Option<i64>,
    pub level: Option<String>,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub scan_in_progress: bool,
    pub batches_run: u64,
    pub last_batch_at_ms: Option<u64>,
    pub last_batch_size: u64,
    pub reports_stored: i64,
}

/// Latest report per ticker, without the full body.
#[derive(Serialize)]
pub struct ReportSummary {
    pub report_id: i64,
    pub ticker: String,
    pub risk_score: i64,
    pub risk_level: String,
    pub red_flags: i64,
    pub analyzed_at: String,
    /// Unix ms when the row was written.
    pub stored_at_ms: i64,
}

impl From<ReportRow> for ReportSummary {
    fn from(r: ReportRow) -> Self {
        Self {
            report_id: r.id,
            ticker: r.ticker,
            risk_score: r.risk_score,
            risk_level: r.risk_level,
            red_flags: r.red_flags,
            analyzed_at: r.analyzed_at,
            stored_at_ms: r.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let reports_stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reports")
        .fetch_one(&state.pool)
        .await?;
    let last = state.health.last_batch_at_ms();

    Ok(Json(HealthResponse {
        status: "ok",
        scan_in_progress: state.health.scan_in_progress(),
        batches_run: state.health.batches_run(),
        last_batch_at_ms: (last > 0).then_some(last),
        last_batch_size: state.health.last_batch_size(),
        reports_stored,
    }))
}

async fn get_reports(
    State(state): State<ApiState>,
    Query(params): Query<ReportsQuery>,
) -> Result<Json<Vec<ReportSummary>>, AppError> {
    let min_score = params.min_score.unwrap_or(0);
    let level = params.level.map(|l| l.trim().to_lowercase());

    let sql = format!(
        r#"
        SELECT {REPORT_COLUMNS}
        FROM reports r
        WHERE r.id = (SELECT MAX(id) FROM reports WHERE ticker = r.ticker)
          AND r.risk_score >= ?
          AND (? IS NULL OR r.risk_level = ?)
        ORDER BY r.risk_score DESC, r.ticker
        "#
    );
    let rows: Vec<ReportRow> = sqlx::query_as(&sql)
        .bind(min_score)
        .bind(level.as_deref())
        .bind(level.as_deref())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(rows.into_iter().map(ReportSummary::from).collect()))
}

async fn get_ticker_reports(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<RiskReport>>, AppError> {
    let ticker = normalize_ticker(&ticker);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);

    let rows = fetch_ticker_rows(&state.pool, &ticker, limit).await?;
    if rows.is_empty() {
        return Err(AppError::NotFound(format!("no reports for {ticker}")));
    }

    let reports = rows
        .iter()
        .map(|r| serde_json::from_str::<RiskReport>(&r.report_json))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(reports))
}

async fn get_ticker_markdown(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
) -> Result<String, AppError> {
    let ticker = normalize_ticker(&ticker);
    let row = fetch_ticker_rows(&state.pool, &ticker, 1)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("no reports for {ticker}")))?;

    let report: RiskReport = serde_json::from_str(&row.report_json)?;
    Ok(format_report(&report))
}

async fn get_failures(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<FailureRow>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let rows: Vec<FailureRow> = sqlx::query_as(
        "SELECT id, ticker, error, created_at FROM scan_failures ORDER BY id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

async fn get_scan_state(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    let value = state.kv.get_value(SCAN_STATE_KEY).await?;
    Ok(Json(value.unwrap_or_else(|| json!({}))))
}

async fn get_summary(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    state
        .kv
        .get_value(SUMMARY_KEY)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no completed scan yet".to_string()))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<Value> {
    let (p50, p95, p99) = state.latency.percentiles();
    Json(json!({
        "samples": state.latency.len(),
        "p50_ms": p50,
        "p95_ms": p95,
        "p99_ms": p99
    }))
}

async fn fetch_ticker_rows(
    pool: &sqlx::SqlitePool,
    ticker: &str,
    limit: i64,
) -> Result<Vec<ReportRow>, AppError> {
    let sql = format!("SELECT {REPORT_COLUMNS} FROM reports WHERE ticker = ? ORDER BY id DESC LIMIT ?");
    let rows = sqlx::query_as(&sql).bind(ticker).bind(limit).fetch_all(pool).await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::kv::test_pool;
    use crate::db::{ReportSink, SqliteKvStore, SqliteReportSink};
    use crate::report::fixtures;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn app() -> (Router, ApiState) {
        let pool = test_pool().await;
        let state = ApiState {
            pool: pool.clone(),
            health: Arc::new(HealthState::new()),
            latency: Arc::new(ScanLatency::new()),
            kv: Arc::new(SqliteKvStore::new(pool)),
        };
        (router(state.clone()), state)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let (status, body) = get(app, uri).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_reports_batch_progress() {
        let (app, state) = app().await;
        let (status, body) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["last_batch_at_ms"], Value::Null);

        state.health.batch_started();
        state.health.batch_finished(1_700_000_000_000, 12);
        let (_, body) = get_json(&app, "/health").await;
        assert_eq!(body["batches_run"], 1);
        assert_eq!(body["last_batch_size"], 12);
        assert_eq!(body["scan_in_progress"], false);
    }

    #[tokio::test]
    async fn reports_list_latest_per_ticker_with_filters() {
        let (app, state) = app().await;
        let sink = SqliteReportSink::new(state.pool.clone());
        sink.accept(&fixtures::report("ACME", 40)).await.unwrap();
        sink.accept(&fixtures::report("ACME", 80)).await.unwrap();
        sink.accept(&fixtures::report("INIT", 55)).await.unwrap();
        sink.accept(&fixtures::report("CALM", 10)).await.unwrap();

        let (status, body) = get_json(&app, "/reports").await;
        assert_eq!(status, StatusCode::OK);
        let tickers: Vec<&str> = body.as_array().unwrap().iter().map(|r| r["ticker"].as_str().unwrap()).collect();
        assert_eq!(tickers, vec!["ACME", "INIT", "CALM"]);
        assert_eq!(body[0]["risk_score"], 80);
        assert_eq!(body[0]["report_id"], 2);
        assert!(body[0]["stored_at_ms"].as_i64().unwrap() > 0);

        let (_, body) = get_json(&app, "/reports?min_score=50").await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = get_json(&app, "/reports?level=Elevated").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["ticker"], "INIT");
    }

    #[tokio::test]
    async fn ticker_history_and_markdown() {
        let (app, state) = app().await;
        let sink = SqliteReportSink::new(state.pool.clone());
        sink.accept(&fixtures::report("ACME", 40)).await.unwrap();
        sink.accept(&fixtures::report("ACME", 80)).await.unwrap();

        let (status, body) = get_json(&app, "/reports/acme?limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["risk_score"], 80);

        let (status, body) = get(&app, "/reports/ACME/markdown").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("**Risk Score: 80/100 (HIGH)**"));

        let (status, _) = get(&app, "/reports/NOPE").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(&app, "/reports/NOPE/markdown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn failures_newest_first() {
        let (app, state) = app().await;
        let sink = SqliteReportSink::new(state.pool.clone());
        sink.record_failure("AAA", "Collection failed: first").await.unwrap();
        sink.record_failure("BBB", "Analysis failed: second").await.unwrap();

        let (status, body) = get_json(&app, "/failures?limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["ticker"], "BBB");
    }

    #[tokio::test]
    async fn state_and_summary_come_from_kv() {
        let (app, state) = app().await;
        let (_, body) = get_json(&app, "/state").await;
        assert_eq!(body, json!({}));
        let (status, _) = get(&app, "/summary").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state.kv.set_value(SUMMARY_KEY, &json!({"total": 3, "scan_mode": "sp500"})).await.unwrap();
        let (status, body) = get_json(&app, "/summary").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
    }

    #[tokio::test]
    async fn latency_percentiles() {
        let (app, state) = app().await;
        let (_, body) = get_json(&app, "/stats/latency").await;
        assert_eq!(body["samples"], 0);
        assert_eq!(body["p50_ms"], Value::Null);

        state.latency.record_ms(1_200);
        let (_, body) = get_json(&app, "/stats/latency").await;
        assert_eq!(body["samples"], 1);
        assert!(body["p99_ms"].as_u64().unwrap() >= 1_000);
    }
}
