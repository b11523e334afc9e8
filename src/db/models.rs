/// Row types matching migrations/0001_init.sql.

#[derive(Debug, sqlx::FromRow)]
pub struct ReportRow {
    pub id: i64,
    pub ticker: String,
    pub risk_score: i64,
    pub risk_level: String,
    pub red_flags: i64,
    pub report_json: String,
    pub analyzed_at: String,
    pub created_at: i64,
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct FailureRow {
    pub id: i64,
    pub ticker: String,
    pub error: String,
    pub created_at: i64,
}
