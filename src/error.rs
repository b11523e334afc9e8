use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ticker '{0}' not found")]
    TickerNotFound(String),

    #[error("{source_name} rate limit exceeded")]
    RateLimited {
        source_name: String,
        retry_after: Option<u64>,
    },

    #[error("Failed to fetch {url}{}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Fetch { url: String, status: Option<u16> },

    #[error("Analyzer error: {0}")]
    Analyzer(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Webhook delivery failed to {url}: {reason}")]
    Webhook { url: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Errors raised while talking to the filing source.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            AppError::TickerNotFound(_)
                | AppError::Fetch { .. }
                | AppError::RateLimited { .. }
                | AppError::Http(_)
        )
    }

    pub fn is_analyzer(&self) -> bool {
        matches!(self, AppError::Analyzer(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) | AppError::TickerNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_message_includes_status_when_known() {
        let e = AppError::Fetch { url: "https://www.sec.gov/x".into(), status: Some(503) };
        assert_eq!(e.to_string(), "Failed to fetch https://www.sec.gov/x (HTTP 503)");

        let e = AppError::Fetch { url: "https://www.sec.gov/x".into(), status: None };
        assert_eq!(e.to_string(), "Failed to fetch https://www.sec.gov/x");
    }

    #[test]
    fn classification() {
        assert!(AppError::TickerNotFound("ZZZZ".into()).is_collection());
        assert!(!AppError::TickerNotFound("ZZZZ".into()).is_analyzer());
        assert!(AppError::Analyzer("bad".into()).is_analyzer());
        assert!(!AppError::Persistence("x".into()).is_collection());
    }
}
