mod analyzer;
mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod report;
mod scanner;
mod scorer;
mod state;
mod types;
mod webhook;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analyzer::LlmAnalyzer;
use crate::api::health::HealthState;
use crate::api::latency::ScanLatency;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::{KeyValueStore, SqliteKvStore, SqliteReportSink};
use crate::error::Result;
use crate::fetcher::{SecCollector, StockUniverse};
use crate::scanner::{RiskScanner, ScanScheduler};
use crate::scorer::RuleScorer;
use crate::webhook::WebhookService;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Scan pipeline ---
    let analyzer = LlmAnalyzer::new(cfg.llm.clone())?;
    let source = SecCollector::new(cfg.sec.clone())?;
    let scorer = RuleScorer::new(cfg.scoring.clone())?;
    let latency = Arc::new(ScanLatency::new());
    info!(
        model = %cfg.llm.model,
        category_scoring = cfg.scoring.use_category_scoring,
        "Analyzer ready"
    );

    let scanner = Arc::new(RiskScanner::new(
        Arc::new(source),
        Arc::new(analyzer),
        Arc::new(scorer),
        Arc::clone(&latency),
    ));

    let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteKvStore::new(pool.clone()));
    let health = Arc::new(HealthState::new());
    let webhook = WebhookService::new(cfg.webhook.clone())?;
    if webhook.is_enabled() {
        info!(
            format = ?cfg.webhook.format,
            threshold = cfg.webhook.alert_threshold,
            "Webhook alerts enabled"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown requested, finishing current ticker");
        let _ = shutdown_tx.send(true);
    });

    let mut scheduler = ScanScheduler::new(
        cfg.scan.clone(),
        Arc::new(StockUniverse::new(&cfg.universe_user_agent)?),
        scanner,
        Arc::clone(&kv),
        Arc::new(SqliteReportSink::new(pool.clone())),
        webhook,
        Arc::clone(&health),
    )
    .with_shutdown(shutdown_rx.clone());

    if cfg.scan.run_once {
        let summary = scheduler.run_once().await?;
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            "Single run complete"
        );
        return Ok(());
    }

    // Scan scheduler (background, every SCAN_INTERVAL_SECS)
    let scheduler_task = tokio::spawn(scheduler.run());

    // HTTP API server
    let api_state = ApiState { pool: pool.clone(), health, latency, kv };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let mut shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    // The scheduler saves scan state before it returns.
    info!("HTTP API stopped, waiting for scan scheduler");
    if let Err(e) = scheduler_task.await {
        error!("Scan scheduler task failed: {e}");
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
