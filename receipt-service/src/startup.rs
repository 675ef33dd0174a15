//! Application wiring: build the router from its collaborators and run the
//! server.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ReceiptConfig;
use crate::handlers::{health, receipts};
use crate::services::ledger::{LedgerStore, PgLedgerStore};
use crate::services::lifecycle::FileLifecycle;
use crate::services::matcher::{CandidateMatcher, MatcherConfig};
use crate::services::metrics;
use crate::services::ocr::{HttpOcrEngine, OcrClientConfig, OcrEngine};
use crate::services::orchestrator::Orchestrator;
use crate::services::storage::LocalObjectStore;

/// Shared handler state. Built from trait objects so tests can inject
/// in-memory collaborators.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn LedgerStore>,
    pub ocr: Arc<dyn OcrEngine>,
    pub lifecycle: Arc<FileLifecycle>,
    pub matcher: Arc<CandidateMatcher>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(ledger: Arc<dyn LedgerStore>, ocr: Arc<dyn OcrEngine>, lifecycle: FileLifecycle) -> Self {
        Self {
            matcher: Arc::new(CandidateMatcher::new(ledger.clone(), MatcherConfig::default())),
            orchestrator: Arc::new(Orchestrator::new(ledger.clone())),
            lifecycle: Arc::new(lifecycle),
            ledger,
            ocr,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/receipts", post(receipts::upload_receipt))
        .route("/receipts/normalize", post(receipts::normalize_receipt))
        .route("/receipts/matches", post(receipts::query_matches))
        .route("/receipts/promote", post(receipts::promote_receipt))
        .route("/reconciliation/commit", post(receipts::commit_reconciliation))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(health::metrics_endpoint))
        // Uploads are capped at 10 MiB by the lifecycle; leave headroom for
        // the multipart framing.
        .layer(DefaultBodyLimit::max(11 * 1024 * 1024))
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct Application {
    listener: tokio::net::TcpListener,
    router: Router,
    pub port: u16,
}

impl Application {
    pub async fn build(config: ReceiptConfig) -> Result<Self, AppError> {
        metrics::init_metrics();

        let ledger = PgLedgerStore::new(&config.database).await?;
        ledger.run_migrations().await?;
        let ledger: Arc<dyn LedgerStore> = Arc::new(ledger);

        let ocr: Arc<dyn OcrEngine> = Arc::new(HttpOcrEngine::new(OcrClientConfig::new(
            config.ocr_service.url.clone(),
        ))?);

        let store = Arc::new(LocalObjectStore::new(config.storage.local_path.clone()));
        let lifecycle = FileLifecycle::new(store, config.storage.public_base_url.clone());

        let state = AppState::new(ledger, ocr, lifecycle);

        let addr = format!("0.0.0.0:{}", config.common.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let port = listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(config.common.port);
        info!(%addr, "receipt-service listening");

        Ok(Self {
            listener,
            router: router(state),
            port,
        })
    }

    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
