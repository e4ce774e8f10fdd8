//! Application startup and lifecycle management.

use crate::config::FinanceConfig;
use crate::services::metrics::{get_metrics, init_metrics};
use crate::services::{sweeper, Clock, Database, Ledger, SystemClock};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: FinanceConfig,
    pub db: Database,
    pub ledger: Ledger,
}

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    db: Database,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "finance-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "finance-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: FinanceConfig) -> Result<Self, AppError> {
        Self::build_internal(config, Arc::new(SystemClock), true).await
    }

    /// Build with an injected clock and without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_with_clock(
        config: FinanceConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        Self::build_internal(config, clock, false).await
    }

    async fn build_internal(
        config: FinanceConfig,
        clock: Arc<dyn Clock>,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(&config.database).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let ledger = Ledger::new(
            db.clone(),
            clock,
            config.technician_payment_categories.clone(),
        );

        let http_addr = config.common.http_addr();
        let http_listener = TcpListener::bind(&http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Finance service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state: AppState { config, db, ledger },
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Ledger services for in-process callers.
    pub fn ledger(&self) -> &Ledger {
        &self.state.ledger
    }

    /// Run the application until stopped. The overdue sweep runs alongside
    /// the HTTP server and is cancelled when the server exits.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            db: self.state.db.clone(),
        };

        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(health_state);

        let cancel = CancellationToken::new();
        let sweep = match self.state.config.sweep_interval {
            Some(every) => Some(tokio::spawn(sweeper::run(
                self.state.ledger.entries.clone(),
                every,
                cancel.clone(),
            ))),
            None => {
                tracing::info!("Overdue sweep disabled");
                None
            }
        };

        tracing::info!(
            service = %self.state.config.service_name,
            version = %self.state.config.service_version,
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.http_listener, http_router).await;

        cancel.cancel();
        if let Some(handle) = sweep {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Overdue sweep task ended abnormally");
            }
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
