//! JSON API server.

mod handlers;

pub use handlers::*;

use crate::config::MonitorConfig;
use crate::db::SqliteStore;
use crate::scheduler::Scheduler;
use crate::stats::StatsAggregator;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: MonitorConfig,
    pub store: Arc<SqliteStore>,
    pub scheduler: Arc<Scheduler>,
    pub stats: StatsAggregator,
}

/// API server for domainwatch.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: MonitorConfig, store: Arc<SqliteStore>, scheduler: Arc<Scheduler>) -> Self {
        let stats = StatsAggregator::new(store.clone());
        Self {
            state: AppState {
                config,
                store,
                scheduler,
                stats,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route(
                "/api/targets",
                get(handlers::handle_get_targets).post(handlers::handle_create_target),
            )
            .route(
                "/api/targets/{id}",
                put(handlers::handle_update_target).delete(handlers::handle_delete_target),
            )
            .route("/api/targets/{id}/check", post(handlers::handle_check_target))
            .route("/api/targets/{id}/checks", get(handlers::handle_check_history))
            .route("/api/targets/{id}/stats", get(handlers::handle_target_stats))
            .route("/api/targets/{id}/daily", get(handlers::handle_daily_stats))
            .route("/api/targets/{id}/ssl", get(handlers::handle_ssl_info))
            .route("/api/status", get(handlers::handle_status))
            .route("/api/incidents", get(handlers::handle_incidents))
            .route("/api/last-tick", get(handlers::handle_last_tick))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
