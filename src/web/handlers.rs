//! HTTP request handlers.

use super::AppState;
use crate::db::{AlertSettings, CheckResult, Store, StoreError, Target, TargetRegistry};
use crate::probe::{normalize_url, round2, CertificateInfo, ProbeError};
use crate::scheduler::CheckError;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn store_error(e: StoreError) -> Response {
    match e {
        StoreError::NotFound => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        StoreError::Duplicate(_) => (StatusCode::CONFLICT, e.to_string()).into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Targets
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TargetsQuery {
    #[serde(default)]
    pub search: Option<String>,
}

pub async fn handle_get_targets(
    State(state): State<AppState>,
    Query(query): Query<TargetsQuery>,
) -> impl IntoResponse {
    let targets = match query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(term) => state.store.search_targets(term),
        None => state.store.targets(),
    };

    match targets {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => store_error(e),
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub check_ssl: bool,
    #[serde(default = "default_true")]
    pub check_security: bool,
    #[serde(default = "default_true")]
    pub alerts_enabled: bool,
    #[serde(default)]
    pub alert_emails: BTreeSet<String>,
    #[serde(default)]
    pub alert_phone: Option<String>,
}

impl TargetRequest {
    fn into_target(self, id: i64) -> Result<Target, String> {
        let mut target = Target {
            id,
            name: self.name,
            url: self.url,
            description: self.description.filter(|d| !d.trim().is_empty()),
            check_ssl: self.check_ssl,
            check_security: self.check_security,
            alerts: AlertSettings {
                enabled: self.alerts_enabled,
                emails: self.alert_emails,
                phone: self.alert_phone.filter(|p| !p.trim().is_empty()),
            },
        };
        target.normalize()?;
        Ok(target)
    }
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    let mut target = match req.into_target(0) {
        Ok(t) => t,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    match state.store.add_target(&mut target) {
        Ok(_) => {
            tracing::info!("Web: added target {} ({})", target.name, target.url);
            (StatusCode::CREATED, Json(target)).into_response()
        }
        Err(e) => store_error(e),
    }
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    let updated = match req.into_target(id) {
        Ok(t) => t,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    match state.store.update_target(&updated) {
        Ok(_) => Json(updated).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if let Err(e) = state.store.target(id) {
        return store_error(e);
    }

    match state.store.delete_target(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error(e),
    }
}

/// Run a check immediately and return its result.
pub async fn handle_check_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.scheduler.check_now(id).await {
        Ok(result) => Json(result).into_response(),
        Err(CheckError::Store(e)) => store_error(e),
        Err(CheckError::Probe(e)) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Statistics
// ============================================================================

pub async fn handle_target_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if let Err(e) = state.store.target(id) {
        return store_error(e);
    }

    match state.stats.target_overview(id) {
        Ok(overview) => Json(overview).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChecksQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Check history, newest first.
pub async fn handle_check_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ChecksQuery>,
) -> impl IntoResponse {
    if let Err(e) = state.store.target(id) {
        return store_error(e);
    }

    let limit = query.limit.unwrap_or(20).clamp(1, 1000);
    match state.store.check_results(id, limit, query.offset.unwrap_or(0)) {
        Ok(results) => Json(results).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    #[serde(default)]
    pub days: Option<u32>,
}

pub async fn handle_daily_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<DailyQuery>,
) -> impl IntoResponse {
    if let Err(e) = state.store.target(id) {
        return store_error(e);
    }

    let days = query.days.unwrap_or(30).clamp(1, 365);
    match state.stats.daily_stats(id, days) {
        Ok(daily) => Json(daily).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Serialize)]
pub struct SslInfo {
    #[serde(flatten)]
    pub certificate: CertificateInfo,
    pub days_remaining: i64,
    pub valid: bool,
}

/// Inspect the target's certificate on demand.
pub async fn handle_ssl_info(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let target = match state.store.target(id) {
        Ok(t) => t,
        Err(e) => return store_error(e),
    };

    let url = match normalize_url(&target.url) {
        Ok(u) if u.scheme() == "https" => u,
        Ok(_) => return (StatusCode::BAD_REQUEST, "Target does not use HTTPS").into_response(),
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let host = url.host_str().unwrap_or_default();
    let port = url.port_or_known_default().unwrap_or(443);

    let transport = state.scheduler.context().prober.transport().clone();
    match transport
        .inspect_certificate(host, port, state.config.connection_timeout)
        .await
    {
        Ok(certificate) => {
            let days_remaining = certificate.days_remaining(Utc::now());
            Json(SslInfo {
                certificate,
                days_remaining,
                valid: days_remaining > 0,
            })
            .into_response()
        }
        Err(e @ ProbeError::InvalidTarget(_)) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Status and incidents
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TargetStatus {
    pub target: Target,
    /// "up", "down" or "unknown" before the first check
    pub state: &'static str,
    pub latest: Option<CheckResult>,
    pub uptime_24h: f64,
    pub open_incident: bool,
}

/// Current state of every target.
pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let targets = match state.store.targets() {
        Ok(t) => t,
        Err(e) => return store_error(e),
    };

    let statuses: Result<Vec<_>, _> = targets
        .into_iter()
        .map(|t| target_status(&state, t))
        .collect();
    match statuses {
        Ok(statuses) => Json(statuses).into_response(),
        Err(e) => store_error(e),
    }
}

fn target_status(state: &AppState, target: Target) -> Result<TargetStatus, StoreError> {
    let latest = state.store.latest_check_result(target.id)?;
    Ok(TargetStatus {
        state: match &latest {
            Some(r) if r.is_up => "up",
            Some(_) => "down",
            None => "unknown",
        },
        latest,
        uptime_24h: round2(state.stats.uptime_percentage(target.id, 1)?),
        open_incident: state.store.open_incident(target.id)?.is_some(),
        target,
    })
}

#[derive(Debug, Deserialize)]
pub struct IncidentsQuery {
    #[serde(default)]
    pub target_id: Option<i64>,
    /// Include resolved incidents (default: true)
    #[serde(default)]
    pub resolved: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn handle_incidents(
    State(state): State<AppState>,
    Query(query): Query<IncidentsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).min(1000);
    match state
        .store
        .incidents(query.target_id, query.resolved.unwrap_or(true), Some(limit))
    {
        Ok(incidents) => Json(incidents).into_response(),
        Err(e) => store_error(e),
    }
}

/// Summary of the last completed tick.
pub async fn handle_last_tick(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.last_summary().await {
        Some(summary) => Json(summary).into_response(),
        None => (StatusCode::NOT_FOUND, "No tick has completed yet").into_response(),
    }
}
