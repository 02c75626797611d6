//! Health check endpoints

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::api::types::Json;
use serde::Serialize;

use super::state::AppState;

/// Body of `/health` and `/ready`
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<HealthCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl HealthResponse {
    fn new(status: HealthStatus) -> Self {
        Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
            checks: Vec::new(),
            latency_ms: None,
        }
    }

    /// Unhealthy as soon as one check is
    fn from_checks(checks: Vec<HealthCheck>, started: Instant) -> Self {
        let status = if checks.iter().all(|c| c.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            checks,
            latency_ms: Some(elapsed_ms(started)),
            ..Self::new(status)
        }
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
}

/// Returns 200 with the crate version while the process is up
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse::new(HealthStatus::Healthy))
}

/// 503 unless the chain repository answers
pub async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let response = HealthResponse::from_checks(vec![check_chains(&state).await], started);

    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

/// Bare liveness check
pub async fn live_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn check_chains(state: &AppState) -> HealthCheck {
    let started = Instant::now();

    let (status, message) = match state.chain_service.list().await {
        Ok(chains) => (HealthStatus::Healthy, Some(format!("{} chains loaded", chains.len()))),
        Err(e) => (HealthStatus::Unhealthy, Some(e.to_string())),
    };

    HealthCheck {
        name: "chain_repository",
        status,
        message,
        latency_ms: elapsed_ms(started),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
