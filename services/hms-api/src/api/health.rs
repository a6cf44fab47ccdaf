//! Liveness and readiness checks.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

const SERVICE: &str = "hms-api";

/// Body of `/healthz` and `/readyz`.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthReport {
    /// `ok` or `degraded`.
    pub status: String,
    pub service: String,
    pub version: String,
    pub checked_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreCheck>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct StoreCheck {
    pub backend: String,
    /// `ok` or `unavailable`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthReport {
    fn new(healthy: bool, store: Option<StoreCheck>) -> Self {
        Self {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            service: SERVICE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checked_at: Utc::now().to_rfc3339(),
            store,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

/// The process is up. Dependencies are not consulted.
async fn healthz() -> Json<HealthReport> {
    Json(HealthReport::new(true, None))
}

/// The record store answers a ping. 503 otherwise; the cause is logged,
/// never returned.
async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let store = state.store();
    let backend = format!("{:?}", store.backend()).to_lowercase();

    match store.ping().await {
        Ok(()) => {
            let check = StoreCheck {
                backend,
                status: "ok".to_string(),
                message: None,
            };
            (StatusCode::OK, Json(HealthReport::new(true, Some(check))))
        }
        Err(e) => {
            tracing::warn!(error = %e, backend = %backend, "Record store ping failed");
            let check = StoreCheck {
                backend,
                status: "unavailable".to_string(),
                message: Some("record store is unreachable".to_string()),
            };
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthReport::new(false, Some(check))),
            )
        }
    }
}

async fn livez() -> StatusCode {
    StatusCode::OK
}
