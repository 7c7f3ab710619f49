use axum::extract::State;
use axum::http::StatusCode;
use axum::{Router, routing::get};
use tracing::warn;

use sbomhub_core::health::healthz;

use crate::state::AppState;

/// Operational HTTP surface. The CRUD API over projects and SBOMs lives in
/// another deployment; this process only answers probes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Readiness gates on the database: a replica that cannot reach Postgres can
/// neither claim outbox rows nor persist SBOMs, so it must not report ready.
async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(err) => {
            warn!(error = %err, "readiness probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unreachable")
        }
    }
}
