use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{error, instrument, warn};

use super::dto::{DatabaseHealth, HealthFailure, HealthReport};
use crate::{error::AppError, state::AppState};

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[instrument(skip(state))]
pub async fn health(State(state): State<AppState>) -> Response {
    health_at(&state, OffsetDateTime::now_utc()).await
}

/// A failing database check is reported inside a 200; anything else that
/// goes wrong while building the report turns into a 500.
pub(crate) async fn health_at(state: &AppState, now: OffsetDateTime) -> Response {
    match build_report(state, now).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!(error = %e, "health check failed");
            let timestamp = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HealthFailure {
                    status: "error",
                    message: e.to_string(),
                    timestamp,
                }),
            )
                .into_response()
        }
    }
}

async fn build_report(state: &AppState, now: OffsetDateTime) -> Result<HealthReport, AppError> {
    let database = check_database(state).await;
    let timestamp = now
        .format(&Rfc3339)
        .map_err(|e| AppError::Unknown(format!("format timestamp: {e}")))?;

    Ok(HealthReport {
        status: "ok",
        timestamp,
        database,
        environment: state.config.environment.clone(),
        version: state.config.version.clone(),
    })
}

async fn check_database(state: &AppState) -> DatabaseHealth {
    let started = Instant::now();
    match state.db.connect().await {
        Ok(handle) => DatabaseHealth::Connected {
            connection_time: started.elapsed().as_millis() as u64,
            connected_at: handle.connected_at(),
        },
        Err(e) => {
            warn!(error = %e, "database health check failed");
            DatabaseHealth::Error {
                message: e.to_string(),
            }
        }
    }
}
