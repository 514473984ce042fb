//! Beamline heartbeat status.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::AppState;
use crate::error::ApiError;
use crate::protocol::BeamlineStatus;

#[derive(Deserialize)]
pub(super) struct StatusQuery {
    beamline: String,
}

pub(super) async fn handler_api_status(
    State(state): State<Arc<AppState>>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<BeamlineStatus>, ApiError> {
    let Query(q) = query?;
    let beamline = q.beamline.trim();
    if beamline.is_empty() {
        return Err(ApiError::InvalidInput("beamline: required".into()));
    }
    let status = state.db.beamline_status(beamline).await?;
    state.prom_metrics.record_poll("status", 1);
    Ok(Json(status))
}
