//! Result polling and hide endpoints.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path as AxumPath, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::{require_dir, AppState};
use crate::db::HideScope;
use crate::error::ApiError;
use crate::protocol::{Cursor, ResultsBatch};

#[derive(Deserialize)]
pub(super) struct ResultsQuery {
    datadir: String,
    #[serde(default)]
    cursor: i64,
}

#[derive(Deserialize)]
pub(super) struct HideQuery {
    datadir: String,
    scope: HideScope,
}

pub(super) async fn handler_api_results(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ResultsQuery>, QueryRejection>,
) -> Result<Json<ResultsBatch>, ApiError> {
    let Query(q) = query?;
    let datadir = require_dir(&q.datadir)?;
    if q.cursor < 0 {
        return Err(ApiError::InvalidInput("cursor must not be negative".into()));
    }
    let batch = state
        .db
        .results_since(datadir, Cursor(q.cursor), &state.config.staleness)
        .await?;
    state.prom_metrics.record_poll("results", batch.entries.len());
    Ok(Json(batch))
}

pub(super) async fn handler_api_hide_result(
    State(state): State<Arc<AppState>>,
    path: Result<AxumPath<i64>, PathRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let AxumPath(result_id) = path?;
    if !state.db.hide_result(result_id).await? {
        return Err(ApiError::NotFound(format!("result {}", result_id)));
    }
    info!(result_id, "result hidden");
    Ok(Json(serde_json::json!({ "result_id": result_id, "visible": false })))
}

pub(super) async fn handler_api_hide_results(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HideQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(q) = query?;
    let datadir = require_dir(&q.datadir)?;
    let hidden = state.db.hide_results(datadir, q.scope).await?;
    info!(datadir, scope = ?q.scope, hidden, "results hidden");
    Ok(Json(serde_json::json!({ "hidden": hidden })))
}
