//! Cloud download notifications and availability.
//!
//! A client sees finished downloads addressed to its IP first; with none
//! pending it gets the processing/download switches for its network.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path as AxumPath, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::{require_dir, AppState};
use crate::error::ApiError;
use crate::protocol::{CloudReport, Cursor};

#[derive(Deserialize)]
pub(super) struct CloudQuery {
    datadir: String,
    ip_address: String,
    #[serde(default)]
    cursor: i64,
}

pub(super) async fn handler_api_cloud(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CloudQuery>, QueryRejection>,
) -> Result<Json<CloudReport>, ApiError> {
    let Query(q) = query?;
    let datadir = require_dir(&q.datadir)?;
    let ip = q.ip_address.trim();
    if ip.is_empty() {
        return Err(ApiError::InvalidInput("ip_address: required".into()));
    }
    let local = state.config.cloud.is_local(ip);
    let report = state
        .db
        .cloud_report(datadir, ip, Cursor(q.cursor.max(0)), local)
        .await?;
    let count = match &report {
        CloudReport::Downloads { downloads, .. } => downloads.len(),
        CloudReport::Availability { .. } => 0,
    };
    state.prom_metrics.record_poll("cloud", count);
    Ok(Json(report))
}

pub(super) async fn handler_api_cloud_shown(
    State(state): State<Arc<AppState>>,
    path: Result<AxumPath<i64>, PathRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let AxumPath(id) = path?;
    if !state.db.mark_download_shown(id).await? {
        return Err(ApiError::NotFound(format!("cloud download {}", id)));
    }
    Ok(Json(serde_json::json!({ "cloud_complete_id": id, "status": "shown" })))
}
