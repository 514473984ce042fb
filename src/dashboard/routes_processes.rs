//! In-flight process placeholders.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::{require_dir, AppState};
use crate::error::ApiError;
use crate::protocol::ProcessesBatch;

#[derive(Deserialize)]
pub(super) struct ProcessesQuery {
    datadir: String,
}

pub(super) async fn handler_api_processes(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ProcessesQuery>, QueryRejection>,
) -> Result<Json<ProcessesBatch>, ApiError> {
    let Query(q) = query?;
    let datadir = require_dir(&q.datadir)?;
    let batch = state.db.pending_processes(datadir).await?;
    state
        .prom_metrics
        .record_poll("processes", batch.processes.len());
    Ok(Json(batch))
}
