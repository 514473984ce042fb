//! Integrated-run ranking rows, keyed by `result_id`.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::{require_dir, AppState};
use crate::error::ApiError;
use crate::protocol::{Cursor, RankingsBatch};

#[derive(Deserialize)]
pub(super) struct RankingsQuery {
    datadir: String,
    #[serde(default)]
    cursor: i64,
}

pub(super) async fn handler_api_run_rankings(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RankingsQuery>, QueryRejection>,
) -> Result<Json<RankingsBatch>, ApiError> {
    let Query(q) = query?;
    let datadir = require_dir(&q.datadir)?;
    let batch = state
        .db
        .run_rankings(datadir, Cursor(q.cursor.max(0)))
        .await?;
    state.prom_metrics.record_poll("rankings", batch.runs.len());
    Ok(Json(batch))
}
