//! Settings and reprocess mutations.
//!
//! Both endpoints take form-encoded bodies, validate every field before
//! touching the database, and write inside a single transaction. The
//! response carries an HTML summary of the values written for the panel to
//! drop into its confirmation dialog.

use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::Json;
use std::sync::Arc;
use tracing::{info, warn};

use super::AppState;
use crate::error::ApiError;
use crate::protocol::{MutationResponse, SettingsTarget};
use crate::settings::{FormType, ReprocessForm, SettingsForm};

pub(super) async fn handler_api_settings(
    State(state): State<Arc<AppState>>,
    form: Result<Form<SettingsForm>, FormRejection>,
) -> Result<Json<MutationResponse>, ApiError> {
    let result = apply_settings(&state, form).await;
    state.prom_metrics.record_mutation("settings", result.is_ok());
    result.map(Json)
}

async fn apply_settings(
    state: &AppState,
    form: Result<Form<SettingsForm>, FormRejection>,
) -> Result<MutationResponse, ApiError> {
    let Form(form) = form?;
    let mutation = form.validate()?;
    let setting_id = state.db.apply_settings(&mutation).await?;
    let s = &mutation.setting;

    let (target, message) = match mutation.form_type {
        FormType::Preset => (
            SettingsTarget::Presets,
            format!("Settings saved as the preset for {}", s.data_root_dir),
        ),
        FormType::Current => (
            SettingsTarget::Current,
            format!("Settings are now current on beamline {}", s.beamline),
        ),
    };
    info!(setting_id, beamline = %s.beamline, target = ?target, "settings applied");
    Ok(MutationResponse {
        setting_id,
        target,
        cloud_request_id: None,
        queue: None,
        message,
        summary: s.summary_html(None),
    })
}

pub(super) async fn handler_api_reprocess(
    State(state): State<Arc<AppState>>,
    form: Result<Form<ReprocessForm>, FormRejection>,
) -> Result<Json<MutationResponse>, ApiError> {
    let result = submit_reprocess(&state, form).await;
    state.prom_metrics.record_mutation("reprocess", result.is_ok());
    result.map(Json)
}

async fn submit_reprocess(
    state: &AppState,
    form: Result<Form<ReprocessForm>, FormRejection>,
) -> Result<MutationResponse, ApiError> {
    let Form(form) = form?;
    let mutation = form.validate()?;
    let receipt = state.db.submit_reprocess(&mutation).await?;

    if mutation.additional_image > 0 && receipt.additional_image_id == 0 {
        warn!(
            additional_image = mutation.additional_image,
            "additional image did not resolve, submitting without it"
        );
    }
    info!(
        setting_id = receipt.setting_id,
        cloud_request_id = receipt.cloud_request_id,
        estimated_position = receipt.queue.estimated_position,
        "reprocess queued"
    );
    Ok(MutationResponse {
        setting_id: receipt.setting_id,
        target: SettingsTarget::Single,
        cloud_request_id: Some(receipt.cloud_request_id),
        queue: Some(receipt.queue),
        message: receipt.queue.message(),
        summary: mutation
            .setting
            .summary_html(receipt.additional_image_name.as_deref()),
    })
}
