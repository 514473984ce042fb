//! # Settings — Mutation Payload Validation
//!
//! Form payloads for the settings and reprocess endpoints arrive as flat
//! string maps. This module checks them against the `settings` schema
//! before anything is written: numeric columns must parse as finite
//! numbers, required keys must be present, and closed vocabularies
//! (`form_type`, `setting_type`) are turned into enums.
//!
//! The pipeline's literal `'None'` and empty strings both mean "not set".

use crate::error::ApiError;
use serde::{Deserialize, Serialize};

/// Raw processing parameters shared by both mutation forms.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingParams {
    pub multiprocessing: Option<String>,
    pub spacegroup: Option<String>,
    pub sample_type: Option<String>,
    pub solvent_content: Option<String>,
    pub susceptibility: Option<String>,
    pub crystal_size_x: Option<String>,
    pub crystal_size_y: Option<String>,
    pub crystal_size_z: Option<String>,
    pub a: Option<String>,
    pub b: Option<String>,
    pub c: Option<String>,
    pub alpha: Option<String>,
    pub beta: Option<String>,
    pub gamma: Option<String>,
    pub work_dir_override: Option<String>,
    pub work_directory: Option<String>,
    pub beam_flip: Option<String>,
    pub x_beam: Option<String>,
    pub y_beam: Option<String>,
    pub index_hi_res: Option<String>,
    pub strategy_type: Option<String>,
    pub best_complexity: Option<String>,
    pub mosflm_seg: Option<String>,
    pub mosflm_rot: Option<String>,
    pub min_exposure_per: Option<String>,
    pub aimed_res: Option<String>,
    pub beam_size_x: Option<String>,
    pub beam_size_y: Option<String>,
    pub integrate: Option<String>,
}

/// `POST /api/settings` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsForm {
    pub form_type: Option<String>,
    pub beamline: Option<String>,
    pub data_dir: Option<String>,
    pub reference_data_id: Option<String>,
    #[serde(flatten)]
    pub params: SettingParams,
}

/// `POST /api/reprocess` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReprocessForm {
    pub beamline: Option<String>,
    pub data_root_dir: Option<String>,
    pub reference_data: Option<String>,
    pub additional_image: Option<String>,
    pub request_type: Option<String>,
    pub original_result_id: Option<String>,
    pub original_type: Option<String>,
    pub original_id: Option<String>,
    pub ip_address: Option<String>,
    #[serde(flatten)]
    pub params: SettingParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SettingType {
    Single,
    Global,
}

impl SettingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::Single => "SINGLE",
            SettingType::Global => "GLOBAL",
        }
    }
}

/// Where a global setting is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormType {
    /// `naive` or `preset`: a dormant directory default.
    Preset,
    /// The live experiment on a beamline.
    Current,
}

impl FormType {
    pub fn parse(value: Option<&str>) -> Result<Self, ApiError> {
        match value.map(str::trim) {
            Some("naive") | Some("preset") => Ok(FormType::Preset),
            Some("current") => Ok(FormType::Current),
            Some(other) => Err(ApiError::InvalidInput(format!(
                "form_type: expected naive, preset or current, got '{}'",
                other
            ))),
            None => Err(ApiError::InvalidInput("form_type: required".into())),
        }
    }
}

/// A validated row for the `settings` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSetting {
    pub beamline: String,
    pub data_root_dir: String,
    pub multiprocessing: Option<String>,
    pub spacegroup: Option<String>,
    pub sample_type: Option<String>,
    pub solvent_content: Option<f64>,
    pub susceptibility: Option<f64>,
    pub crystal_size_x: Option<f64>,
    pub crystal_size_y: Option<f64>,
    pub crystal_size_z: Option<f64>,
    pub a: Option<f64>,
    pub b: Option<f64>,
    pub c: Option<f64>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
    pub work_dir_override: Option<String>,
    pub work_directory: Option<String>,
    pub beam_flip: Option<String>,
    pub x_beam: Option<f64>,
    pub y_beam: Option<f64>,
    pub index_hi_res: Option<f64>,
    pub strategy_type: Option<String>,
    pub best_complexity: Option<String>,
    pub mosflm_seg: Option<String>,
    pub mosflm_rot: Option<String>,
    pub min_exposure_per: Option<f64>,
    pub aimed_res: Option<f64>,
    pub beam_size_x: Option<String>,
    pub beam_size_y: Option<String>,
    pub integrate: Option<String>,
    pub reference_data_id: Option<i64>,
    pub setting_type: SettingType,
}

/// A validated global settings submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsMutation {
    pub form_type: FormType,
    pub setting: NewSetting,
}

/// A validated reprocess submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ReprocessMutation {
    pub setting: NewSetting,
    /// `single_results` id of an extra image to pair with; 0 for none.
    pub additional_image: i64,
    pub request: CloudRequestFields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloudRequestFields {
    pub request_type: String,
    pub original_result_id: Option<i64>,
    pub original_type: Option<String>,
    pub original_id: Option<i64>,
    pub data_root_dir: String,
    pub ip_address: Option<String>,
}

fn is_unset(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v == "None"
}

fn text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !is_unset(v))
        .map(|v| v.trim().to_string())
}

fn required(field: &str, value: &Option<String>) -> Result<String, ApiError> {
    text(value).ok_or_else(|| ApiError::InvalidInput(format!("{}: required", field)))
}

fn number(field: &str, value: &Option<String>) -> Result<Option<f64>, ApiError> {
    let Some(raw) = text(value) else {
        return Ok(None);
    };
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(ApiError::InvalidInput(format!(
            "{}: '{}' is not a number",
            field, raw
        ))),
    }
}

fn integer(field: &str, value: &Option<String>) -> Result<Option<i64>, ApiError> {
    let Some(raw) = text(value) else {
        return Ok(None);
    };
    raw.parse::<i64>()
        .map(Some)
        .map_err(|_| ApiError::InvalidInput(format!("{}: '{}' is not an integer", field, raw)))
}

impl SettingParams {
    fn into_setting(
        &self,
        beamline: String,
        data_root_dir: String,
        reference_data_id: Option<i64>,
        setting_type: SettingType,
    ) -> Result<NewSetting, ApiError> {
        Ok(NewSetting {
            beamline,
            data_root_dir,
            multiprocessing: text(&self.multiprocessing),
            spacegroup: text(&self.spacegroup),
            sample_type: text(&self.sample_type),
            solvent_content: number("solvent_content", &self.solvent_content)?,
            susceptibility: number("susceptibility", &self.susceptibility)?,
            crystal_size_x: number("crystal_size_x", &self.crystal_size_x)?,
            crystal_size_y: number("crystal_size_y", &self.crystal_size_y)?,
            crystal_size_z: number("crystal_size_z", &self.crystal_size_z)?,
            a: number("a", &self.a)?,
            b: number("b", &self.b)?,
            c: number("c", &self.c)?,
            alpha: number("alpha", &self.alpha)?,
            beta: number("beta", &self.beta)?,
            gamma: number("gamma", &self.gamma)?,
            work_dir_override: text(&self.work_dir_override),
            work_directory: text(&self.work_directory),
            beam_flip: text(&self.beam_flip),
            x_beam: number("x_beam", &self.x_beam)?,
            y_beam: number("y_beam", &self.y_beam)?,
            index_hi_res: number("index_hi_res", &self.index_hi_res)?,
            strategy_type: text(&self.strategy_type),
            best_complexity: text(&self.best_complexity),
            mosflm_seg: text(&self.mosflm_seg),
            mosflm_rot: text(&self.mosflm_rot),
            min_exposure_per: number("min_exposure_per", &self.min_exposure_per)?,
            aimed_res: number("aimed_res", &self.aimed_res)?,
            beam_size_x: text(&self.beam_size_x),
            beam_size_y: text(&self.beam_size_y),
            integrate: text(&self.integrate),
            reference_data_id,
            setting_type,
        })
    }
}

impl SettingsForm {
    pub fn validate(&self) -> Result<SettingsMutation, ApiError> {
        let form_type = FormType::parse(self.form_type.as_deref())?;
        let beamline = required("beamline", &self.beamline)?;
        let data_dir = required("data_dir", &self.data_dir)?;
        let reference = integer("reference_data_id", &self.reference_data_id)?;
        let setting = self
            .params
            .into_setting(beamline, data_dir, reference, SettingType::Global)?;
        Ok(SettingsMutation { form_type, setting })
    }
}

impl ReprocessForm {
    pub fn validate(&self) -> Result<ReprocessMutation, ApiError> {
        let beamline = required("beamline", &self.beamline)?;
        let data_root_dir = required("data_root_dir", &self.data_root_dir)?;
        let reference = integer("reference_data", &self.reference_data)?;
        let additional_image = integer("additional_image", &self.additional_image)?
            .unwrap_or(0)
            .max(0);
        let request = CloudRequestFields {
            request_type: required("request_type", &self.request_type)?,
            original_result_id: integer("original_result_id", &self.original_result_id)?,
            original_type: text(&self.original_type),
            original_id: integer("original_id", &self.original_id)?,
            data_root_dir: data_root_dir.clone(),
            ip_address: text(&self.ip_address),
        };
        let setting =
            self.params
                .into_setting(beamline, data_root_dir, reference, SettingType::Single)?;
        Ok(ReprocessMutation {
            setting,
            additional_image,
            request,
        })
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn show_text(v: &Option<String>) -> String {
    v.as_deref().map(escape_html).unwrap_or_default()
}

fn show_number(v: Option<f64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

impl NewSetting {
    /// Render the user-visible subset of the written values as an HTML table.
    pub fn summary_html(&self, additional_image: Option<&str>) -> String {
        let mut rows: Vec<(&str, String)> = vec![
            ("Multiprocessing", show_text(&self.multiprocessing)),
            ("Spacegroup Override", show_text(&self.spacegroup)),
            ("Sample Type", show_text(&self.sample_type)),
            ("Solvent Fraction", show_number(self.solvent_content)),
            ("Flip Beam Coordinates", show_text(&self.beam_flip)),
            ("Override X Beam", show_number(self.x_beam)),
            ("Override Y Beam", show_number(self.y_beam)),
            ("Strategy Type", show_text(&self.strategy_type)),
            ("Strategy Complexity", show_text(&self.best_complexity)),
            ("Mosflm Segments", show_text(&self.mosflm_seg)),
            ("Mosflm Rotation", show_text(&self.mosflm_rot)),
            ("Integrate", show_text(&self.integrate)),
        ];
        if let Some(image) = additional_image {
            rows.push(("Additional Image", escape_html(image)));
        }
        let mut html = String::from("<table>\n");
        for (label, value) in rows {
            html.push_str(&format!(
                "  <tr><td align=right width=250>{}:&nbsp;</td><td align=left>{}</td></tr>\n",
                label, value
            ));
        }
        html.push_str("</table>\n");
        html
    }
}
