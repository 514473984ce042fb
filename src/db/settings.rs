//! Settings bundles and the pointer tables that select them.
//!
//! A settings row is written once and never updated. `presets` (keyed by
//! directory) and `current` (keyed by beamline) point at the latest bundle;
//! both are upserted in the same transaction as the insert so a failure
//! leaves neither half behind.

use super::Database;
use crate::settings::{FormType, NewSetting, SettingsMutation};
use anyhow::Result;
use sqlx::PgConnection;

/// Insert a settings row and return its id.
pub(crate) async fn insert_setting(conn: &mut PgConnection, s: &NewSetting) -> Result<i64> {
    let setting_id: i64 = sqlx::query_scalar(
        "INSERT INTO settings (
            beamline, data_root_dir, multiprocessing, spacegroup, sample_type,
            solvent_content, susceptibility, crystal_size_x, crystal_size_y, crystal_size_z,
            a, b, c, alpha, beta, gamma,
            work_dir_override, work_directory, beam_flip, x_beam, y_beam,
            index_hi_res, strategy_type, best_complexity, mosflm_seg, mosflm_rot,
            min_exposure_per, aimed_res, beam_size_x, beam_size_y, integrate,
            reference_data_id, setting_type)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                 $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30,
                 $31, $32, $33)
         RETURNING setting_id",
    )
    .bind(&s.beamline)
    .bind(&s.data_root_dir)
    .bind(&s.multiprocessing)
    .bind(&s.spacegroup)
    .bind(&s.sample_type)
    .bind(s.solvent_content)
    .bind(s.susceptibility)
    .bind(s.crystal_size_x)
    .bind(s.crystal_size_y)
    .bind(s.crystal_size_z)
    .bind(s.a)
    .bind(s.b)
    .bind(s.c)
    .bind(s.alpha)
    .bind(s.beta)
    .bind(s.gamma)
    .bind(&s.work_dir_override)
    .bind(&s.work_directory)
    .bind(&s.beam_flip)
    .bind(s.x_beam)
    .bind(s.y_beam)
    .bind(s.index_hi_res)
    .bind(&s.strategy_type)
    .bind(&s.best_complexity)
    .bind(&s.mosflm_seg)
    .bind(&s.mosflm_rot)
    .bind(s.min_exposure_per)
    .bind(s.aimed_res)
    .bind(&s.beam_size_x)
    .bind(&s.beam_size_y)
    .bind(&s.integrate)
    .bind(s.reference_data_id)
    .bind(s.setting_type.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(setting_id)
}

impl Database {
    /// Insert a GLOBAL setting and point `presets` or `current` at it.
    pub async fn apply_settings(&self, mutation: &SettingsMutation) -> Result<i64> {
        let s = &mutation.setting;
        let mut tx = self.pool.begin().await?;
        let setting_id = insert_setting(&mut tx, s).await?;

        match mutation.form_type {
            FormType::Preset => {
                sqlx::query(
                    "INSERT INTO presets (data_root_dir, beamline, setting_id, timestamp)
                     VALUES ($1, $2, $3, NOW())
                     ON CONFLICT (data_root_dir) DO UPDATE SET
                       beamline = EXCLUDED.beamline, setting_id = EXCLUDED.setting_id,
                       timestamp = NOW()",
                )
                .bind(&s.data_root_dir)
                .bind(&s.beamline)
                .bind(setting_id)
                .execute(&mut *tx)
                .await?;
            }
            FormType::Current => {
                sqlx::query(
                    "INSERT INTO current (beamline, data_root_dir, setting_id, timestamp)
                     VALUES ($1, $2, $3, NOW())
                     ON CONFLICT (beamline) DO UPDATE SET
                       data_root_dir = EXCLUDED.data_root_dir, setting_id = EXCLUDED.setting_id,
                       timestamp = NOW()",
                )
                .bind(&s.beamline)
                .bind(&s.data_root_dir)
                .bind(setting_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(setting_id)
    }

    /// The setting `current` points at for a beamline, if any.
    pub async fn current_setting_id(&self, beamline: &str) -> Result<Option<i64>> {
        let id: Option<Option<i64>> =
            sqlx::query_scalar("SELECT setting_id FROM current WHERE beamline = $1")
                .bind(beamline)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id.flatten())
    }

    /// The setting `presets` points at for a directory, if any.
    pub async fn preset_setting_id(&self, data_root_dir: &str) -> Result<Option<i64>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT setting_id FROM presets WHERE data_root_dir = $1")
                .bind(data_root_dir)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }
}
