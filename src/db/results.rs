//! Incremental result polling and visibility changes.
//!
//! A poll returns every result row for a directory whose `seq` is greater
//! than the client's cursor. `seq` is drawn by trigger from the directory's
//! `result_cursor` counter on every write to the result or its detail row,
//! so status changes and hides show up in the next poll without the client
//! re-reading anything. The counter row stays locked until the writer
//! commits, which keeps `seq` order equal to commit order per directory.
//!
//! Ages are whole seconds, truncated.

use super::{Database, ResultRow};
use crate::classify::Staleness;
use crate::protocol::{Cursor, ResultsBatch};
use anyhow::Result;
use serde::Deserialize;
use tracing::warn;

const RESULTS_SINCE_SQL: &str = "
    SELECT r.result_id, r.kind, r.process_id, r.display, r.timestamp, r.seq,
           (s.single_result_id IS NOT NULL OR p.pair_result_id IS NOT NULL
             OR i.integrate_result_id IS NOT NULL OR m.merge_result_id IS NOT NULL
             OR sd.sad_result_id IS NOT NULL OR mr.mr_result_id IS NOT NULL) AS detail_found,
           COALESCE(s.repr, p.repr, i.repr, m.repr, sd.repr, mr.repr) AS repr,
           COALESCE(s.type, p.type, i.type) AS subtype,
           COALESCE(s.best_norm_status, p.best_norm_status) AS best_norm_status,
           COALESCE(s.mosflm_norm_status, p.mosflm_norm_status) AS mosflm_norm_status,
           COALESCE(s.summary_stac, p.summary_stac) AS summary_stac,
           COALESCE(i.integrate_status, m.merge_status, sd.sad_status, mr.mr_status) AS status,
           COALESCE(i.solved, m.solved) AS solved,
           sd.download_file,
           FLOOR(EXTRACT(EPOCH FROM (NOW() - COALESCE(i.timestamp, m.timestamp, sd.timestamp,
                                                      mr.timestamp, r.timestamp))))::BIGINT AS age_secs
    FROM results r
    LEFT JOIN single_results s    ON r.kind = 'single'    AND s.single_result_id = r.id
    LEFT JOIN pair_results p      ON r.kind = 'pair'      AND p.pair_result_id = r.id
    LEFT JOIN integrate_results i ON r.kind = 'integrate' AND i.integrate_result_id = r.id
    LEFT JOIN merge_results m     ON r.kind = 'merge'     AND m.merge_result_id = r.id
    LEFT JOIN sad_results sd      ON r.kind = 'sad'       AND sd.sad_result_id = r.id
    LEFT JOIN mr_results mr       ON r.kind = 'mr'        AND mr.mr_result_id = r.id
    WHERE r.data_root_dir = $1 AND r.seq > $2
    ORDER BY r.seq ASC";

/// Which result containers a bulk hide applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HideScope {
    Snaps,
    Runs,
    All,
}

impl HideScope {
    pub fn kinds(&self) -> &'static [&'static str] {
        match self {
            HideScope::Snaps => &["single", "pair"],
            HideScope::Runs => &["integrate", "merge"],
            HideScope::All => &["single", "pair", "integrate", "merge", "sad", "mr"],
        }
    }
}

impl Database {
    async fn fetch_result_rows(&self, data_root_dir: &str, cursor: Cursor) -> Result<Vec<ResultRow>> {
        let rows = sqlx::query_as::<_, ResultRow>(RESULTS_SINCE_SQL)
            .bind(data_root_dir)
            .bind(cursor.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Every result for `data_root_dir` changed since `cursor`, classified.
    ///
    /// The returned cursor is the largest `seq` in the batch, or the input
    /// cursor when nothing changed.
    pub async fn results_since(
        &self,
        data_root_dir: &str,
        cursor: Cursor,
        staleness: &Staleness,
    ) -> Result<ResultsBatch> {
        let rows = self
            .with_retry("results_since", || self.fetch_result_rows(data_root_dir, cursor))
            .await?;

        let mut next = cursor;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            next = next.advance(Cursor(row.seq));
            let result_id = row.result_id;
            match row.into_entry(staleness) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(result_id, error = %e, "skipping unreadable result row"),
            }
        }
        Ok(ResultsBatch {
            entries,
            cursor: next,
        })
    }

    /// Hide one result. Returns false if no such result exists.
    pub async fn hide_result(&self, result_id: i64) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE results SET display = 'hide' WHERE result_id = $1 AND display <> 'hide'",
        )
        .bind(result_id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() > 0 {
            return Ok(true);
        }
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM results WHERE result_id = $1)")
                .bind(result_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Hide every visible result of the scope's kinds in a directory.
    /// Returns the number of rows changed.
    pub async fn hide_results(&self, data_root_dir: &str, scope: HideScope) -> Result<u64> {
        let kinds: Vec<String> = scope.kinds().iter().map(|k| k.to_string()).collect();
        let done = sqlx::query(
            "UPDATE results SET display = 'hide'
             WHERE data_root_dir = $1 AND kind = ANY($2) AND display <> 'hide'",
        )
        .bind(data_root_dir)
        .bind(&kinds)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }
}
