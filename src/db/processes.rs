//! Pending process placeholders.
//!
//! The pipeline registers a `processes` row when it starts a job and a
//! `results` row when the job produces output. Until then the panel shows a
//! placeholder, so only processes without a matching result are returned.

use super::{is_visible, Database, ProcessRow};
use crate::classify::ResultKind;
use crate::protocol::{ProcessEntry, ProcessesBatch};
use anyhow::Result;
use tracing::warn;

impl Database {
    async fn fetch_pending_processes(&self, data_root_dir: &str) -> Result<Vec<ProcessRow>> {
        let rows = sqlx::query_as::<_, ProcessRow>(
            "SELECT p.process_id, p.kind, p.display, p.repr, p.timestamp
             FROM processes p
             WHERE p.data_root_dir = $1
               AND NOT EXISTS (SELECT 1 FROM results r WHERE r.process_id = p.process_id)
             ORDER BY p.timestamp DESC, p.process_id DESC",
        )
        .bind(data_root_dir)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// In-flight processes for a directory, newest first.
    pub async fn pending_processes(&self, data_root_dir: &str) -> Result<ProcessesBatch> {
        let rows = self
            .with_retry("pending_processes", || self.fetch_pending_processes(data_root_dir))
            .await?;
        let mut processes = Vec::with_capacity(rows.len());
        for row in rows {
            match row.kind.parse::<ResultKind>() {
                Ok(kind) => processes.push(ProcessEntry {
                    process_id: row.process_id,
                    kind,
                    visible: is_visible(&row.display),
                    repr: row.repr,
                    timestamp: row.timestamp,
                }),
                Err(e) => warn!(process_id = row.process_id, error = %e, "skipping process row"),
            }
        }
        Ok(ProcessesBatch { processes })
    }
}
