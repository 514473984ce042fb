//! Cloud dispatcher queue: reprocess submissions, counters, and downloads.
//!
//! ## Reprocess submission
//!
//! One transaction inserts a SINGLE setting, resolves the optional extra
//! image to an `images.image_id`, reads the dispatcher counters for a queue
//! estimate, and enqueues a `cloud_requests` row with `status = 'request'`.
//! The estimate is advisory only: the dispatcher may reorder at any time.

use super::settings::insert_setting;
use super::{CloudStateRow, Database};
use crate::protocol::{CloudDownload, CloudReport, Cursor, Network, QueueEstimate};
use crate::settings::ReprocessMutation;
use anyhow::{Context, Result};
use sqlx::PgConnection;

/// Outcome of a committed reprocess submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ReprocessReceipt {
    pub setting_id: i64,
    pub cloud_request_id: i64,
    pub additional_image_id: i64,
    /// `fullname` of the additional image, when it resolved.
    pub additional_image_name: Option<String>,
    pub queue: QueueEstimate,
}

#[derive(sqlx::FromRow)]
struct ImageKey {
    fullname: Option<String>,
    adsc_number: Option<String>,
}

#[derive(sqlx::FromRow)]
struct DownloadRow {
    cloud_complete_id: i64,
    request_type: String,
    result_id: Option<i64>,
    archive: Option<String>,
}

/// Map a `single_results` id to the `images` row for the same frame.
/// Returns `(0, None)` when either lookup misses.
async fn resolve_additional_image(
    conn: &mut PgConnection,
    single_result_id: i64,
) -> Result<(i64, Option<String>)> {
    if single_result_id <= 0 {
        return Ok((0, None));
    }
    let key = sqlx::query_as::<_, ImageKey>(
        "SELECT fullname, adsc_number FROM single_results WHERE single_result_id = $1",
    )
    .bind(single_result_id)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(ImageKey {
        fullname: Some(fullname),
        adsc_number: Some(adsc_number),
    }) = key
    else {
        return Ok((0, None));
    };
    let image_id: Option<i64> =
        sqlx::query_scalar("SELECT image_id FROM images WHERE fullname = $1 AND adsc_number = $2")
            .bind(&fullname)
            .bind(&adsc_number)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(match image_id {
        Some(id) => (id, Some(fullname)),
        None => (0, None),
    })
}

async fn read_cloud_state(conn: &mut PgConnection) -> Result<CloudStateRow> {
    let state = sqlx::query_as::<_, CloudStateRow>(
        "SELECT remote_concurrent_allowed, current_queue, processing, download,
                remote_processing, remote_download
         FROM cloud_state WHERE id = 1",
    )
    .fetch_optional(&mut *conn)
    .await?
    .context("cloud_state row is missing")?;
    Ok(state)
}

async fn queue_estimate(conn: &mut PgConnection) -> Result<QueueEstimate> {
    let state = read_cloud_state(conn).await?;
    let occupied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cloud_current")
        .fetch_one(&mut *conn)
        .await?;
    Ok(QueueEstimate::from_counters(
        i64::from(state.current_queue),
        occupied,
        i64::from(state.remote_concurrent_allowed),
    ))
}

impl Database {
    /// Record a reprocess request and enqueue it for the dispatcher.
    pub async fn submit_reprocess(&self, mutation: &ReprocessMutation) -> Result<ReprocessReceipt> {
        let mut tx = self.pool.begin().await?;
        let setting_id = insert_setting(&mut tx, &mutation.setting).await?;
        let (additional_image_id, additional_image_name) =
            resolve_additional_image(&mut tx, mutation.additional_image).await?;
        let queue = queue_estimate(&mut tx).await?;

        let r = &mutation.request;
        let cloud_request_id: i64 = sqlx::query_scalar(
            "INSERT INTO cloud_requests (request_type, original_result_id, original_type,
                                         original_id, data_root_dir, ip_address,
                                         additional_image, new_setting_id, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'request')
             RETURNING cloud_request_id",
        )
        .bind(&r.request_type)
        .bind(r.original_result_id)
        .bind(&r.original_type)
        .bind(r.original_id)
        .bind(&r.data_root_dir)
        .bind(&r.ip_address)
        .bind(additional_image_id)
        .bind(setting_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ReprocessReceipt {
            setting_id,
            cloud_request_id,
            additional_image_id,
            additional_image_name,
            queue,
        })
    }

    async fn fetch_downloads(
        &self,
        data_root_dir: &str,
        ip_address: &str,
        cursor: Cursor,
    ) -> Result<Vec<DownloadRow>> {
        let rows = sqlx::query_as::<_, DownloadRow>(
            "SELECT cloud_complete_id, request_type, result_id, archive
             FROM cloud_complete
             WHERE status = 'new' AND ip_address = $1 AND data_root_dir = $2
               AND cloud_complete_id > $3
             ORDER BY cloud_complete_id ASC",
        )
        .bind(ip_address)
        .bind(data_root_dir)
        .bind(cursor.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn fetch_cloud_state(&self) -> Result<CloudStateRow> {
        let mut conn = self.pool.acquire().await?;
        read_cloud_state(&mut conn).await
    }

    /// New finished downloads for this client, or the availability report
    /// for its network when there are none.
    pub async fn cloud_report(
        &self,
        data_root_dir: &str,
        ip_address: &str,
        cursor: Cursor,
        local: bool,
    ) -> Result<CloudReport> {
        let rows = self
            .with_retry("cloud_downloads", || {
                self.fetch_downloads(data_root_dir, ip_address, cursor)
            })
            .await?;
        if !rows.is_empty() {
            let next = rows
                .iter()
                .fold(cursor, |c, r| c.advance(Cursor(r.cloud_complete_id)));
            let downloads = rows
                .into_iter()
                .map(|r| CloudDownload {
                    cloud_complete_id: r.cloud_complete_id,
                    request_type: r.request_type,
                    result_id: r.result_id,
                    archive: r.archive,
                })
                .collect();
            return Ok(CloudReport::Downloads {
                downloads,
                cursor: next,
            });
        }

        let state = self
            .with_retry("cloud_state", || self.fetch_cloud_state())
            .await?;
        Ok(if local {
            CloudReport::Availability {
                network: Network::Local,
                download: state.download,
                processing: state.processing,
            }
        } else {
            CloudReport::Availability {
                network: Network::Remote,
                download: state.remote_download,
                processing: state.remote_processing,
            }
        })
    }

    /// Mark a finished download as shown. Returns false if no such row.
    pub async fn mark_download_shown(&self, cloud_complete_id: i64) -> Result<bool> {
        let done = sqlx::query("UPDATE cloud_complete SET status = 'shown' WHERE cloud_complete_id = $1")
            .bind(cloud_complete_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
