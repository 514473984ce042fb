//! # Database — PostgreSQL Storage Layer
//!
//! Async access to the RAPD result store via `sqlx::PgPool`. Handlers never
//! see raw rows: text flags (`display`, `solved`, the pipeline's `'None'`)
//! are converted here, once, into the typed records in [`crate::protocol`].
//!
//! ## Schema
//!
//! - `results` + six per-kind detail tables, with a `seq` column drawn from
//!   the per-directory `result_cursor` counter on every change (the poll cursor)
//! - `processes`: in-flight placeholders
//! - `settings`, `current`, `presets`: processing parameter bundles
//! - `cloud_requests`, `cloud_state`, `cloud_current`, `cloud_complete`
//! - `status_dataserver`, `status_controller`, `status_cluster`: heartbeats
//!
//! ## Module Structure
//!
//! - [`results`]: incremental result polling and hide operations
//! - [`processes`]: pending process placeholders
//! - [`settings`]: settings inserts and pointer upserts
//! - [`cloud`]: reprocess requests, queue counters, downloads
//! - [`status`]: heartbeat ages
//! - [`rankings`]: integrated-run ranking rows
//!
//! ## Retries
//!
//! Read paths go through [`Database::with_retry`], which repeats the query
//! when [`is_transient`] says the failure was the pool or the connection
//! rather than the statement. Writes are never retried.

mod cloud;
mod processes;
mod rankings;
mod results;
mod settings;
mod status;

pub use results::HideScope;

use crate::classify::{classify, DetailStatus, RawStatus, ResultKind, Staleness, Subtype};
use crate::config::DatabaseConfig;
use crate::protocol::{EntryCommon, ResultEntry};
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::warn;

// ── Row types ───────────────────────────────────────────────────

/// A `results` row joined with whichever detail table its `kind` names.
/// Every detail column is optional: the join may not resolve.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResultRow {
    pub result_id: i64,
    pub kind: String,
    pub process_id: i64,
    pub display: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub seq: i64,
    pub detail_found: bool,
    pub repr: Option<String>,
    pub subtype: Option<String>,
    pub best_norm_status: Option<String>,
    pub mosflm_norm_status: Option<String>,
    pub summary_stac: Option<String>,
    pub status: Option<String>,
    pub solved: Option<String>,
    pub download_file: Option<String>,
    pub age_secs: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessRow {
    pub process_id: i64,
    pub kind: String,
    pub display: String,
    pub repr: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CloudStateRow {
    pub remote_concurrent_allowed: i32,
    pub current_queue: i32,
    pub processing: bool,
    pub download: bool,
    pub remote_processing: bool,
    pub remote_download: bool,
}

/// `'None'`, empty and NULL all mean the column was never filled in.
pub(crate) fn present(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some(v) if !v.is_empty() && v != "None")
}

pub(crate) fn is_visible(display: &str) -> bool {
    display != "hide"
}

impl ResultRow {
    /// Decode the detail columns, or `None` if the detail join missed.
    pub fn detail_status(&self, kind: ResultKind) -> Option<DetailStatus> {
        if !self.detail_found {
            return None;
        }
        let status = RawStatus::parse(self.status.as_deref());
        let age_secs = self.age_secs.unwrap_or(0);
        Some(match kind {
            ResultKind::Single | ResultKind::Pair => DetailStatus::Snap {
                best: RawStatus::parse(self.best_norm_status.as_deref()),
                mosflm: RawStatus::parse(self.mosflm_norm_status.as_deref()),
                has_stac: present(self.summary_stac.as_deref()),
                subtype: Subtype::parse(self.subtype.as_deref()),
            },
            ResultKind::Integrate => DetailStatus::Integrate {
                status,
                subtype: Subtype::parse(self.subtype.as_deref()),
                age_secs,
            },
            ResultKind::Merge => DetailStatus::Merge { status, age_secs },
            ResultKind::Sad => DetailStatus::Sad { status, age_secs },
            ResultKind::Mr => DetailStatus::Mr { status, age_secs },
        })
    }

    /// Classify and convert into the wire entry.
    pub fn into_entry(self, staleness: &Staleness) -> Result<ResultEntry> {
        let kind: ResultKind = self.kind.parse()?;
        let detail = self.detail_status(kind);
        let label = classify(detail.as_ref(), staleness);
        let repr = match (&detail, self.repr.as_deref()) {
            (Some(_), Some(r)) => r.to_string(),
            (Some(_), None) => String::new(),
            (None, _) => "Error".to_string(),
        };
        let solved = self.solved.as_deref() == Some("Yes");
        let has_download = present(self.download_file.as_deref());
        let common = EntryCommon {
            result_id: self.result_id,
            process_id: self.process_id,
            visible: is_visible(&self.display),
            repr,
            label,
            timestamp: self.timestamp,
            seq: self.seq,
        };
        Ok(ResultEntry::new(kind, common, solved, has_download))
    }
}

// ── Error classification ────────────────────────────────────────

/// True when `err` (or anything in its cause chain) is a sqlx failure that
/// may succeed on retry: pool exhaustion, a dropped connection, or a
/// serialization/deadlock abort.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| match cause.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)) => true,
        Some(sqlx::Error::Database(db)) => {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    })
}

// ── Database struct and connection ──────────────────────────────

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    retry: RetryPolicy,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// The URL is parsed by hand so percent-encoded credentials and pooler
    /// usernames containing dots survive intact.
    pub async fn connect(database_url: &str, config: &DatabaseConfig) -> Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(opts)
            .await?;
        Ok(Database {
            pool,
            retry: RetryPolicy {
                attempts: config.read_retries.max(1),
                delay: Duration::from_millis(config.retry_delay_ms),
            },
        })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check: execute `SELECT 1` to verify database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Run an idempotent read, retrying transient failures with a linearly
    /// growing delay.
    pub(crate) async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry.attempts && is_transient(&e) => {
                    warn!(query = what, attempt, error = %e, "transient database error, retrying");
                    tokio::time::sleep(self.retry.delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
