//! # Poller — Client Poll Loop
//!
//! Drives a [`Panel`] against a running dashboard. A single task owns the
//! panel and issues one request at a time; there is never more than one poll
//! in flight, so batches are merged in the order the server produced them.
//!
//! ## Cadence
//!
//! | Stream | Interval |
//! |--------|----------|
//! | results | 5s |
//! | processes | 5s |
//! | cloud | 10s, 5s while a download is awaited |
//! | status | 30s while anything is running, 60s when idle |
//!
//! A failed poll is rescheduled with exponential backoff starting at its
//! normal interval and capped at `max_backoff_secs`. Rankings are fetched
//! right after a results poll that moved the cursor. Every delivered download
//! is acknowledged with `POST /api/cloud/{id}/shown`; a failed acknowledgement
//! is logged and the download is offered again after a restart.

use crate::config::PollerConfig;
use crate::merge::{MergeReport, Panel};
use crate::protocol::{
    BeamlineStatus, CloudReport, Cursor, ProcessesBatch, RankingsBatch, ResultsBatch,
};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Where and what to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    /// Base URL of the dashboard, e.g. `http://localhost:8080`.
    pub server: String,
    pub datadir: String,
    pub beamline: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Results,
    Processes,
    Cloud,
    Status,
}

impl Stream {
    pub const ALL: [Stream; 4] = [Stream::Results, Stream::Processes, Stream::Cloud, Stream::Status];

    fn index(self) -> usize {
        match self {
            Stream::Results => 0,
            Stream::Processes => 1,
            Stream::Cloud => 2,
            Stream::Status => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Results => "results",
            Stream::Processes => "processes",
            Stream::Cloud => "cloud",
            Stream::Status => "status",
        }
    }
}

/// What a completed poll produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Results(MergeReport),
    Processes { added: usize },
    Rankings(RankingsBatch),
    Cloud(CloudReport),
    Status(BeamlineStatus),
}

/// Exponential backoff for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    failures: u32,
    max: Duration,
}

impl Backoff {
    pub fn new(max: Duration) -> Self {
        Backoff { failures: 0, max }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Record a failure and return the delay before the next attempt:
    /// `base * 2^(failures - 1)`, capped.
    pub fn fail(&mut self, base: Duration) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let factor = 1u32.checked_shl(self.failures - 1).unwrap_or(u32::MAX);
        base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }
}

/// Next due time for each stream.
#[derive(Debug, Clone)]
pub struct Schedule {
    due: [Instant; 4],
}

impl Schedule {
    /// Everything due immediately.
    pub fn starting_at(now: Instant) -> Self {
        Schedule { due: [now; 4] }
    }

    pub fn set(&mut self, stream: Stream, at: Instant) {
        self.due[stream.index()] = at;
    }

    pub fn due(&self, stream: Stream) -> Instant {
        self.due[stream.index()]
    }

    /// The earliest due stream; ties go to the order of [`Stream::ALL`].
    pub fn next(&self) -> (Stream, Instant) {
        let mut best = (Stream::Results, self.due[0]);
        for stream in Stream::ALL {
            let at = self.due(stream);
            if at < best.1 {
                best = (stream, at);
            }
        }
        best
    }
}

pub struct Poller {
    client: reqwest::Client,
    target: PollTarget,
    config: PollerConfig,
    panel: Panel,
    rankings_cursor: Cursor,
    /// Set when the results cursor moved and rankings have not been fetched since.
    rankings_due: bool,
    cloud_cursor: Cursor,
    awaiting_download: bool,
    backoff: [Backoff; 4],
}

impl Poller {
    pub fn new(target: PollTarget, config: PollerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("building HTTP client")?;
        let backoff = [Backoff::new(config.max_backoff()); 4];
        Ok(Poller {
            client,
            target,
            config,
            panel: Panel::new(),
            rankings_cursor: Cursor::START,
            rankings_due: false,
            cloud_cursor: Cursor::START,
            awaiting_download: false,
            backoff,
        })
    }

    pub fn panel(&self) -> &Panel {
        &self.panel
    }

    pub fn panel_mut(&mut self) -> &mut Panel {
        &mut self.panel
    }

    /// Poll the cloud stream faster until a download arrives.
    pub fn set_awaiting_download(&mut self, awaiting: bool) {
        self.awaiting_download = awaiting;
    }

    /// Normal interval for a stream given the current panel state.
    pub fn interval(&self, stream: Stream) -> Duration {
        match stream {
            Stream::Results => self.config.results_interval(),
            Stream::Processes => self.config.processes_interval(),
            Stream::Cloud => self.config.cloud_interval(self.awaiting_download),
            Stream::Status => self.config.status_interval(self.panel.has_activity()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.target.server.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {}", path))?
            .error_for_status()
            .with_context(|| format!("GET {}", path))?;
        let body = response
            .json::<T>()
            .await
            .with_context(|| format!("decoding {}", path))?;
        Ok(body)
    }

    /// Mark a delivered download as shown so it is not offered again.
    async fn acknowledge_download(&self, cloud_complete_id: i64) -> Result<()> {
        let path = format!("/api/cloud/{}/shown", cloud_complete_id);
        self.client
            .post(self.url(&path))
            .send()
            .await
            .with_context(|| format!("POST {}", path))?
            .error_for_status()
            .with_context(|| format!("POST {}", path))?;
        Ok(())
    }

    /// Run one poll of `stream`, merging its result into the panel.
    pub async fn poll_once(&mut self, stream: Stream) -> Result<Vec<PollEvent>> {
        let datadir = self.target.datadir.clone();
        let mut events = Vec::new();
        match stream {
            Stream::Results => {
                let batch: ResultsBatch = self
                    .get_json(
                        "/api/results",
                        &[("datadir", datadir.clone()), ("cursor", self.panel.cursor().0.to_string())],
                    )
                    .await?;
                let report = self.panel.apply_results(&batch);
                debug!(entries = batch.entries.len(), cursor = batch.cursor.0, "results merged");
                self.rankings_due |= report.ranking_refresh;
                events.push(PollEvent::Results(report));
                if self.rankings_due {
                    // A failed rankings fetch must not discard the merged results.
                    match self
                        .get_json::<RankingsBatch>(
                            "/api/rankings/runs",
                            &[("datadir", datadir), ("cursor", self.rankings_cursor.0.to_string())],
                        )
                        .await
                    {
                        Ok(rankings) => {
                            self.rankings_due = false;
                            self.rankings_cursor = self.rankings_cursor.advance(rankings.cursor);
                            if !rankings.runs.is_empty() {
                                events.push(PollEvent::Rankings(rankings));
                            }
                        }
                        Err(e) => warn!(error = %format!("{:#}", e), "rankings refresh failed, retrying next poll"),
                    }
                }
            }
            Stream::Processes => {
                let batch: ProcessesBatch = self
                    .get_json("/api/processes", &[("datadir", datadir)])
                    .await?;
                let added = self.panel.apply_processes(&batch);
                events.push(PollEvent::Processes { added });
            }
            Stream::Cloud => {
                let report: CloudReport = self
                    .get_json(
                        "/api/cloud",
                        &[
                            ("datadir", datadir),
                            ("ip_address", self.target.ip_address.clone()),
                            ("cursor", self.cloud_cursor.0.to_string()),
                        ],
                    )
                    .await?;
                if let CloudReport::Downloads { downloads, cursor } = &report {
                    self.cloud_cursor = self.cloud_cursor.advance(*cursor);
                    self.awaiting_download = false;
                    for download in downloads {
                        if let Err(e) = self.acknowledge_download(download.cloud_complete_id).await {
                            warn!(
                                cloud_complete_id = download.cloud_complete_id,
                                error = %format!("{:#}", e),
                                "download acknowledgement failed"
                            );
                        }
                    }
                }
                events.push(PollEvent::Cloud(report));
            }
            Stream::Status => {
                let status: BeamlineStatus = self
                    .get_json("/api/status", &[("beamline", self.target.beamline.clone())])
                    .await?;
                events.push(PollEvent::Status(status));
            }
        }
        Ok(events)
    }

    /// Poll until `shutdown` flips to true, handing every event to `on_event`.
    pub async fn run<F>(&mut self, mut shutdown: watch::Receiver<bool>, mut on_event: F) -> Result<()>
    where
        F: FnMut(&Panel, &PollEvent),
    {
        info!(server = %self.target.server, datadir = %self.target.datadir, "poller starting");
        let mut schedule = Schedule::starting_at(Instant::now());

        loop {
            if *shutdown.borrow() {
                break;
            }
            let (stream, at) = schedule.next();
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep_until(at) => {}
            }

            let delay = match self.poll_once(stream).await {
                Ok(events) => {
                    self.backoff[stream.index()].reset();
                    for event in &events {
                        on_event(&self.panel, event);
                    }
                    self.interval(stream)
                }
                Err(e) => {
                    let base = self.interval(stream);
                    let delay = self.backoff[stream.index()].fail(base);
                    warn!(
                        stream = stream.as_str(),
                        failures = self.backoff[stream.index()].failures(),
                        retry_in_secs = delay.as_secs(),
                        error = %format!("{:#}", e),
                        "poll failed"
                    );
                    delay
                }
            };
            schedule.set(stream, Instant::now() + delay);
        }

        info!("poller stopped");
        Ok(())
    }
}
