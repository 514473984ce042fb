//! # Protocol — Poll and Mutation Wire Types
//!
//! Named-field JSON records exchanged between the dashboard endpoints and the
//! polling client. Both sides share these types so the positional layout of
//! the old panel never reappears.
//!
//! ## Cursors
//!
//! A [`Cursor`] is the highest `results.seq` a client has seen. The server
//! only returns rows with a larger `seq`, and the cursor in a response is
//! never smaller than the one in the request.

use crate::classify::{Label, ResultKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last-seen sequence value. `Cursor(0)` fetches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub i64);

impl Cursor {
    pub const START: Cursor = Cursor(0);

    /// The larger of the two cursors.
    pub fn advance(self, other: Cursor) -> Cursor {
        self.max(other)
    }
}

/// Fields every result entry carries regardless of kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryCommon {
    pub result_id: i64,
    pub process_id: i64,
    pub visible: bool,
    pub repr: String,
    pub label: Label,
    pub timestamp: DateTime<Utc>,
    pub seq: i64,
}

/// One polled result, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResultEntry {
    Single {
        #[serde(flatten)]
        common: EntryCommon,
    },
    Pair {
        #[serde(flatten)]
        common: EntryCommon,
    },
    Integrate {
        #[serde(flatten)]
        common: EntryCommon,
        solved: bool,
    },
    Merge {
        #[serde(flatten)]
        common: EntryCommon,
        solved: bool,
    },
    Sad {
        #[serde(flatten)]
        common: EntryCommon,
        has_download: bool,
    },
    Mr {
        #[serde(flatten)]
        common: EntryCommon,
    },
}

impl ResultEntry {
    pub fn common(&self) -> &EntryCommon {
        match self {
            ResultEntry::Single { common }
            | ResultEntry::Pair { common }
            | ResultEntry::Integrate { common, .. }
            | ResultEntry::Merge { common, .. }
            | ResultEntry::Sad { common, .. }
            | ResultEntry::Mr { common } => common,
        }
    }

    pub fn kind(&self) -> ResultKind {
        match self {
            ResultEntry::Single { .. } => ResultKind::Single,
            ResultEntry::Pair { .. } => ResultKind::Pair,
            ResultEntry::Integrate { .. } => ResultKind::Integrate,
            ResultEntry::Merge { .. } => ResultKind::Merge,
            ResultEntry::Sad { .. } => ResultKind::Sad,
            ResultEntry::Mr { .. } => ResultKind::Mr,
        }
    }

    /// Build the kind-specific variant from its parts.
    pub fn new(kind: ResultKind, common: EntryCommon, solved: bool, has_download: bool) -> Self {
        match kind {
            ResultKind::Single => ResultEntry::Single { common },
            ResultKind::Pair => ResultEntry::Pair { common },
            ResultKind::Integrate => ResultEntry::Integrate { common, solved },
            ResultKind::Merge => ResultEntry::Merge { common, solved },
            ResultKind::Sad => ResultEntry::Sad {
                common,
                has_download,
            },
            ResultKind::Mr => ResultEntry::Mr { common },
        }
    }
}

/// Response body of `GET /api/results`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsBatch {
    pub entries: Vec<ResultEntry>,
    pub cursor: Cursor,
}

/// An in-flight job that has no result row yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub process_id: i64,
    pub kind: ResultKind,
    pub visible: bool,
    pub repr: String,
    pub timestamp: DateTime<Utc>,
}

/// Response body of `GET /api/processes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessesBatch {
    pub processes: Vec<ProcessEntry>,
}

/// A finished cloud download waiting to be picked up by the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudDownload {
    pub cloud_complete_id: i64,
    pub request_type: String,
    pub result_id: Option<i64>,
    pub archive: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Local,
    Remote,
}

/// Response body of `GET /api/cloud`: new downloads take precedence over the
/// availability report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CloudReport {
    Downloads {
        downloads: Vec<CloudDownload>,
        cursor: Cursor,
    },
    Availability {
        network: Network,
        download: bool,
        processing: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Green,
    Yellow,
    Red,
}

impl Health {
    /// Heartbeat freshness: under 30s green, under 60s yellow, otherwise red.
    pub fn from_age(age_secs: i64) -> Self {
        if age_secs < 30 {
            Health::Green
        } else if age_secs < 60 {
            Health::Yellow
        } else {
            Health::Red
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub age_secs: i64,
    pub level: Health,
}

impl Heartbeat {
    pub fn from_age(age_secs: i64) -> Self {
        Heartbeat {
            age_secs,
            level: Health::from_age(age_secs),
        }
    }
}

/// Response body of `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamlineStatus {
    pub beamline: String,
    pub dataserver: Heartbeat,
    pub controller: Heartbeat,
    pub cluster: Heartbeat,
}

/// One row of the integrated-run ranking table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRanking {
    pub result_id: i64,
    pub repr: String,
    pub spacegroup: Option<String>,
    pub a: Option<f64>,
    pub b: Option<f64>,
    pub c: Option<f64>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
    pub high_res: Option<f64>,
    pub completeness: Option<f64>,
    pub multiplicity: Option<f64>,
    pub r_pim: Option<f64>,
    pub anom_slope: Option<f64>,
}

/// Response body of `GET /api/rankings/runs`; the cursor is a `result_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingsBatch {
    pub runs: Vec<RunRanking>,
    pub cursor: Cursor,
}

/// Rough queue placement computed at submission time. Not a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEstimate {
    /// 0 means the request should be dispatched immediately.
    pub estimated_position: i64,
}

impl QueueEstimate {
    /// Estimate from the dispatcher counters: a non-empty queue puts us
    /// behind it, a saturated dispatcher makes us first in line.
    pub fn from_counters(current_queue: i64, occupied: i64, allowed: i64) -> Self {
        let estimated_position = if current_queue > 0 {
            current_queue + 1
        } else if occupied >= allowed {
            1
        } else {
            0
        };
        QueueEstimate { estimated_position }
    }

    pub fn message(&self) -> String {
        match self.estimated_position {
            0 => "This process will be dispatched immediately".to_string(),
            1 => "This process is currently first in the queue".to_string(),
            n => format!("This process is currently about number {} in the queue", n),
        }
    }
}

/// Which pointer table a settings mutation updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsTarget {
    Presets,
    Current,
    /// Reprocess requests only create a one-off setting.
    Single,
}

/// Success body of the mutation endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub setting_id: i64,
    pub target: SettingsTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_request_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueEstimate>,
    pub message: String,
    /// HTML table of the values written, for display in the panel.
    pub summary: String,
}
