//! # Classify — Result Status Decision Tables
//!
//! Maps a detail row's raw status fields to the display label the panel
//! renders. Every function here is pure: the same inputs always produce the
//! same [`Label`], which keeps the poll protocol deterministic and lets the
//! client treat labels as a closed vocabulary.
//!
//! ## Decision tables
//!
//! | Kind | Rule |
//! |------|------|
//! | single / pair | STAC summary → `STAC`; either strategy engine `SUCCESS` → subtype label; else `FAILED` |
//! | integrate | `SUCCESS` → subtype label; `WORKING` → `WORKING` or `FINISHED` when stale; `FAILED`; else `ERROR` |
//! | merge | `SUCCESS`; `WORKING` → `WORKING` or `FINISHED` when stale; else `FAILED` |
//! | sad | `SUCCESS`; `WORKING` → `WORKING` or `UNKNOWN` when stale; else `FAILED` |
//! | mr | `SUCCESS`; `COMPLETE`; `WORKING` → `WORKING` or `UNKNOWN` when stale; else `FAILED` |
//!
//! Staleness thresholds default to 1800s for integrate/merge and 3000s for
//! sad/mr and are configurable through [`Staleness`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The six result kinds the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Single,
    Pair,
    Integrate,
    Merge,
    Sad,
    Mr,
}

impl ResultKind {
    pub const ALL: [ResultKind; 6] = [
        ResultKind::Single,
        ResultKind::Pair,
        ResultKind::Integrate,
        ResultKind::Merge,
        ResultKind::Sad,
        ResultKind::Mr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Single => "single",
            ResultKind::Pair => "pair",
            ResultKind::Integrate => "integrate",
            ResultKind::Merge => "merge",
            ResultKind::Sad => "sad",
            ResultKind::Mr => "mr",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(ResultKind::Single),
            "pair" => Ok(ResultKind::Pair),
            "integrate" => Ok(ResultKind::Integrate),
            "merge" => Ok(ResultKind::Merge),
            "sad" => Ok(ResultKind::Sad),
            "mr" => Ok(ResultKind::Mr),
            other => Err(anyhow::anyhow!("unknown result kind '{}'", other)),
        }
    }
}

/// Pipeline status as stored in the detail tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawStatus {
    Working,
    Success,
    Failed,
    Complete,
    Missing,
    Other(String),
}

impl RawStatus {
    /// Convert the text column once at the adapter boundary. NULL and the
    /// pipeline's literal `'None'` both become `Missing`.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") | Some("None") => RawStatus::Missing,
            Some("WORKING") => RawStatus::Working,
            Some("SUCCESS") => RawStatus::Success,
            Some("FAILED") => RawStatus::Failed,
            Some("COMPLETE") => RawStatus::Complete,
            Some(other) => RawStatus::Other(other.to_string()),
        }
    }
}

/// Processing subtype recorded in the detail row's `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subtype {
    Normal,
    Reprocess,
    RefStrat,
    Refastint,
    Rexia2,
}

impl Subtype {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("reprocess") => Subtype::Reprocess,
            Some("ref_strat") => Subtype::RefStrat,
            Some("refastint") => Subtype::Refastint,
            Some("rexia2") => Subtype::Rexia2,
            _ => Subtype::Normal,
        }
    }
}

/// Display label sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    Success,
    Working,
    Failed,
    Finished,
    Unknown,
    Complete,
    Error,
    Stac,
    Reprocess,
    RefStrat,
    Refastint,
    Rexia2,
}

impl Label {
    /// True while the pipeline is still producing this result.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Label::Working)
    }

    /// True for labels that can only be reached by a working job going stale.
    pub fn is_stale(&self) -> bool {
        matches!(self, Label::Finished | Label::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Success => "SUCCESS",
            Label::Working => "WORKING",
            Label::Failed => "FAILED",
            Label::Finished => "FINISHED",
            Label::Unknown => "UNKNOWN",
            Label::Complete => "COMPLETE",
            Label::Error => "ERROR",
            Label::Stac => "STAC",
            Label::Reprocess => "REPROCESS",
            Label::RefStrat => "REF_STRAT",
            Label::Refastint => "REFASTINT",
            Label::Rexia2 => "REXIA2",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seconds after which a `WORKING` job is presumed dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Staleness {
    pub integrate_secs: i64,
    pub merge_secs: i64,
    pub sad_secs: i64,
    pub mr_secs: i64,
}

impl Default for Staleness {
    fn default() -> Self {
        Staleness {
            integrate_secs: 1800,
            merge_secs: 1800,
            sad_secs: 3000,
            mr_secs: 3000,
        }
    }
}

/// The detail fields classification depends on, already decoded from text.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailStatus {
    /// Single-image or paired-image strategy result.
    Snap {
        best: RawStatus,
        mosflm: RawStatus,
        has_stac: bool,
        subtype: Subtype,
    },
    Integrate {
        status: RawStatus,
        subtype: Subtype,
        age_secs: i64,
    },
    Merge {
        status: RawStatus,
        age_secs: i64,
    },
    Sad {
        status: RawStatus,
        age_secs: i64,
    },
    Mr {
        status: RawStatus,
        age_secs: i64,
    },
}

/// Classify a detail row. `None` means the detail join did not resolve and
/// always yields [`Label::Error`].
pub fn classify(detail: Option<&DetailStatus>, staleness: &Staleness) -> Label {
    let Some(detail) = detail else {
        return Label::Error;
    };
    match detail {
        DetailStatus::Snap {
            best,
            mosflm,
            has_stac,
            subtype,
        } => classify_snap(best, mosflm, *has_stac, *subtype),
        DetailStatus::Integrate {
            status,
            subtype,
            age_secs,
        } => match status {
            RawStatus::Success => match subtype {
                Subtype::Refastint => Label::Refastint,
                Subtype::Rexia2 => Label::Rexia2,
                _ => Label::Success,
            },
            RawStatus::Working => working_or(*age_secs, staleness.integrate_secs, Label::Finished),
            RawStatus::Failed => Label::Failed,
            _ => Label::Error,
        },
        DetailStatus::Merge { status, age_secs } => match status {
            RawStatus::Success => Label::Success,
            RawStatus::Working => working_or(*age_secs, staleness.merge_secs, Label::Finished),
            _ => Label::Failed,
        },
        DetailStatus::Sad { status, age_secs } => match status {
            RawStatus::Success => Label::Success,
            RawStatus::Working => working_or(*age_secs, staleness.sad_secs, Label::Unknown),
            _ => Label::Failed,
        },
        DetailStatus::Mr { status, age_secs } => match status {
            RawStatus::Success => Label::Success,
            RawStatus::Complete => Label::Complete,
            RawStatus::Working => working_or(*age_secs, staleness.mr_secs, Label::Unknown),
            _ => Label::Failed,
        },
    }
}

fn classify_snap(best: &RawStatus, mosflm: &RawStatus, has_stac: bool, subtype: Subtype) -> Label {
    if has_stac {
        return Label::Stac;
    }
    if *best == RawStatus::Success || *mosflm == RawStatus::Success {
        return match subtype {
            Subtype::Reprocess => Label::Reprocess,
            Subtype::RefStrat => Label::RefStrat,
            _ => Label::Success,
        };
    }
    Label::Failed
}

fn working_or(age_secs: i64, threshold: i64, stale: Label) -> Label {
    if age_secs < threshold {
        Label::Working
    } else {
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integrate(status: &str, age: i64) -> DetailStatus {
        DetailStatus::Integrate {
            status: RawStatus::parse(Some(status)),
            subtype: Subtype::Normal,
            age_secs: age,
        }
    }

    fn snap(best: Option<&str>, mosflm: Option<&str>, stac: bool, subtype: &str) -> DetailStatus {
        DetailStatus::Snap {
            best: RawStatus::parse(best),
            mosflm: RawStatus::parse(mosflm),
            has_stac: stac,
            subtype: Subtype::parse(Some(subtype)),
        }
    }

    #[test]
    fn integrate_working_turns_finished_at_threshold() {
        let s = Staleness::default();
        assert_eq!(classify(Some(&integrate("WORKING", 1799)), &s), Label::Working);
        assert_eq!(classify(Some(&integrate("WORKING", 1800)), &s), Label::Finished);
        assert_eq!(classify(Some(&integrate("WORKING", 1801)), &s), Label::Finished);
    }

    #[test]
    fn integrate_subtypes_relabel_success_only() {
        let s = Staleness::default();
        let refast = DetailStatus::Integrate {
            status: RawStatus::Success,
            subtype: Subtype::Refastint,
            age_secs: 10,
        };
        let rexia = DetailStatus::Integrate {
            status: RawStatus::Success,
            subtype: Subtype::Rexia2,
            age_secs: 10,
        };
        let failed_rexia = DetailStatus::Integrate {
            status: RawStatus::Failed,
            subtype: Subtype::Rexia2,
            age_secs: 10,
        };
        assert_eq!(classify(Some(&refast), &s), Label::Refastint);
        assert_eq!(classify(Some(&rexia), &s), Label::Rexia2);
        assert_eq!(classify(Some(&failed_rexia), &s), Label::Failed);
    }

    #[test]
    fn integrate_unrecognised_status_is_error() {
        let s = Staleness::default();
        assert_eq!(classify(Some(&integrate("EXPLODED", 5)), &s), Label::Error);
        let missing = DetailStatus::Integrate {
            status: RawStatus::Missing,
            subtype: Subtype::Normal,
            age_secs: 5,
        };
        assert_eq!(classify(Some(&missing), &s), Label::Error);
    }

    #[test]
    fn snap_stac_wins_over_everything() {
        let s = Staleness::default();
        let d = snap(Some("FAILED"), Some("FAILED"), true, "reprocess");
        assert_eq!(classify(Some(&d), &s), Label::Stac);
    }

    #[test]
    fn snap_success_uses_subtype() {
        let s = Staleness::default();
        assert_eq!(
            classify(Some(&snap(Some("SUCCESS"), None, false, "normal")), &s),
            Label::Success
        );
        assert_eq!(
            classify(Some(&snap(Some("SUCCESS"), None, false, "reprocess")), &s),
            Label::Reprocess
        );
        assert_eq!(
            classify(Some(&snap(None, Some("SUCCESS"), false, "ref_strat")), &s),
            Label::RefStrat
        );
    }

    #[test]
    fn snap_without_any_success_fails() {
        let s = Staleness::default();
        assert_eq!(
            classify(Some(&snap(Some("FAILED"), Some("WORKING"), false, "normal")), &s),
            Label::Failed
        );
    }

    #[test]
    fn merge_sad_mr_tables() {
        let s = Staleness::default();
        let merge = |st: &str, age| DetailStatus::Merge {
            status: RawStatus::parse(Some(st)),
            age_secs: age,
        };
        let sad = |st: &str, age| DetailStatus::Sad {
            status: RawStatus::parse(Some(st)),
            age_secs: age,
        };
        let mr = |st: &str, age| DetailStatus::Mr {
            status: RawStatus::parse(Some(st)),
            age_secs: age,
        };

        assert_eq!(classify(Some(&merge("WORKING", 1801)), &s), Label::Finished);
        assert_eq!(classify(Some(&merge("BOGUS", 1)), &s), Label::Failed);
        assert_eq!(classify(Some(&sad("WORKING", 2999)), &s), Label::Working);
        assert_eq!(classify(Some(&sad("WORKING", 3001)), &s), Label::Unknown);
        assert_eq!(classify(Some(&mr("COMPLETE", 1)), &s), Label::Complete);
        assert_eq!(classify(Some(&mr("WORKING", 3000)), &s), Label::Unknown);
        assert_eq!(classify(Some(&mr("FAILED", 1)), &s), Label::Failed);
    }

    #[test]
    fn unresolved_detail_is_error() {
        assert_eq!(classify(None, &Staleness::default()), Label::Error);
    }

    #[test]
    fn custom_staleness_is_respected() {
        let s = Staleness {
            integrate_secs: 60,
            ..Default::default()
        };
        assert_eq!(classify(Some(&integrate("WORKING", 61)), &s), Label::Finished);
    }

    #[test]
    fn raw_status_treats_none_literal_as_missing() {
        assert_eq!(RawStatus::parse(Some("None")), RawStatus::Missing);
        assert_eq!(RawStatus::parse(None), RawStatus::Missing);
        assert_eq!(
            RawStatus::parse(Some("ODD")),
            RawStatus::Other("ODD".to_string())
        );
    }

    #[test]
    fn label_serializes_in_wire_case() {
        assert_eq!(serde_json::to_string(&Label::RefStrat).unwrap(), "\"REF_STRAT\"");
        assert_eq!(serde_json::to_string(&Label::Rexia2).unwrap(), "\"REXIA2\"");
        assert_eq!(Label::RefStrat.as_str(), "REF_STRAT");
    }

    #[test]
    fn result_kind_parses_all_names() {
        for kind in ResultKind::ALL {
            assert_eq!(kind.as_str().parse::<ResultKind>().unwrap(), kind);
        }
        assert!("image".parse::<ResultKind>().is_err());
    }
}
