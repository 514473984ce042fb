//! Property-based tests for the panel's pure logic.
//!
//! # Prerequisites
//!
//! - No database or network access required.
//!
//! # How to run
//!
//! ```bash
//! cargo test --test property_tests
//! PROPTEST_CASES=10000 cargo test --test property_tests
//! ```
//!
//! # Testing strategy
//!
//! - **Classification**: labels are a pure function of the detail fields, and
//!   a working job flips to its stale label exactly at the threshold.
//! - **Merge**: replaying a batch changes nothing, the cursor never moves
//!   back, and every visible result appears in exactly one container.
//! - **Queue estimate** and **backoff**: arithmetic rules hold for all inputs.
//!
//! Each property is named `prop_<subject>_<invariant>`.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rapd_panel::classify::{classify, DetailStatus, Label, RawStatus, ResultKind, Staleness, Subtype};
use rapd_panel::merge::{Container, Panel};
use rapd_panel::poller::Backoff;
use rapd_panel::protocol::{Cursor, EntryCommon, QueueEstimate, ResultEntry, ResultsBatch};
use std::time::Duration;

fn raw_status() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some("None".to_string())),
        Just(Some("WORKING".to_string())),
        Just(Some("SUCCESS".to_string())),
        Just(Some("FAILED".to_string())),
        Just(Some("COMPLETE".to_string())),
        "[A-Z]{1,8}".prop_map(Some),
    ]
}

fn kind() -> impl Strategy<Value = ResultKind> {
    prop_oneof![
        Just(ResultKind::Single),
        Just(ResultKind::Pair),
        Just(ResultKind::Integrate),
        Just(ResultKind::Merge),
        Just(ResultKind::Sad),
        Just(ResultKind::Mr),
    ]
}

fn label() -> impl Strategy<Value = Label> {
    prop_oneof![
        Just(Label::Success),
        Just(Label::Working),
        Just(Label::Failed),
        Just(Label::Finished),
        Just(Label::Unknown),
        Just(Label::Error),
        Just(Label::Stac),
    ]
}

/// A result entry with `seq` supplied by the caller so batches stay ordered.
fn entry(kind: ResultKind, result_id: i64, label: Label, visible: bool, seq: i64) -> ResultEntry {
    ResultEntry::new(
        kind,
        EntryCommon {
            result_id,
            process_id: 0,
            visible,
            repr: format!("r{}", result_id),
            label,
            timestamp: Utc.with_ymd_and_hms(2011, 4, 11, 9, 0, 0).unwrap(),
            seq,
        },
        false,
        false,
    )
}

/// A server batch: each result appears at most once, in `seq` order.
fn batch() -> impl Strategy<Value = ResultsBatch> {
    prop::collection::vec((kind(), label(), any::<bool>()), 0..30).prop_map(|rows| {
        let entries: Vec<ResultEntry> = rows
            .into_iter()
            .enumerate()
            .map(|(i, (k, l, v))| {
                let n = i as i64 + 1;
                entry(k, n * 3, l, v, n)
            })
            .collect();
        let cursor = Cursor(entries.len() as i64);
        ResultsBatch { entries, cursor }
    })
}

// == Classification ============================================================

proptest! {
    #[test]
    fn prop_classify_is_deterministic(
        best in raw_status(),
        mosflm in raw_status(),
        stac in any::<bool>(),
    ) {
        let detail = DetailStatus::Snap {
            best: RawStatus::parse(best.as_deref()),
            mosflm: RawStatus::parse(mosflm.as_deref()),
            has_stac: stac,
            subtype: Subtype::Normal,
        };
        let s = Staleness::default();
        prop_assert_eq!(classify(Some(&detail), &s), classify(Some(&detail.clone()), &s));
        if stac {
            prop_assert_eq!(classify(Some(&detail), &s), Label::Stac);
        }
    }

    #[test]
    fn prop_working_run_goes_stale_at_threshold(age in 0_i64..10_000, threshold in 1_i64..5_000) {
        let staleness = Staleness { integrate_secs: threshold, ..Staleness::default() };
        let detail = DetailStatus::Integrate {
            status: RawStatus::Working,
            subtype: Subtype::Normal,
            age_secs: age,
        };
        let expected = if age < threshold { Label::Working } else { Label::Finished };
        prop_assert_eq!(classify(Some(&detail), &staleness), expected);
    }

    #[test]
    fn prop_sad_stale_label_is_unknown(age in 0_i64..10_000) {
        let s = Staleness::default();
        let label = classify(Some(&DetailStatus::Sad { status: RawStatus::Working, age_secs: age }), &s);
        prop_assert!(label == Label::Working || label == Label::Unknown);
        prop_assert_eq!(label == Label::Unknown, age >= s.sad_secs);
    }
}

// == Merge =====================================================================

proptest! {
    #[test]
    fn prop_merge_replay_is_idempotent(b in batch()) {
        let mut panel = Panel::new();
        panel.apply_results(&b);
        let once = panel.clone();
        let report = panel.apply_results(&b);
        prop_assert_eq!(&panel, &once);
        prop_assert_eq!(report.changed, 0);
        prop_assert!(!report.ranking_refresh);
    }

    #[test]
    fn prop_merge_cursor_is_monotonic(first in batch(), cursor in 0_i64..100) {
        let mut panel = Panel::new();
        panel.apply_results(&first);
        let before = panel.cursor();
        panel.apply_results(&ResultsBatch { entries: vec![], cursor: Cursor(cursor) });
        prop_assert!(panel.cursor() >= before);
        prop_assert_eq!(panel.cursor(), before.advance(Cursor(cursor)));
    }

    #[test]
    fn prop_merge_visible_results_appear_once(b in batch()) {
        let mut panel = Panel::new();
        panel.apply_results(&b);
        let mut seen = std::collections::HashSet::new();
        for c in Container::ALL {
            for item in panel.items(c) {
                prop_assert!(seen.insert(item.result_id()), "duplicate {}", item.result_id());
                prop_assert!(item.entry.common().visible);
                prop_assert_eq!(Container::for_kind(item.entry.kind()), c);
            }
        }
    }
}

// == Queue estimate and backoff ===============================================

proptest! {
    #[test]
    fn prop_queue_estimate_rules(queue in 0_i64..50, occupied in 0_i64..10, allowed in 1_i64..10) {
        let est = QueueEstimate::from_counters(queue, occupied, allowed).estimated_position;
        if queue > 0 {
            prop_assert_eq!(est, queue + 1);
        } else if occupied >= allowed {
            prop_assert_eq!(est, 1);
        } else {
            prop_assert_eq!(est, 0);
        }
    }

    #[test]
    fn prop_backoff_never_exceeds_cap(base_ms in 1_u64..10_000, max_ms in 1_u64..600_000, failures in 1_usize..64) {
        let max = Duration::from_millis(max_ms);
        let base = Duration::from_millis(base_ms);
        let mut backoff = Backoff::new(max);
        let mut last = Duration::ZERO;
        for _ in 0..failures {
            let delay = backoff.fail(base);
            prop_assert!(delay <= max);
            prop_assert!(delay >= last);
            last = delay;
        }
        backoff.reset();
        prop_assert_eq!(backoff.failures(), 0);
    }
}
