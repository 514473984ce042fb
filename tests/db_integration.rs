//! Database integration tests.
//!
//! All tests require TEST_DATABASE_URL to be set.
//! Run with: TEST_DATABASE_URL=postgres://... cargo test --test db_integration
//!
//! Tests should be run single-threaded to avoid conflicts:
//!   cargo test --test db_integration -- --test-threads=1

mod common;

use common::DATADIR;
use rapd_panel::classify::{Label, Staleness};
use rapd_panel::db::{Database, HideScope};
use rapd_panel::protocol::{CloudReport, Cursor, ResultEntry};
use rapd_panel::settings::{ReprocessForm, SettingParams, SettingsForm};

/// Skip the test if TEST_DATABASE_URL is not set.
macro_rules! require_db {
    () => {
        if !common::has_test_db() {
            eprintln!("Skipping: TEST_DATABASE_URL not set");
            return;
        }
    };
}

async fn setup() -> Database {
    common::setup_test_db().await
}

fn labels(entries: &[ResultEntry]) -> Vec<Label> {
    entries.iter().map(|e| e.common().label).collect()
}

// --- Connection ---

#[tokio::test]
async fn connect_to_test_db() {
    require_db!();
    let db = setup().await;
    db.health_check().await.unwrap();
}

// --- Result cursor ---

#[tokio::test]
async fn cursor_only_moves_forward() {
    require_db!();
    let db = setup().await;
    let staleness = Staleness::default();

    let (a, _) = common::seed_single(db.pool(), DATADIR, 0, Some("SUCCESS"), None).await;
    let first = db.results_since(DATADIR, Cursor::START, &staleness).await.unwrap();
    assert_eq!(first.entries.len(), 1);
    assert_eq!(first.cursor, Cursor(common::result_seq(db.pool(), a).await));

    let (b, _) = common::seed_single(db.pool(), DATADIR, 0, Some("FAILED"), None).await;
    let second = db.results_since(DATADIR, first.cursor, &staleness).await.unwrap();
    assert_eq!(second.entries.len(), 1);
    assert_eq!(second.entries[0].common().result_id, b);
    assert!(second.cursor > first.cursor);

    // A cursor beyond every row comes back unchanged.
    let ahead = Cursor(second.cursor.0 + 1000);
    let third = db.results_since(DATADIR, ahead, &staleness).await.unwrap();
    assert!(third.entries.is_empty());
    assert_eq!(third.cursor, ahead);
}

#[tokio::test]
async fn results_come_back_in_seq_order() {
    require_db!();
    let db = setup().await;
    for _ in 0..5 {
        common::seed_single(db.pool(), DATADIR, 0, Some("SUCCESS"), None).await;
    }
    let batch = db
        .results_since(DATADIR, Cursor::START, &Staleness::default())
        .await
        .unwrap();
    let seqs: Vec<i64> = batch.entries.iter().map(|e| e.common().seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort();
    assert_eq!(seqs, sorted);
    assert_eq!(batch.cursor, Cursor(*seqs.last().unwrap()));
}

#[tokio::test]
async fn detail_update_redraws_seq() {
    require_db!();
    let db = setup().await;
    let (result_id, detail_id) = common::seed_single(db.pool(), DATADIR, 0, Some("FAILED"), None).await;
    let before = common::result_seq(db.pool(), result_id).await;

    sqlx::query("UPDATE single_results SET summary_stac = 'stac.html' WHERE single_result_id = $1")
        .bind(detail_id)
        .execute(db.pool())
        .await
        .unwrap();

    let after = common::result_seq(db.pool(), result_id).await;
    assert!(after > before);
    let batch = db
        .results_since(DATADIR, Cursor(before), &Staleness::default())
        .await
        .unwrap();
    assert_eq!(labels(&batch.entries), vec![Label::Stac]);
}

#[tokio::test]
async fn detail_inserted_after_result_moves_it_past_cursor() {
    require_db!();
    let db = setup().await;
    let staleness = Staleness::default();
    // Result row first, pointing at the detail id the pipeline is about to write.
    let result_id = common::seed_result(db.pool(), "mr", 1, 0, DATADIR).await;
    let first = db.results_since(DATADIR, Cursor::START, &staleness).await.unwrap();
    assert_eq!(labels(&first.entries), vec![Label::Error]);

    sqlx::query("INSERT INTO mr_results (mr_status, repr) VALUES ('SUCCESS', 'mr_1')")
        .execute(db.pool())
        .await
        .unwrap();
    let second = db.results_since(DATADIR, first.cursor, &staleness).await.unwrap();
    assert_eq!(second.entries.len(), 1);
    assert_eq!(second.entries[0].common().result_id, result_id);
    assert_eq!(labels(&second.entries), vec![Label::Success]);
}

#[tokio::test]
async fn late_commit_is_not_skipped_by_the_cursor() {
    require_db!();
    let db = setup().await;
    let staleness = Staleness::default();

    // Writer A draws its seq and holds the transaction open.
    let mut tx = db.pool().begin().await.unwrap();
    let detail_a: i64 = sqlx::query_scalar(
        "INSERT INTO single_results (repr, best_norm_status) VALUES ('a', 'SUCCESS')
         RETURNING single_result_id",
    )
    .fetch_one(&mut *tx)
    .await
    .unwrap();
    let (result_a, seq_a): (i64, i64) = sqlx::query_as(
        "INSERT INTO results (kind, id, data_root_dir) VALUES ('single', $1, $2)
         RETURNING result_id, seq",
    )
    .bind(detail_a)
    .bind(DATADIR)
    .fetch_one(&mut *tx)
    .await
    .unwrap();

    // Writer B on another connection, same directory.
    let pool = db.pool().clone();
    let writer_b = tokio::spawn(async move {
        common::seed_single(&pool, DATADIR, 0, Some("FAILED"), None).await.0
    });
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(!writer_b.is_finished(), "second writer committed ahead of the first");

    let during = db.results_since(DATADIR, Cursor::START, &staleness).await.unwrap();
    assert!(during.entries.is_empty());
    assert_eq!(during.cursor, Cursor::START);

    tx.commit().await.unwrap();
    let result_b = writer_b.await.unwrap();
    let seq_b = common::result_seq(db.pool(), result_b).await;
    assert!(seq_a < seq_b);

    let after = db.results_since(DATADIR, during.cursor, &staleness).await.unwrap();
    let ids: Vec<i64> = after.entries.iter().map(|e| e.common().result_id).collect();
    assert_eq!(ids, vec![result_a, result_b]);
}

#[tokio::test]
async fn writers_in_other_directories_do_not_wait() {
    require_db!();
    let db = setup().await;
    let mut tx = db.pool().begin().await.unwrap();
    sqlx::query("INSERT INTO results (kind, id, data_root_dir) VALUES ('single', 1, $1)")
        .bind(DATADIR)
        .execute(&mut *tx)
        .await
        .unwrap();

    let other = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        common::seed_single(db.pool(), "/gpfs5/other", 0, Some("SUCCESS"), None),
    )
    .await;
    assert!(other.is_ok());
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn integrate_age_is_truncated_at_threshold() {
    require_db!();
    let db = setup().await;
    common::seed_integrate_aged(db.pool(), DATADIR, 0, "WORKING", 1799.6).await;
    common::seed_integrate_aged(db.pool(), DATADIR, 0, "WORKING", 1800.5).await;

    let batch = db
        .results_since(DATADIR, Cursor::START, &Staleness::default())
        .await
        .unwrap();
    assert_eq!(labels(&batch.entries), vec![Label::Working, Label::Finished]);
}

#[tokio::test]
async fn staleness_threshold_comes_from_config() {
    require_db!();
    let db = setup().await;
    common::seed_integrate(db.pool(), DATADIR, 0, "WORKING", 120).await;

    let lenient = db
        .results_since(DATADIR, Cursor::START, &Staleness::default())
        .await
        .unwrap();
    assert_eq!(labels(&lenient.entries), vec![Label::Working]);

    let strict = Staleness {
        integrate_secs: 60,
        ..Staleness::default()
    };
    let batch = db.results_since(DATADIR, Cursor::START, &strict).await.unwrap();
    assert_eq!(labels(&batch.entries), vec![Label::Finished]);
}

#[tokio::test]
async fn sad_download_and_solved_flags_surface() {
    require_db!();
    let db = setup().await;
    let sad_id: i64 = sqlx::query_scalar(
        "INSERT INTO sad_results (sad_status, repr, download_file)
         VALUES ('SUCCESS', 'sad_1', '/dl/sad_1.tar.bz2') RETURNING sad_result_id",
    )
    .fetch_one(db.pool())
    .await
    .unwrap();
    common::seed_result(db.pool(), "sad", sad_id, 0, DATADIR).await;
    let merge_id: i64 = sqlx::query_scalar(
        "INSERT INTO merge_results (merge_status, repr, solved)
         VALUES ('SUCCESS', 'merge_1', 'Yes') RETURNING merge_result_id",
    )
    .fetch_one(db.pool())
    .await
    .unwrap();
    common::seed_result(db.pool(), "merge", merge_id, 0, DATADIR).await;

    let batch = db
        .results_since(DATADIR, Cursor::START, &Staleness::default())
        .await
        .unwrap();
    assert_eq!(batch.entries.len(), 2);
    match &batch.entries[0] {
        ResultEntry::Sad { has_download, .. } => assert!(*has_download),
        other => panic!("expected sad entry, got {:?}", other),
    }
    match &batch.entries[1] {
        ResultEntry::Merge { solved, .. } => assert!(*solved),
        other => panic!("expected merge entry, got {:?}", other),
    }
}

// --- Hiding ---

#[tokio::test]
async fn hide_result_bumps_seq_and_clears_visibility() {
    require_db!();
    let db = setup().await;
    let (result_id, _) = common::seed_single(db.pool(), DATADIR, 0, Some("SUCCESS"), None).await;
    let before = common::result_seq(db.pool(), result_id).await;

    assert!(db.hide_result(result_id).await.unwrap());
    let batch = db
        .results_since(DATADIR, Cursor(before), &Staleness::default())
        .await
        .unwrap();
    assert_eq!(batch.entries.len(), 1);
    assert!(!batch.entries[0].common().visible);

    assert!(!db.hide_result(result_id + 100).await.unwrap());
}

#[tokio::test]
async fn hide_runs_scope_touches_only_runs() {
    require_db!();
    let db = setup().await;
    common::seed_single(db.pool(), DATADIR, 0, Some("SUCCESS"), None).await;
    common::seed_integrate(db.pool(), DATADIR, 0, "SUCCESS", 5).await;
    common::seed_integrate(db.pool(), "/gpfs5/other", 0, "SUCCESS", 5).await;

    assert_eq!(db.hide_results(DATADIR, HideScope::Runs).await.unwrap(), 1);
    // Already-hidden rows are not counted again.
    assert_eq!(db.hide_results(DATADIR, HideScope::All).await.unwrap(), 1);
    assert_eq!(db.hide_results(DATADIR, HideScope::All).await.unwrap(), 0);
}

// --- Settings ---

fn current_form(beamline: &str, x_beam: &str) -> SettingsForm {
    SettingsForm {
        form_type: Some("current".into()),
        beamline: Some(beamline.into()),
        data_dir: Some(DATADIR.into()),
        reference_data_id: Some("None".into()),
        params: SettingParams {
            x_beam: Some(x_beam.into()),
            ..SettingParams::default()
        },
    }
}

#[tokio::test]
async fn current_pointer_follows_latest_setting() {
    require_db!();
    let db = setup().await;

    let first = db
        .apply_settings(&current_form("E", "150.0").validate().unwrap())
        .await
        .unwrap();
    let second = db
        .apply_settings(&current_form("E", "151.5").validate().unwrap())
        .await
        .unwrap();
    let other = db
        .apply_settings(&current_form("C", "149.0").validate().unwrap())
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(db.current_setting_id("E").await.unwrap(), Some(second));
    assert_eq!(db.current_setting_id("C").await.unwrap(), Some(other));

    let x_beam: Option<f64> = sqlx::query_scalar(
        "SELECT s.x_beam FROM current c JOIN settings s ON s.setting_id = c.setting_id
         WHERE c.beamline = 'E'",
    )
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(x_beam, Some(151.5));
}

#[tokio::test]
async fn preset_pointer_is_keyed_by_directory() {
    require_db!();
    let db = setup().await;
    let mut form = current_form("E", "150.0");
    form.form_type = Some("preset".into());

    let id = db.apply_settings(&form.validate().unwrap()).await.unwrap();
    let again = db.apply_settings(&form.validate().unwrap()).await.unwrap();
    assert_eq!(db.preset_setting_id(DATADIR).await.unwrap(), Some(again));
    assert_ne!(id, again);

    let presets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM presets")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(presets, 1);
}

// --- Reprocess and cloud ---

fn reprocess_form() -> ReprocessForm {
    ReprocessForm {
        beamline: Some("E".into()),
        data_root_dir: Some(DATADIR.into()),
        reference_data: Some("12".into()),
        additional_image: Some("0".into()),
        request_type: Some("reprocess".into()),
        original_result_id: Some("1".into()),
        original_type: Some("single".into()),
        original_id: Some("1".into()),
        ip_address: Some("164.54.212.7".into()),
        params: SettingParams::default(),
    }
}

#[tokio::test]
async fn saturated_dispatcher_puts_request_first_in_line() {
    require_db!();
    let db = setup().await;
    sqlx::query("UPDATE cloud_state SET remote_concurrent_allowed = 1 WHERE id = 1")
        .execute(db.pool())
        .await
        .unwrap();
    let first = db
        .submit_reprocess(&reprocess_form().validate().unwrap())
        .await
        .unwrap();
    assert_eq!(first.queue.estimated_position, 0);

    sqlx::query("INSERT INTO cloud_current (cloud_request_id) VALUES ($1)")
        .bind(first.cloud_request_id)
        .execute(db.pool())
        .await
        .unwrap();
    let second = db
        .submit_reprocess(&reprocess_form().validate().unwrap())
        .await
        .unwrap();
    assert_eq!(second.queue.estimated_position, 1);
    assert_eq!(second.additional_image_id, 0);
    assert_eq!(second.additional_image_name, None);

    let reference: Option<i64> =
        sqlx::query_scalar("SELECT reference_data_id FROM settings WHERE setting_id = $1")
            .bind(second.setting_id)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(reference, Some(12));
}

#[tokio::test]
async fn unresolved_additional_image_submits_zero() {
    require_db!();
    let db = setup().await;
    let (_, single_id) = common::seed_single(db.pool(), DATADIR, 0, Some("SUCCESS"), None).await;
    let mut form = reprocess_form();
    form.additional_image = Some(single_id.to_string());

    // No images row for the frame.
    let receipt = db.submit_reprocess(&form.validate().unwrap()).await.unwrap();
    assert_eq!(receipt.additional_image_id, 0);
}

#[tokio::test]
async fn download_cursor_skips_seen_rows() {
    require_db!();
    let db = setup().await;
    let mut ids = Vec::new();
    for archive in ["a.tar", "b.tar"] {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO cloud_complete (request_type, archive, ip_address, data_root_dir)
             VALUES ('download', $1, '10.0.0.9', $2) RETURNING cloud_complete_id",
        )
        .bind(archive)
        .bind(DATADIR)
        .fetch_one(db.pool())
        .await
        .unwrap();
        ids.push(id);
    }

    match db.cloud_report(DATADIR, "10.0.0.9", Cursor(ids[0]), false).await.unwrap() {
        CloudReport::Downloads { downloads, cursor } => {
            assert_eq!(downloads.len(), 1);
            assert_eq!(downloads[0].cloud_complete_id, ids[1]);
            assert_eq!(cursor, Cursor(ids[1]));
        }
        other => panic!("expected downloads, got {:?}", other),
    }

    assert!(db.mark_download_shown(ids[1]).await.unwrap());
    assert!(matches!(
        db.cloud_report(DATADIR, "10.0.0.9", Cursor(ids[0]), false).await.unwrap(),
        CloudReport::Availability { .. }
    ));
}

// --- Status ---

#[tokio::test]
async fn zero_age_heartbeat_is_not_missing() {
    require_db!();
    let db = setup().await;
    sqlx::query("INSERT INTO status_dataserver (beamline, timestamp) VALUES ('C', NOW())")
        .execute(db.pool())
        .await
        .unwrap();
    let status = db.beamline_status("C").await.unwrap();
    assert!(status.dataserver.age_secs < 30);
    assert_eq!(status.controller.age_secs, 100);
    assert_eq!(status.cluster.age_secs, 100);
}

#[tokio::test]
async fn heartbeat_age_is_truncated() {
    require_db!();
    let db = setup().await;
    sqlx::query(
        "INSERT INTO status_dataserver (beamline, timestamp)
         VALUES ('C', NOW() - interval '0.6 seconds')",
    )
    .execute(db.pool())
    .await
    .unwrap();
    let status = db.beamline_status("C").await.unwrap();
    assert_eq!(status.dataserver.age_secs, 0);
}
