//! Pipeline integration tests
//!
//! Traversal, deduplication, failure recovery, checkpoint/resume and events,
//! all against scripted collaborators.

mod helpers;

use chartmeta_enrich::models::ChartItem;
use chartmeta_enrich::services::{LookupError, WalkStart};
use chartmeta_enrich::workflow::{load_corrections, load_manifest, read_dataset};
use chartmeta_enrich::{PipelineEvent, RunError};
use helpers::{date, item, CountingTokens, Harness, ScriptedChart, ScriptedLookup, Stage};
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn abcd_lookup() -> ScriptedLookup {
    ScriptedLookup::new()
        .with_track("a", "A")
        .with_track("b", "B")
        .with_track("c", "C")
        .with_track("d", "D")
}

/// week1=[A,B], week2=[B,C], week3=[C,D], newest first
fn three_weeks() -> ScriptedChart {
    ScriptedChart::weekly(
        date(2020, 1, 25),
        vec![
            vec![item("a", "A"), item("b", "B")],
            vec![item("b", "B"), item("c", "C")],
            vec![item("c", "C"), item("d", "D")],
        ],
    )
}

fn ids(path: &Path) -> Vec<String> {
    read_dataset(path)
        .unwrap()
        .identifiers()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_each_identifier_enriched_once() {
    let harness = Harness::new(abcd_lookup()).await;

    let summary = harness
        .pipeline(three_weeks(), harness.config(3))
        .run()
        .await
        .unwrap();

    assert_eq!(ids(&harness.output_path()), vec!["a", "b", "c", "d"]);
    for id in ["a", "b", "c", "d"] {
        assert_eq!(harness.lookup.calls_for(Stage::Track, id), 1, "track {}", id);
        assert_eq!(harness.lookup.calls_for(Stage::AudioFeatures, id), 1, "features {}", id);
    }

    assert_eq!(summary.snapshots_walked, 3);
    assert_eq!(summary.items_seen, 6);
    assert_eq!(summary.enriched, 4);
    assert_eq!(summary.duplicates, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.checkpoints, 0);
    assert_eq!(harness.credentials.refresh_count(), 0);
    assert!(!harness.corrections_path().exists());
}

#[tokio::test]
async fn test_records_carry_every_stage() {
    let harness = Harness::new(abcd_lookup()).await;
    harness.pipeline(three_weeks(), harness.config(3)).run().await.unwrap();

    let dataset = read_dataset(&harness.output_path()).unwrap();
    assert_eq!(dataset.unresolved_count(), 0);
    for record in dataset.records() {
        assert_eq!(record.album_id, format!("album-{}", record.identifier));
        assert_eq!(record.artist_id, format!("artist-{}", record.identifier));
        assert_eq!(record.album_popularity, 40);
        assert_eq!(record.artist_popularity, 80);
        assert_eq!(record.feature("tempo"), Some(118.25));
    }
}

#[tokio::test]
async fn test_not_found_item_goes_to_correction_log() {
    // B is unknown to the lookup service
    let lookup = ScriptedLookup::new()
        .with_track("a", "A")
        .with_track("c", "C")
        .with_track("d", "D");
    let harness = Harness::new(lookup).await;

    let summary = harness
        .pipeline(three_weeks(), harness.config(3))
        .run()
        .await
        .unwrap();

    assert_eq!(ids(&harness.output_path()), vec!["a", "c", "d"]);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.checkpoints, 1);
    assert_eq!(harness.credentials.refresh_count(), 1);
    // B shows up again in week 2 but is never retried
    assert_eq!(harness.lookup.calls_for(Stage::Track, "b"), 1);

    let corrections = load_corrections(&harness.corrections_path()).unwrap();
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].title, "B");
    assert_eq!(corrections[0].identifier, None);

    // Checkpoint holds what was enriched when B failed
    let checkpoint = harness.checkpoint_dir().join("chart-backup-1.csv");
    assert_eq!(ids(&checkpoint), vec!["a"]);
}

#[tokio::test]
async fn test_partial_record_discarded_on_late_stage_failure() {
    let harness = Harness::new(abcd_lookup()).await;
    harness.lookup.fail(Stage::AudioFeatures, "c", LookupError::RateLimited);

    let summary = harness
        .pipeline(three_weeks(), harness.config(3))
        .run()
        .await
        .unwrap();

    assert_eq!(ids(&harness.output_path()), vec!["a", "b", "d"]);
    assert_eq!(summary.failed, 1);
    assert_eq!(harness.lookup.calls_for(Stage::Artist, "c"), 1);
}

#[tokio::test]
async fn test_workers_do_not_change_the_result() {
    let lookup = || {
        ScriptedLookup::new()
            .with_track("a", "A")
            .with_track("c", "C")
            .with_track("d", "D")
    };

    let sequential = Harness::new(lookup()).await;
    sequential.pipeline(three_weeks(), sequential.config(3)).run().await.unwrap();

    let concurrent = Harness::new(lookup()).await;
    let mut config = concurrent.config(3);
    config.workers = 3;
    let summary = concurrent.pipeline(three_weeks(), config).run().await.unwrap();

    assert_eq!(ids(&concurrent.output_path()), ids(&sequential.output_path()));
    assert_eq!(summary.failed, 1);
    assert_eq!(concurrent.credentials.refresh_count(), 1);
    assert_eq!(
        load_corrections(&concurrent.corrections_path()).unwrap(),
        load_corrections(&sequential.corrections_path()).unwrap()
    );
}

#[tokio::test]
async fn test_resume_matches_uninterrupted_run() {
    let weeks = || {
        vec![
            vec![item("a", "A"), item("b", "B")],
            vec![item("b", "B"), item("c", "C")],
            vec![item("c", "C"), item("d", "D")],
            vec![item("a", "A"), item("e", "E")],
        ]
    };
    let lookup = || abcd_lookup().with_track("e", "E");
    let newest = date(2020, 1, 25);

    let reference = Harness::new(lookup()).await;
    reference
        .pipeline(ScriptedChart::weekly(newest, weeks()), reference.config(4))
        .run()
        .await
        .unwrap();

    // Same run, chart outage at week 3
    let harness = Harness::new(lookup()).await;
    let broken = ScriptedChart::weekly(newest, weeks());
    let outage = broken.week(2);
    let err = harness
        .pipeline(broken.unavailable_at(outage), harness.config(4))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Chart(_)));
    assert!(!harness.output_path().exists());

    // Nothing failed before the outage, so the final checkpoint is tag 0
    let manifest = load_manifest(&harness.checkpoint_dir().join("chart-backup-0.json")).unwrap();
    assert_eq!(manifest.failures, 0);
    assert_eq!(manifest.snapshots_completed, 2);
    assert_eq!(manifest.last_completed, Some(date(2020, 1, 18)));
    assert_eq!(manifest.resume_start(), WalkStart::Before(date(2020, 1, 18)));

    let checkpoint = read_dataset(&manifest.dataset_path).unwrap();
    harness
        .pipeline(ScriptedChart::weekly(newest, weeks()), harness.config(4))
        .resume(checkpoint, manifest)
        .run()
        .await
        .unwrap();

    assert_eq!(
        read_dataset(&harness.output_path()).unwrap(),
        read_dataset(&reference.output_path()).unwrap()
    );
    // Records from the checkpoint were not looked up again
    assert_eq!(harness.lookup.calls_for(Stage::Track, "a"), 1);
    assert_eq!(harness.lookup.calls_for(Stage::Track, "c"), 1);
}

/// week1=[A,B], week2=[C], week3=[D], week4=[B,E]; outage at week 3
async fn interrupted_at_week_three(harness: &Harness, weeks: Vec<Vec<ChartItem>>) {
    let broken = ScriptedChart::weekly(date(2020, 1, 25), weeks);
    let outage = broken.week(2);
    let err = harness
        .pipeline(broken.unavailable_at(outage), harness.config(4))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Chart(_)));
}

async fn resume_from_latest(harness: &Harness, weeks: Vec<Vec<ChartItem>>) {
    let manifest = load_manifest(&harness.checkpoint_dir().join("chart-backup-1.json")).unwrap();
    let checkpoint = read_dataset(&manifest.dataset_path).unwrap();
    harness
        .pipeline(ScriptedChart::weekly(date(2020, 1, 25), weeks), harness.config(4))
        .resume(checkpoint, manifest)
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_item_not_retried_after_resume() {
    let weeks = || {
        vec![
            vec![item("a", "A"), item("b", "B")],
            vec![item("c", "C")],
            vec![item("d", "D")],
            vec![item("b", "B"), item("e", "E")],
        ]
    };
    // B is unknown to the lookup service
    let lookup = || {
        ScriptedLookup::new()
            .with_track("a", "A")
            .with_track("c", "C")
            .with_track("d", "D")
            .with_track("e", "E")
    };

    let reference = Harness::new(lookup()).await;
    reference
        .pipeline(ScriptedChart::weekly(date(2020, 1, 25), weeks()), reference.config(4))
        .run()
        .await
        .unwrap();

    let harness = Harness::new(lookup()).await;
    interrupted_at_week_three(&harness, weeks()).await;
    resume_from_latest(&harness, weeks()).await;

    assert_eq!(
        read_dataset(&harness.output_path()).unwrap(),
        read_dataset(&reference.output_path()).unwrap()
    );
    assert_eq!(harness.lookup.calls_for(Stage::Track, "b"), 1);
    assert_eq!(harness.credentials.refresh_count(), reference.credentials.refresh_count());
    assert_eq!(load_corrections(&harness.corrections_path()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_searches_not_repeated_after_resume() {
    let weeks = || {
        vec![
            vec![item("", "A"), item("", "B")],
            vec![item("", "C")],
            vec![item("", "D")],
            vec![item("", "A"), item("", "B"), item("", "E")],
        ]
    };
    // Every title but B resolves
    let lookup = || {
        abcd_lookup()
            .with_track("e", "E")
            .with_search("A", "a")
            .with_search("C", "c")
            .with_search("D", "d")
            .with_search("E", "e")
    };

    let harness = Harness::new(lookup()).await;
    interrupted_at_week_three(&harness, weeks()).await;
    resume_from_latest(&harness, weeks()).await;

    assert_eq!(ids(&harness.output_path()), vec!["a", "c", "d", "e"]);
    assert_eq!(harness.lookup.calls_for(Stage::Search, "A"), 1);
    assert_eq!(harness.lookup.calls_for(Stage::Search, "B"), 1);
    assert_eq!(harness.lookup.calls_for(Stage::Track, "a"), 1);
    assert_eq!(load_corrections(&harness.corrections_path()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_credential_failure_aborts_after_checkpoint() {
    // Initial connect works, every refresh fails
    let harness = Harness::with_tokens(abcd_lookup(), CountingTokens::failing_from(1)).await;
    harness.lookup.fail(Stage::Track, "b", LookupError::AuthExpired);

    let (tx, mut rx) = mpsc::channel(1000);
    let err = harness
        .pipeline(three_weeks(), harness.config(3))
        .with_events(tx)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Credential(_)));

    // The final checkpoint replaces the one taken for B's failure
    let manifest = load_manifest(&harness.checkpoint_dir().join("chart-backup-1.json")).unwrap();
    assert_eq!(manifest.failures, 1);
    assert_eq!(manifest.failed, vec!["b".to_string()]);
    assert_eq!(ids(&manifest.dataset_path), vec!["a"]);
    assert!(!harness.checkpoint_dir().join("chart-backup-2.json").exists());

    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event);
    }
    assert!(matches!(last, Some(PipelineEvent::RunAborted { .. })));
}

#[tokio::test]
async fn test_events_end_with_run_completed() {
    let harness = Harness::new(abcd_lookup()).await;
    let (tx, mut rx) = mpsc::channel(1000);

    harness
        .pipeline(three_weeks(), harness.config(3))
        .with_events(tx)
        .run()
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { snapshots: 3, .. })));
    let enriched = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::ItemEnriched { .. }))
        .count();
    assert_eq!(enriched, 4);
    match events.last() {
        Some(PipelineEvent::RunCompleted { summary }) => assert_eq!(summary.records, 4),
        other => panic!("expected RunCompleted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_skip_listed_artist_is_not_looked_up() {
    let harness = Harness::new(abcd_lookup()).await;
    let enricher = std::sync::Arc::new(
        chartmeta_enrich::services::Enricher::new(harness.lookup.clone())
            .with_skip_artists(&["taylor swift".to_string()]),
    );

    let chart = ScriptedChart::weekly(
        date(2020, 1, 25),
        vec![vec![
            item("a", "A"),
            ChartItem::new("ts", "Shake It Off", "Taylor Swift"),
        ]],
    );
    let summary = chartmeta_enrich::Pipeline::new(
        harness.config(1),
        std::sync::Arc::new(chart),
        enricher,
        harness.credentials.clone(),
        harness.corrections.clone(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(harness.lookup.calls_for(Stage::Track, "ts"), 0);
    assert!(!harness.corrections_path().exists());
}

#[tokio::test]
async fn test_id_less_items_searched_once() {
    let lookup = abcd_lookup().with_search("A", "a").with_search("B", "b");
    let harness = Harness::new(lookup).await;

    let chart = ScriptedChart::weekly(
        date(2020, 1, 25),
        vec![
            vec![item("", "A"), item("", "B")],
            vec![item("", "B"), item("", "Unknown")],
            vec![item("", "Unknown"), item("a", "A")],
        ],
    );
    let summary = harness.pipeline(chart, harness.config(3)).run().await.unwrap();

    assert_eq!(ids(&harness.output_path()), vec!["a", "b"]);
    assert_eq!(harness.lookup.calls(Stage::Search), 3);
    assert_eq!(harness.lookup.calls(Stage::Track), 2);
    // Failed search for "Unknown" is logged once
    assert_eq!(summary.failed, 1);
    assert_eq!(load_corrections(&harness.corrections_path()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_search_disabled_skips_id_less_items() {
    let harness = Harness::new(abcd_lookup().with_search("B", "b")).await;
    let chart = ScriptedChart::weekly(date(2020, 1, 25), vec![vec![item("a", "A"), item("", "B")]]);

    let mut config = harness.config(1);
    config.resolve_missing_ids = false;
    let summary = harness.pipeline(chart, config).run().await.unwrap();

    assert_eq!(ids(&harness.output_path()), vec!["a"]);
    assert_eq!(summary.skipped, 1);
    assert_eq!(harness.lookup.calls(Stage::Search), 0);
}

#[tokio::test]
async fn test_walk_ends_early_when_chart_runs_out() {
    let harness = Harness::new(abcd_lookup()).await;
    let summary = harness.pipeline(three_weeks(), harness.config(10)).run().await.unwrap();

    assert_eq!(summary.snapshots_walked, 3);
    assert_eq!(ids(&harness.output_path()), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_explicit_start_date() {
    let harness = Harness::new(abcd_lookup()).await;
    let mut config = harness.config(2);
    config.start = WalkStart::At(date(2020, 1, 18));

    harness.pipeline(three_weeks(), config).run().await.unwrap();
    assert_eq!(ids(&harness.output_path()), vec!["b", "c", "d"]);
}

#[tokio::test]
async fn test_zero_counts_rejected() {
    let harness = Harness::new(abcd_lookup()).await;

    let err = harness.pipeline(three_weeks(), harness.config(0)).run().await.unwrap_err();
    assert!(matches!(err, RunError::InvalidInput(_)));

    let mut config = harness.config(1);
    config.workers = 0;
    let err = harness.pipeline(three_weeks(), config).run().await.unwrap_err();
    assert!(matches!(err, RunError::InvalidInput(_)));
}

#[tokio::test]
async fn test_cancelled_run_persists_what_it_has() {
    let harness = Harness::new(abcd_lookup()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = harness
        .pipeline(three_weeks(), harness.config(3))
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.snapshots_walked, 0);
    assert!(read_dataset(&harness.output_path()).unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_mid_snapshot_drops_pending_claims() {
    let cancel = CancellationToken::new();
    // Cancelled while week 2's id-less B is being searched
    let lookup = abcd_lookup()
        .with_search("B", "b")
        .cancel_on(Stage::Search, "B", cancel.clone());
    let harness = Harness::new(lookup).await;

    let chart = ScriptedChart::weekly(
        date(2020, 1, 25),
        vec![
            vec![item("a", "A")],
            vec![item("c", "C"), item("", "B"), item("d", "D")],
            vec![item("e", "E")],
        ],
    );
    let summary = harness
        .pipeline(chart, harness.config(3))
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.snapshots_walked, 1);
    // D was never looked at
    assert_eq!(summary.items_seen, 3);
    assert_eq!(summary.enriched, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.records, 1);

    // C and B were claimed but never enriched
    assert_eq!(ids(&harness.output_path()), vec!["a"]);
    assert_eq!(harness.lookup.calls_for(Stage::Track, "c"), 0);
    assert_eq!(harness.lookup.calls_for(Stage::Track, "b"), 0);
    assert!(!harness.corrections_path().exists());
}
