//! End-to-end tests for single-directory data sources
//!
//! These tests run the full driver against a temporary directory:
//! - Resuming from a memento after a stop, without loss or duplication
//! - Containment of malformed records
//! - Idempotent rediscovery and modified-after-ingestion detection
//! - Output pacing

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{csv_lines, directory_config, ingested, wait_until, Recorder};
use mooring_common::types::{CursorState, DriverState};
use mooring_ingest::config::DriverConfig;
use mooring_ingest::driver::{DatasetDriver, DriverEvent};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

fn driver(
    dir: &TempDir,
    batch_size: usize,
    rate: f64,
    memento: Option<DriverState>,
) -> (DatasetDriver, Arc<Recorder>) {
    let config = DriverConfig::from_toml_str(&directory_config(dir.path(), batch_size, rate)).unwrap();
    let recorder = Arc::new(Recorder::default());
    let driver = DatasetDriver::new(config, memento, recorder.clone()).unwrap();
    (driver, recorder)
}

/// Write through a temp name so the harvester never sees a partial file.
fn publish(dir: &TempDir, name: &str, content: &str) {
    let tmp = dir.path().join(format!("{name}.partial"));
    std::fs::write(&tmp, content).unwrap();
    std::fs::rename(tmp, dir.path().join(name)).unwrap();
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_resume_after_stop_delivers_each_record_once() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.log"), csv_lines(12)).unwrap();

    // 3 records every 0.3s, stop after the second batch
    let (mut first, first_seen) = driver(&dir, 3, 10.0, None);
    first.start_sampling().unwrap();
    assert!(wait_until(TIMEOUT, || first_seen.sample_count() >= 6).await);
    first.stop_sampling().await.unwrap();

    let memento = first.state();
    assert!(!ingested(&memento, "ctdbp", "a.log"));
    let delivered = first_seen.offsets();
    assert!(delivered.len() < 12);

    let (mut second, second_seen) = driver(&dir, 3, 1000.0, Some(memento));
    second.start_sampling().unwrap();
    assert!(wait_until(TIMEOUT, || ingested(&second.state(), "ctdbp", "a.log")).await);
    second.stop_sampling().await.unwrap();

    let mut all = delivered;
    all.extend(second_seen.offsets());
    assert_eq!(all.len(), 12, "every line exactly once: {all:?}");
    let mut sorted = all.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted, all, "offsets are strictly increasing across the restart");
}

#[tokio::test]
async fn test_restart_after_full_ingest_only_reads_new_files() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.log"), csv_lines(10)).unwrap();

    let (mut first, first_seen) = driver(&dir, 4, 1000.0, None);
    first.start_sampling().unwrap();
    assert!(wait_until(TIMEOUT, || ingested(&first.state(), "ctdbp", "a.log")).await);
    first.stop_sampling().await.unwrap();
    assert_eq!(first_seen.sample_count(), 10);

    // round-trip the memento the way a host would persist it
    let memento = DriverState::from_json(&first.state().to_json().unwrap()).unwrap();

    let (mut second, second_seen) = driver(&dir, 4, 1000.0, Some(memento));
    second.start_sampling().unwrap();
    publish(&dir, "b.log", &csv_lines(3));
    assert!(wait_until(TIMEOUT, || ingested(&second.state(), "ctdbp", "b.log")).await);
    second.stop_sampling().await.unwrap();

    let samples = second_seen.samples.lock().unwrap();
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|(_, s)| s.source_file.as_deref() == Some("b.log")));
    assert_eq!(samples[0].1.source_offset, 0);
}

#[tokio::test]
async fn test_last_line_without_newline_is_delivered() {
    let dir = TempDir::new().unwrap();
    let content = csv_lines(3);
    publish(&dir, "a.log", content.trim_end_matches('\n'));

    let (mut driver, seen) = driver(&dir, 10, 1000.0, None);
    driver.start_sampling().unwrap();
    assert!(wait_until(TIMEOUT, || ingested(&driver.state(), "ctdbp", "a.log")).await);
    driver.stop_sampling().await.unwrap();

    assert_eq!(seen.sample_count(), 3);
    assert_eq!(
        seen.count_events(|e| matches!(e, DriverEvent::SampleDecodeError { .. })),
        0
    );
    let record = driver.state().file("ctdbp", "a.log").cloned().unwrap();
    assert_eq!(
        record.parser_state,
        Some(CursorState::ByteOffset {
            position: content.len() as u64 - 1
        })
    );
}

// ============================================================================
// Malformed records
// ============================================================================

#[tokio::test]
async fn test_malformed_line_is_reported_and_skipped() {
    let dir = TempDir::new().unwrap();
    let content = "# header comment\n\
                   2014-04-12T01:00:00Z,10.5\n\
                   not a record\n\
                   2014-04-12T01:01:00Z,warm\n\
                   2014-04-12T01:02:00Z,11.5\n";
    std::fs::write(dir.path().join("a.log"), content).unwrap();

    let (mut driver, seen) = driver(&dir, 10, 1000.0, None);
    driver.start_sampling().unwrap();
    assert!(wait_until(TIMEOUT, || ingested(&driver.state(), "ctdbp", "a.log")).await);
    driver.stop_sampling().await.unwrap();

    assert_eq!(seen.sample_count(), 2);
    assert_eq!(
        seen.count_events(|e| matches!(e, DriverEvent::SampleDecodeError { .. })),
        2
    );
    assert!(seen.exceptions().is_empty());

    let positions: Vec<u64> = seen
        .events()
        .iter()
        .filter_map(|e| match e {
            DriverEvent::SampleDecodeError { position, .. } => Some(*position),
            _ => None,
        })
        .collect();
    let second_line = "# header comment\n2014-04-12T01:00:00Z,10.5\n".len() as u64;
    assert_eq!(positions[0], second_line);
}

// ============================================================================
// Rediscovery
// ============================================================================

#[tokio::test]
async fn test_ingested_files_are_not_reparsed() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.log"), csv_lines(4)).unwrap();
    std::fs::write(dir.path().join("b.log"), csv_lines(3)).unwrap();

    let (mut first, first_seen) = driver(&dir, 10, 1000.0, None);
    first.start_sampling().unwrap();
    assert!(
        wait_until(TIMEOUT, || {
            let state = first.state();
            ingested(&state, "ctdbp", "a.log") && ingested(&state, "ctdbp", "b.log")
        })
        .await
    );
    first.stop_sampling().await.unwrap();
    assert_eq!(first_seen.sample_count(), 7);
    assert_eq!(
        first_seen.count_events(|e| matches!(e, DriverEvent::NewFile { .. })),
        2
    );

    // same content rewritten: new mtime, same checksum
    publish(&dir, "b.log", &csv_lines(3));

    let (mut second, second_seen) = driver(&dir, 10, 1000.0, Some(first.state()));
    second.start_sampling().unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(second_seen.sample_count(), 0);
    assert!(second_seen.events().is_empty());

    // real modification after ingestion
    publish(&dir, "a.log", &csv_lines(6));
    assert!(
        wait_until(TIMEOUT, || {
            second_seen.count_events(|e| matches!(e, DriverEvent::ModifiedAfterIngestion { .. })) == 1
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    second.stop_sampling().await.unwrap();

    assert_eq!(second_seen.sample_count(), 0, "modified files are not reparsed");
    assert_eq!(
        second_seen.count_events(|e| matches!(e, DriverEvent::ModifiedAfterIngestion { .. })),
        1,
        "reported once per change"
    );
    let record = second.state().file("ctdbp", "a.log").cloned().unwrap();
    assert!(record.ingested);
    assert!(record.modified_state.is_some());
}

#[tokio::test]
async fn test_new_files_are_picked_up_while_sampling() {
    let dir = TempDir::new().unwrap();
    let (mut driver, seen) = driver(&dir, 10, 1000.0, None);
    driver.start_sampling().unwrap();

    publish(&dir, "late.log", &csv_lines(2));
    publish(&dir, "ignored.txt", &csv_lines(5));

    assert!(wait_until(TIMEOUT, || ingested(&driver.state(), "ctdbp", "late.log")).await);
    driver.stop_sampling().await.unwrap();

    assert_eq!(seen.sample_count(), 2);
    assert!(driver.state().file("ctdbp", "ignored.txt").is_none());
}

// ============================================================================
// Pacing
// ============================================================================

#[tokio::test]
async fn test_batches_are_paced() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.log"), csv_lines(10)).unwrap();

    // 2 records per batch at 20 records/s: one batch every 100ms
    let (mut driver, seen) = driver(&dir, 2, 20.0, None);
    driver.start_sampling().unwrap();
    assert!(wait_until(TIMEOUT, || ingested(&driver.state(), "ctdbp", "a.log")).await);
    driver.stop_sampling().await.unwrap();

    let batches = seen.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 5);
    for pair in batches.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap >= Duration::from_millis(90), "batches {gap:?} apart");
    }
}

#[tokio::test]
async fn test_stop_without_start_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (mut driver, _) = driver(&dir, 10, 1000.0, None);
    assert!(driver.stop_sampling().await.is_err());

    driver.start_sampling().unwrap();
    assert!(driver.start_sampling().is_err());
    driver.stop_sampling().await.unwrap();
    assert!(!driver.is_sampling());
}

// ============================================================================
// State notifications
// ============================================================================

fn position(state: &DriverState, key: &str, file: &str) -> u64 {
    match state.file(key, file).and_then(|r| r.parser_state.clone()) {
        Some(CursorState::ByteOffset { position }) => position,
        _ => 0,
    }
}

#[tokio::test]
async fn test_state_changes_arrive_in_commit_order() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    std::fs::write(first.path().join("a.log"), csv_lines(30)).unwrap();
    std::fs::write(second.path().join("b.log"), csv_lines(30)).unwrap();

    // two sources committing concurrently, one record per batch
    let other = directory_config(second.path(), 1, 10_000.0);
    let other = &other[..other.find("[resource]").unwrap()];
    let toml = directory_config(first.path(), 1, 10_000.0)
        + &other
            .replace("[harvester.ctdbp]", "[harvester.other]")
            .replace("[parser.ctdbp]", "[parser.other]");
    let config = DriverConfig::from_toml_str(&toml).unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut driver = DatasetDriver::new(config, None, recorder.clone()).unwrap();

    driver.start_sampling().unwrap();
    assert!(
        wait_until(TIMEOUT, || {
            let state = driver.state();
            ingested(&state, "ctdbp", "a.log") && ingested(&state, "other", "b.log")
        })
        .await
    );
    driver.stop_sampling().await.unwrap();

    let states = recorder.states.lock().unwrap().clone();
    assert!(states.len() >= 60);
    for pair in states.windows(2) {
        assert!(position(&pair[1], "ctdbp", "a.log") >= position(&pair[0], "ctdbp", "a.log"));
        assert!(position(&pair[1], "other", "b.log") >= position(&pair[0], "other", "b.log"));
    }
    assert_eq!(states.last(), Some(&driver.state()));
}
