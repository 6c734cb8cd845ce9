//! End-to-end tests for a multiplexed single-file data source
//!
//! The file interleaves SIO blocks from several instruments, noise and
//! retransmitted blocks, and keeps growing while the driver runs.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{ingested, single_file_config, sio_block, wait_until, Recorder};
use mooring_ingest::chunker::sieve::{SioHeader, BLOCK_END};
use mooring_ingest::config::DriverConfig;
use mooring_ingest::driver::{DatasetDriver, DriverEvent};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);
const FILE: &str = "node59p1.dat";

fn driver(dir: &TempDir) -> (DatasetDriver, Arc<Recorder>) {
    let config = DriverConfig::from_toml_str(&single_file_config(dir.path())).unwrap();
    let recorder = Arc::new(Recorder::default());
    let driver = DatasetDriver::new(config, None, recorder.clone()).unwrap();
    (driver, recorder)
}

fn append(dir: &TempDir, bytes: &[u8]) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.path().join(FILE))
        .unwrap();
    file.write_all(bytes).unwrap();
}

fn block_numbers(recorder: &Recorder) -> Vec<u64> {
    recorder
        .samples
        .lock()
        .unwrap()
        .iter()
        .map(|(_, s)| s.value("block_number").and_then(|v| v.as_u64()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_filters_dedups_and_follows_growth() {
    let dir = TempDir::new().unwrap();
    let mut initial = Vec::new();
    initial.extend(sio_block("DO", 1, 0x5348_2A10, b"abcdefgh"));
    initial.extend(sio_block("FL", 1, 0x5348_2A10, b"otherins"));
    initial.extend(b"garbage\r\n");
    initial.extend(sio_block("DO", 1, 0x5348_2A10, b"abcdefgh"));
    initial.extend(sio_block("DO", 2, 0x5348_2A20, b"ijkl"));
    append(&dir, &initial);

    let (mut driver, seen) = driver(&dir);
    driver.start_sampling().unwrap();
    assert!(wait_until(TIMEOUT, || ingested(&driver.state(), "dosta", FILE)).await);
    assert_eq!(block_numbers(&seen), vec![1, 1, 2]);
    assert_eq!(
        seen.count_events(|e| matches!(e, DriverEvent::UnexpectedData { .. })),
        1
    );

    // a retransmission of block 2 and a new block whose payload needs escaping
    let payload: [u8; 4] = [0x2B, 0x01, 0x02, 0x04];
    let header = SioHeader {
        instrument_id: "DO".to_string(),
        controller_id: "1237601".to_string(),
        length: payload.len(),
        flag: 'u',
        timestamp: 0x5348_2A30,
        block_number: 3,
        checksum: payload.iter().map(|b| u16::from(*b)).sum(),
    };
    let mut grown = sio_block("DO", 2, 0x5348_2A20, b"ijkl");
    grown.extend(header.encode());
    grown.extend([0x18, 0x6B, 0x01, 0x02, 0x04, BLOCK_END]);
    append(&dir, &grown);

    assert!(wait_until(TIMEOUT, || seen.sample_count() == 4).await);
    assert!(
        wait_until(TIMEOUT, || {
            seen.count_events(|e| matches!(e, DriverEvent::FileGrowth { .. })) == 1
                && ingested(&driver.state(), "dosta", FILE)
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    driver.stop_sampling().await.unwrap();

    assert_eq!(block_numbers(&seen), vec![1, 1, 2, 3]);
    let samples = seen.samples.lock().unwrap();
    let escaped = &samples[3].1;
    assert_eq!(escaped.value("raw"), Some(&json!("2b010204")));
    assert_eq!(
        escaped.internal_timestamp.unwrap().timestamp(),
        i64::from(0x5348_2A30u32)
    );
    assert!(seen.exceptions().is_empty());
}

#[tokio::test]
async fn test_bad_checksum_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let mut corrupt = sio_block("DO", 1, 0x5348_2A10, b"abcd");
    // flip a payload byte after the checksum was computed
    corrupt[SioHeader::LEN] = b'z';
    let mut content = corrupt;
    content.extend(sio_block("DO", 2, 0x5348_2A20, b"efgh"));
    append(&dir, &content);

    let (mut driver, seen) = driver(&dir);
    driver.start_sampling().unwrap();
    assert!(wait_until(TIMEOUT, || ingested(&driver.state(), "dosta", FILE)).await);
    driver.stop_sampling().await.unwrap();

    assert_eq!(block_numbers(&seen), vec![2]);
    assert_eq!(
        seen.count_events(|e| matches!(e, DriverEvent::SampleDecodeError { .. })),
        1
    );
}

#[tokio::test]
async fn test_truncated_file_is_reparsed_from_start() {
    let dir = TempDir::new().unwrap();
    let mut initial = sio_block("DO", 1, 0x5348_2A10, b"abcd");
    initial.extend(sio_block("DO", 2, 0x5348_2A20, b"efgh"));
    append(&dir, &initial);

    let (mut driver, seen) = driver(&dir);
    driver.start_sampling().unwrap();
    assert!(wait_until(TIMEOUT, || ingested(&driver.state(), "dosta", FILE)).await);

    let tmp = dir.path().join("replacement.tmp");
    std::fs::write(&tmp, sio_block("DO", 5, 0x5348_2B00, b"wxyz")).unwrap();
    std::fs::rename(&tmp, dir.path().join(FILE)).unwrap();

    assert!(wait_until(TIMEOUT, || block_numbers(&seen).contains(&5)).await);
    driver.stop_sampling().await.unwrap();

    assert_eq!(
        seen.count_events(|e| matches!(e, DriverEvent::FileTruncated { .. })),
        1
    );
    assert_eq!(block_numbers(&seen), vec![1, 2, 5]);
}

#[tokio::test]
async fn test_growth_while_draining_is_neither_lost_nor_repeated() {
    let dir = TempDir::new().unwrap();
    append(&dir, &sio_block("DO", 1, 0x5348_2A00, b"blk1"));

    let (mut driver, seen) = driver(&dir);
    driver.start_sampling().unwrap();

    // write each block in two halves so polls often catch a partial block
    // and snapshots go stale before the publisher opens the file
    for number in 2..=20u8 {
        let block = sio_block("DO", number, 0x5348_2A00 + u32::from(number), b"blkN");
        let (head, tail) = block.split_at(block.len() / 2);
        append(&dir, head);
        tokio::time::sleep(Duration::from_millis(15)).await;
        append(&dir, tail);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(wait_until(TIMEOUT, || seen.sample_count() >= 20).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    driver.stop_sampling().await.unwrap();

    assert_eq!(block_numbers(&seen), (1..=20).collect::<Vec<u64>>());
    assert_eq!(
        seen.count_events(|e| matches!(e, DriverEvent::FileTruncated { .. })),
        0
    );
    assert!(seen.exceptions().is_empty());
}
