//! # Sequential Log Integration Tests
//!
//! Tests for:
//! - Offset assignment and read-back
//! - Concurrent writers
//! - Rotation and pre-allocation
//! - Dump / load

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use seqlog_core::{Error, LogConfig};
use seqlog_storage::{inspect, SequentialLog};

/// 16 slots and 1 KiB of data per segment.
fn small_config(dir: &TempDir) -> LogConfig {
    LogConfig {
        segment_size: 26 + 16 * 32 + 1024,
        index_slots: 16,
        ..LogConfig::new(dir.path())
    }
}

fn files_with_ext(dir: &TempDir, ext: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map_or(false, |e| e == ext))
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// =============================================================================
// Basic Operations
// =============================================================================

#[tokio::test]
async fn test_write_get_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = small_config(&temp_dir);

    {
        let log = SequentialLog::open(config.clone()).await.unwrap();
        assert_eq!(log.write("a").await.unwrap(), 1);
        assert_eq!(log.write("bb").await.unwrap(), 2);

        assert_eq!(log.get(1).unwrap(), Bytes::from_static(b"a"));
        assert_eq!(log.get(2).unwrap(), Bytes::from_static(b"bb"));
        assert!(matches!(log.get(3), Err(Error::NotFound { offset: 3 })));
        log.close().await.unwrap();
    }

    {
        let log = SequentialLog::open(config).await.unwrap();
        assert_eq!(log.last_offset(), 2);
        assert_eq!(log.get(1).unwrap(), Bytes::from_static(b"a"));
        assert_eq!(log.write("ccc").await.unwrap(), 3);
        assert_eq!(log.get(3).unwrap(), Bytes::from_static(b"ccc"));
        log.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_offset_zero_is_never_found() {
    let temp_dir = TempDir::new().unwrap();
    let log = SequentialLog::open(small_config(&temp_dir)).await.unwrap();

    assert!(matches!(log.get(0), Err(Error::NotFound { offset: 0 })));
    log.write("x").await.unwrap();
    assert!(matches!(log.get(0), Err(Error::NotFound { offset: 0 })));

    let metrics = log.metrics();
    assert_eq!(metrics.reads, 2);
    assert_eq!(metrics.read_misses, 2);
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_payload() {
    let temp_dir = TempDir::new().unwrap();
    let config = small_config(&temp_dir);

    let log = SequentialLog::open(config.clone()).await.unwrap();
    assert_eq!(log.write(Bytes::new()).await.unwrap(), 1);
    assert_eq!(log.write("after").await.unwrap(), 2);
    log.close().await.unwrap();

    let log = SequentialLog::open(config).await.unwrap();
    assert_eq!(log.get(1).unwrap(), Bytes::new());
    assert_eq!(log.get(2).unwrap(), Bytes::from_static(b"after"));
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_size_limit() {
    let temp_dir = TempDir::new().unwrap();
    let log = SequentialLog::open(small_config(&temp_dir)).await.unwrap();

    let result = log.write(vec![1u8; 1025]).await;
    assert!(matches!(
        result,
        Err(Error::SizeLimitExceeded {
            size: 1025,
            limit: 1024
        })
    ));

    // a payload that fills a whole data region is fine
    assert_eq!(log.write(vec![2u8; 1024]).await.unwrap(), 1);
    assert_eq!(log.write("next").await.unwrap(), 2);
    assert_eq!(log.get(1).unwrap().len(), 1024);
    log.close().await.unwrap();
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_get_gapless_offsets() {
    let temp_dir = TempDir::new().unwrap();
    let log = Arc::new(SequentialLog::open(small_config(&temp_dir)).await.unwrap());

    let mut handles = Vec::new();
    for task in 0..8 {
        let log = Arc::clone(&log);
        handles.push(tokio::spawn(async move {
            let mut written = Vec::new();
            for i in 0..25 {
                let payload = format!("task-{}-{}", task, i);
                let offset = log.write(payload.clone()).await.unwrap();
                written.push((offset, payload));
            }
            written
        }));
    }

    let mut written = HashMap::new();
    for handle in handles {
        for (offset, payload) in handle.await.unwrap() {
            assert!(written.insert(offset, payload).is_none(), "offset {} reused", offset);
        }
    }

    let mut offsets: Vec<u64> = written.keys().copied().collect();
    offsets.sort_unstable();
    assert_eq!(offsets, (1..=200).collect::<Vec<u64>>());

    for (offset, payload) in &written {
        assert_eq!(log.get(*offset).unwrap(), Bytes::from(payload.clone()));
    }
    assert_eq!(log.last_offset(), 200);

    // 16 slots per segment: every full segment crossed 75% exactly once
    let metrics = log.metrics();
    assert_eq!(metrics.rotations, 12);
    assert_eq!(metrics.preallocations_started, 12);

    log.close().await.unwrap();
    assert_eq!(log.metrics().preallocations_completed, 12);
    assert_eq!(files_with_ext(&temp_dir, "dat").len(), 13);
    assert!(files_with_ext(&temp_dir, "emp").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_with_full_queue_answers_every_writer() {
    let temp_dir = TempDir::new().unwrap();
    let config = LogConfig {
        queue_capacity: 1,
        ..small_config(&temp_dir)
    };
    let log = Arc::new(SequentialLog::open(config.clone()).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..50 {
        let log = Arc::clone(&log);
        handles.push(tokio::spawn(async move { log.write(format!("w-{}", i)).await }));
    }

    tokio::time::sleep(Duration::from_millis(5)).await;
    log.close().await.unwrap();

    let outcomes = tokio::time::timeout(Duration::from_secs(10), async {
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        outcomes
    })
    .await
    .expect("a writer was left waiting after close");

    let mut acked = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(offset) => acked.push(offset),
            Err(Error::Closed) => {}
            Err(other) => panic!("unexpected write error: {}", other),
        }
    }
    acked.sort_unstable();
    assert_eq!(acked, (1..=acked.len() as u64).collect::<Vec<u64>>());
    assert_eq!(log.last_offset(), acked.len() as u64);

    let log = SequentialLog::open(config).await.unwrap();
    assert_eq!(log.dump().unwrap().len(), acked.len());
    log.close().await.unwrap();
}

// =============================================================================
// Rotation and Pre-allocation
// =============================================================================

#[tokio::test]
async fn test_rotation_on_full_data_region() {
    let temp_dir = TempDir::new().unwrap();
    let config = small_config(&temp_dir);
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    let payloads: Vec<Vec<u8>> = (0..40)
        .map(|_| (0..100).map(|_| rng.gen::<u8>()).collect())
        .collect();

    let log = SequentialLog::open(config.clone()).await.unwrap();
    for (i, payload) in payloads.iter().enumerate() {
        assert_eq!(log.write(payload.clone()).await.unwrap(), i as u64 + 1);
    }
    assert_eq!(log.metrics().rotations, 3);
    log.close().await.unwrap();

    assert_eq!(files_with_ext(&temp_dir, "dat"), vec!["1.dat", "2.dat", "3.dat", "4.dat"]);

    let layout = seqlog_storage::SegmentLayout::from_config(&config);
    let summaries = inspect(temp_dir.path(), &layout).unwrap();
    let ranges: Vec<(u64, u64)> = summaries.iter().map(|s| (s.min_offset, s.max_offset)).collect();
    assert_eq!(ranges, vec![(1, 10), (11, 20), (21, 30), (31, 40)]);
    assert!(summaries.iter().all(|s| s.capacity == 10 && s.remaining_data == 24));

    let log = SequentialLog::open(config).await.unwrap();
    for (i, payload) in payloads.iter().enumerate() {
        assert_eq!(log.get(i as u64 + 1).unwrap().as_ref(), payload.as_slice());
    }
    assert_eq!(log.write("tail").await.unwrap(), 41);
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_threshold_preallocates_next_segment_once() {
    let temp_dir = TempDir::new().unwrap();
    let log = SequentialLog::open(small_config(&temp_dir)).await.unwrap();

    // 12 of 16 slots is the 75% mark
    for _ in 0..11 {
        log.write("x").await.unwrap();
    }
    assert_eq!(log.metrics().preallocations_started, 0);
    log.write("x").await.unwrap();
    assert_eq!(log.metrics().preallocations_started, 1);

    for _ in 0..100 {
        if log.metrics().preallocations_completed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(log.metrics().preallocations_completed, 1);
    assert_eq!(files_with_ext(&temp_dir, "emp"), vec!["2.emp"]);

    // the 80/85/90/95 marks find the file already there
    for _ in 0..4 {
        log.write("x").await.unwrap();
    }
    assert_eq!(log.metrics().preallocations_started, 1);

    // the 17th write rotates into the pre-allocated file
    assert_eq!(log.write("y").await.unwrap(), 17);
    assert!(files_with_ext(&temp_dir, "emp").is_empty());
    assert_eq!(files_with_ext(&temp_dir, "dat"), vec!["1.dat", "2.dat"]);
    assert_eq!(log.metrics().rotations, 1);
    assert_eq!(log.get(17).unwrap(), Bytes::from_static(b"y"));
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_incomplete_preallocated_file_is_rebuilt() {
    let temp_dir = TempDir::new().unwrap();
    let config = small_config(&temp_dir);
    std::fs::write(temp_dir.path().join("2.emp"), b"short").unwrap();

    let log = SequentialLog::open(config.clone()).await.unwrap();
    for _ in 0..17 {
        log.write("z").await.unwrap();
    }
    assert_eq!(log.get(17).unwrap(), Bytes::from_static(b"z"));
    log.close().await.unwrap();

    let len = std::fs::metadata(temp_dir.path().join("2.dat")).unwrap().len();
    assert_eq!(len, config.segment_size);
}

// =============================================================================
// Dump / Load
// =============================================================================

#[tokio::test]
async fn test_dump_and_load_across_segments() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();

    let payloads: Vec<Bytes> = (0..30)
        .map(|i| Bytes::from(format!("record-{:03}", i).repeat(i % 5 + 1)))
        .collect();

    let source = SequentialLog::open(small_config(&source_dir)).await.unwrap();
    source.load(payloads.clone()).await.unwrap();
    let dumped = source.dump().unwrap();
    assert_eq!(dumped, payloads);
    source.close().await.unwrap();

    let target = SequentialLog::open(small_config(&target_dir)).await.unwrap();
    let offsets = target.load(dumped).await.unwrap();
    assert_eq!(offsets, (1..=30).collect::<Vec<u64>>());
    assert_eq!(target.dump().unwrap(), payloads);
    target.close().await.unwrap();
}

#[tokio::test]
async fn test_writes_after_close_fail() {
    let temp_dir = TempDir::new().unwrap();
    let log = Arc::new(SequentialLog::open(small_config(&temp_dir)).await.unwrap());
    log.write("before").await.unwrap();

    log.close().await.unwrap();

    assert!(matches!(log.write("after").await, Err(Error::Closed)));
    assert!(matches!(log.get(1), Err(Error::Closed)));
    assert_eq!(log.last_offset(), 1);
}
