//! Drives the recorder through the same channel the connector feeds.

use bytes::Bytes;
use distance_sensor_ble::{
    Clock, LogFile, Reading, ReadingRecorder, RecordingPolicy, SensorConfig,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Clock that advances one millisecond per call.
struct StepClock(AtomicI64);

impl Clock for StepClock {
    fn now_millis(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

fn scratch_log_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("sensor-pipeline-{}", uuid::Uuid::new_v4()))
        .join("sensorData.txt")
}

fn recorder(config: SensorConfig) -> Arc<ReadingRecorder> {
    Arc::new(ReadingRecorder::with_clock(
        &config,
        Arc::new(StepClock(AtomicI64::new(1_000))),
    ))
}

fn payload(distance: i64) -> Bytes {
    Bytes::from(format!(
        r#"{{"distance":{},"flux":5,"temperature":21}}"#,
        distance
    ))
}

#[tokio::test]
async fn test_channel_payloads_persisted_in_order() {
    let config = SensorConfig::default()
        .with_log_path(scratch_log_path())
        .with_sync_writes(false);
    let recorder = recorder(config.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    let worker = {
        let recorder = recorder.clone();
        tokio::task::spawn_blocking(move || recorder.run_blocking(rx))
    };

    for distance in 0..20 {
        tx.send(payload(distance)).unwrap();
    }
    drop(tx);
    worker.await.unwrap();

    let entries = LogFile::new(&config.log_path).entries().unwrap();
    assert_eq!(entries.len(), 20);

    let readings: Vec<Reading> = entries
        .iter()
        .map(|line| Reading::decode(line).unwrap())
        .collect();
    let distances: Vec<i64> = readings.iter().map(|r| r.distance).collect();
    assert_eq!(distances, (0..20).collect::<Vec<_>>());

    // Stamps follow arrival order.
    let stamps: Vec<i64> = readings.iter().filter_map(|r| r.timestamp).collect();
    assert_eq!(stamps, (1_000..1_020).collect::<Vec<_>>());

    assert_eq!(recorder.latest_reading().map(|r| r.distance), Some(19));
}

#[tokio::test]
async fn test_two_back_to_back_payloads_give_two_lines() {
    let config = SensorConfig::default()
        .with_log_path(scratch_log_path())
        .with_sync_writes(false);
    let recorder = recorder(config.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(payload(12)).unwrap();
    tx.send(payload(13)).unwrap();
    drop(tx);

    let worker = recorder.clone();
    tokio::task::spawn_blocking(move || worker.run_blocking(rx))
        .await
        .unwrap();

    let entries = recorder.log_file().entries().unwrap();
    assert_eq!(
        entries,
        vec![
            r#"{"distance":12,"flux":5,"temperature":21,"timeStamp":1000}"#.to_string(),
            r#"{"distance":13,"flux":5,"temperature":21,"timeStamp":1001}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn test_malformed_payload_in_stream_is_skipped() {
    let config = SensorConfig::default()
        .with_log_path(scratch_log_path())
        .with_sync_writes(false);
    let recorder = recorder(config);

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(payload(1)).unwrap();
    tx.send(Bytes::from_static(br#"{"flux":5,"temperature":21}"#))
        .unwrap();
    tx.send(Bytes::from_static(b"\xff\xff")).unwrap();
    tx.send(payload(2)).unwrap();
    drop(tx);

    let worker = recorder.clone();
    tokio::task::spawn_blocking(move || worker.run_blocking(rx))
        .await
        .unwrap();

    let distances: Vec<i64> = recorder
        .log_file()
        .entries()
        .unwrap()
        .iter()
        .map(|line| Reading::decode(line).unwrap().distance)
        .collect();
    assert_eq!(distances, vec![1, 2]);
}

#[test]
fn test_existing_log_is_appended_to() {
    let path = scratch_log_path();
    let log = LogFile::new(&path).with_sync_writes(false);
    log.append(r#"{"distance":7,"flux":7,"temperature":7}"#).unwrap();
    let before = std::fs::read(&path).unwrap();

    let config = SensorConfig::default()
        .with_log_path(&path)
        .with_sync_writes(false)
        .with_recording_policy(RecordingPolicy::Always);
    let outcome = recorder(config).on_payload(&payload(8));

    assert!(outcome.persisted);
    let after = std::fs::read(&path).unwrap();
    assert!(after.starts_with(&before));
    assert_eq!(log.len().unwrap(), 2);
}
