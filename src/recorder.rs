//! Reading recorder.
//!
//! Turns raw notification payloads into persisted, optionally timestamped
//! log entries and keeps the most recent decoded [`Reading`] for display.
//! Persisting and the display update are independent best-effort paths: a
//! failure in one never prevents the other, and no failure stops the
//! recorder from handling the next payload.

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::config::{RecordingPolicy, SensorConfig};
use crate::data::{stamp_payload, LogFile, Reading};
use crate::error::{Error, Result};
use crate::utils::{Clock, SystemClock};

/// What happened to a single payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadOutcome {
    /// The entry was appended to the log.
    pub persisted: bool,
    /// The reading that became the latest reading, if decoding succeeded.
    pub reading: Option<Reading>,
}

/// Persists readings and tracks the latest one.
pub struct ReadingRecorder {
    log: LogFile,
    timestamps: bool,
    policy: RecordingPolicy,
    clock: Arc<dyn Clock>,
    recording: AtomicBool,
    latest: RwLock<Option<Reading>>,
    reading_tx: broadcast::Sender<Reading>,
}

impl ReadingRecorder {
    /// Create a recorder from the service configuration.
    pub fn new(config: &SensorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a recorder with a custom time source.
    pub fn with_clock(config: &SensorConfig, clock: Arc<dyn Clock>) -> Self {
        let (reading_tx, _) = broadcast::channel(64);

        Self {
            log: LogFile::new(config.log_path.clone()).with_sync_writes(config.sync_writes),
            timestamps: config.timestamps,
            policy: config.recording_policy,
            clock,
            recording: AtomicBool::new(false),
            latest: RwLock::new(None),
            reading_tx,
        }
    }

    /// Handle one notification payload.
    ///
    /// Errors are logged, never returned; the outcome says what took effect.
    pub fn on_payload(&self, payload: &[u8]) -> PayloadOutcome {
        let entry = match self.prepare_entry(payload) {
            Ok(entry) => entry,
            Err(e) => {
                error!("Dropping payload: {}", e);
                return PayloadOutcome::default();
            }
        };

        let persisted = if self.should_persist() {
            match self.log.append(&entry) {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to persist reading: {}", e);
                    false
                }
            }
        } else {
            debug!("Not recording, skipping persistence");
            false
        };

        let reading = match Reading::decode(&entry) {
            Ok(reading) => {
                *self.latest.write() = Some(reading);
                let _ = self.reading_tx.send(reading);
                Some(reading)
            }
            Err(e) => {
                debug!("Payload is not a reading, display unchanged: {}", e);
                None
            }
        };

        PayloadOutcome { persisted, reading }
    }

    /// Turn a payload into the exact text that goes into the log.
    fn prepare_entry(&self, payload: &[u8]) -> Result<String> {
        let text = std::str::from_utf8(payload).map_err(|e| Error::InvalidPayload {
            context: format!("not UTF-8: {}", e),
        })?;
        let text = text
            .strip_suffix('\n')
            .map(|t| t.strip_suffix('\r').unwrap_or(t))
            .unwrap_or(text);

        if self.timestamps {
            stamp_payload(text, self.clock.now_millis())
        } else {
            Ok(text.to_owned())
        }
    }

    fn should_persist(&self) -> bool {
        match self.policy {
            RecordingPolicy::Always => true,
            RecordingPolicy::WhileRecording => self.is_recording(),
        }
    }

    /// Consume payloads from `rx` one at a time until the channel closes.
    ///
    /// Blocks the calling thread; run it on a dedicated or blocking thread.
    pub fn run_blocking(&self, mut rx: mpsc::UnboundedReceiver<Bytes>) {
        info!("Reading recorder started, logging to {}", self.log.path().display());

        let mut handled: u64 = 0;
        while let Some(payload) = rx.blocking_recv() {
            self.on_payload(&payload);
            handled += 1;
        }

        info!("Reading recorder stopped after {} payloads", handled);
    }

    /// Start a recording session.
    pub fn start_recording(&self) {
        if !self.recording.swap(true, Ordering::SeqCst) {
            info!("Recording started");
            if self.policy == RecordingPolicy::Always {
                debug!("Recording policy is Always; readings were already being persisted");
            }
        }
    }

    /// Stop the recording session.
    pub fn stop_recording(&self) {
        if self.recording.swap(false, Ordering::SeqCst) {
            info!("Recording stopped");
        }
    }

    /// Check if a recording session is active.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// The most recent successfully decoded reading.
    pub fn latest_reading(&self) -> Option<Reading> {
        *self.latest.read()
    }

    /// Subscribe to reading updates.
    pub fn subscribe_readings(&self) -> broadcast::Receiver<Reading> {
        self.reading_tx.subscribe()
    }

    /// The log readings are appended to.
    pub fn log_file(&self) -> &LogFile {
        &self.log
    }
}

impl std::fmt::Debug for ReadingRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingRecorder")
            .field("log", &self.log)
            .field("timestamps", &self.timestamps)
            .field("policy", &self.policy)
            .field("recording", &self.is_recording())
            .field("latest", &self.latest_reading())
            .finish()
    }
}
