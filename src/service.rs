//! Sensor service.
//!
//! Wires the [`DeviceConnector`] into the [`ReadingRecorder`]: notification
//! payloads travel over one unbounded channel to a single consumer thread,
//! so they are persisted strictly in arrival order by a single writer.

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ble::connection::ConnectionState;
use crate::config::SensorConfig;
use crate::connector::DeviceConnector;
use crate::data::Reading;
use crate::error::{Error, Result};
use crate::recorder::ReadingRecorder;

/// Background tasks of a running service.
struct Workers {
    cancel: CancellationToken,
    connector: JoinHandle<()>,
    recorder: JoinHandle<()>,
}

/// Headless sensor service: connect, record, expose the latest reading.
pub struct SensorService {
    config: SensorConfig,
    connector: Arc<DeviceConnector>,
    recorder: Arc<ReadingRecorder>,
    workers: RwLock<Option<Workers>>,
}

impl SensorService {
    /// Create a service on the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(config: SensorConfig) -> Result<Self> {
        let connector = DeviceConnector::new(&config).await?;
        let recorder = ReadingRecorder::new(&config);

        Ok(Self {
            config,
            connector: Arc::new(connector),
            recorder: Arc::new(recorder),
            workers: RwLock::new(None),
        })
    }

    /// Start connecting and recording in the background.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("no Tokio runtime: {}", e)))?;

        let mut workers = self.workers.write();
        if workers.is_some() {
            debug!("Sensor service already running");
            return Ok(());
        }

        info!(
            "Starting sensor service (log: {}, timestamps: {}, policy: {:?})",
            self.config.log_path.display(),
            self.config.timestamps,
            self.config.recording_policy
        );

        let (payload_tx, payload_rx) = mpsc::unbounded_channel::<Bytes>();
        let cancel = CancellationToken::new();

        let recorder = self.recorder.clone();
        let recorder_handle = runtime.spawn_blocking(move || recorder.run_blocking(payload_rx));

        let connector = self.connector.clone();
        let token = cancel.clone();
        let connector_handle = runtime.spawn(async move {
            if let Err(e) = connector.run(payload_tx, token).await {
                error!("Device connector failed: {}", e);
            }
        });

        *workers = Some(Workers {
            cancel,
            connector: connector_handle,
            recorder: recorder_handle,
        });

        Ok(())
    }

    /// Check if the background tasks are running.
    pub fn is_running(&self) -> bool {
        self.workers.read().is_some()
    }

    /// Stop the connector, disconnect, and let the recorder drain.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(workers) = self.workers.write().take() else {
            return Ok(());
        };

        info!("Shutting down sensor service");

        workers.cancel.cancel();
        workers
            .connector
            .await
            .map_err(|e| Error::Internal(format!("connector task failed: {}", e)))?;
        // The connector owned the only sender; the recorder finishes once
        // the remaining payloads are written.
        if let Err(e) = workers.recorder.await {
            warn!("Recorder task failed: {}", e);
        }

        Ok(())
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connector.state()
    }

    /// Check if connected to the sensor.
    pub fn is_connected(&self) -> bool {
        self.connector.is_connected()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_connection_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.connector.subscribe_state()
    }

    /// The most recent decoded reading.
    pub fn latest_reading(&self) -> Option<Reading> {
        self.recorder.latest_reading()
    }

    /// Subscribe to reading updates.
    pub fn subscribe_readings(&self) -> broadcast::Receiver<Reading> {
        self.recorder.subscribe_readings()
    }

    /// Start a recording session.
    pub fn start_recording(&self) {
        self.recorder.start_recording();
    }

    /// Stop the recording session.
    pub fn stop_recording(&self) {
        self.recorder.stop_recording();
    }

    /// Check if a recording session is active.
    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// The recorder behind this service.
    pub fn recorder(&self) -> &Arc<ReadingRecorder> {
        &self.recorder
    }

    /// The configuration this service was built with.
    pub fn config(&self) -> &SensorConfig {
        &self.config
    }
}

impl Drop for SensorService {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.get_mut().take() {
            workers.cancel.cancel();
        }
    }
}
