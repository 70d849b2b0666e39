// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # distance-sensor-ble
//!
//! A headless recorder for a Bluetooth Low Energy distance sensor.
//!
//! The sensor advertises service `dca96e5a-fe28-4697-9c1a-d67181d8fa8b` and
//! pushes one JSON object per notification on characteristic
//! `77eed7e7-4bf1-478d-a432-440428ed4acf`:
//!
//! ```text
//! {"distance":12,"flux":5,"temperature":21}
//! ```
//!
//! Each reading is optionally stamped with the capture time and appended as
//! one line to `sensorData.txt`. The latest reading, the connection state and
//! the recording flag are available through [`SensorService`].
//!
//! ## Features
//!
//! - **Single-sensor connection**: scan, connect, discover and subscribe,
//!   driven by an explicit state machine
//! - **Append-only log**: newline-delimited JSON, in arrival order
//! - **Timestamps**: optional `timeStamp` field in epoch milliseconds
//! - **Display projections**: query methods and broadcast channels, no UI
//!   dependency
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use distance_sensor_ble::{Result, SensorConfig, SensorService};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let service = SensorService::new(SensorConfig::default()).await?;
//!     service.start()?;
//!
//!     let mut readings = service.subscribe_readings();
//!     while let Ok(reading) = readings.recv().await {
//!         println!("{}", reading);
//!     }
//!
//!     service.shutdown().await
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod ble;
pub mod config;
pub mod connector;
pub mod data;
pub mod error;
pub mod recorder;
pub mod service;
pub mod utils;

// Re-exports for convenience
pub use ble::connection::ConnectionState;
pub use ble::uuids::{READING_CHARACTERISTIC_UUID, SENSOR_SERVICE_UUID};
pub use config::{RecordingPolicy, SensorConfig};
pub use connector::DeviceConnector;
pub use data::{stamp_payload, LogFile, Reading};
pub use error::{Error, Result};
pub use recorder::{PayloadOutcome, ReadingRecorder};
pub use service::SensorService;
pub use utils::{epoch_millis, Clock, SystemClock};
