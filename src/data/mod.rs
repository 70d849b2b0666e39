//! Data structures for sensor readings.
//!
//! This module contains the decoded reading type, the timestamp transform
//! applied before persisting, and the append-only reading log.

pub mod log_file;
pub mod reading;

pub use log_file::{LogFile, DEFAULT_LOG_FILE_NAME};
pub use reading::{stamp_payload, Reading, TIMESTAMP_KEY};
