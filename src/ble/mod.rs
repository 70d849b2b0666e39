//! BLE communication module.
//!
//! This module provides the low-level Bluetooth Low Energy pieces used to
//! find the sensor and receive its notifications.

pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod uuids;

pub use connection::{ConnectionState, ConnectorCommand, ConnectorEvent, ConnectorState};
pub use scanner::BleScanner;
pub use uuids::*;
