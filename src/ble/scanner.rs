//! BLE scanning functionality.
//!
//! Wraps the platform adapter used to look for the sensor.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::Stream;
use parking_lot::RwLock;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::uuids::advertises_service;
use crate::error::{Error, Result};

/// Stream of adapter events.
pub type CentralEventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// BLE scanner for the sensor service.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Service the sensor advertises.
    service_uuid: Uuid,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
}

impl BleScanner {
    /// Create a new BLE scanner on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(service_uuid: Uuid) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, service_uuid))
    }

    /// Create a new BLE scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter, service_uuid: Uuid) -> Self {
        Self {
            adapter,
            service_uuid,
            is_scanning: Arc::new(RwLock::new(false)),
        }
    }

    /// Open the adapter's event stream.
    pub async fn events(&self) -> Result<CentralEventStream> {
        self.adapter.events().await.map_err(Error::Bluetooth)
    }

    /// Start scanning for peripherals advertising the sensor service.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started, typically because the
    /// adapter is powered off.
    pub async fn start_scanning(&self) -> Result<()> {
        if self.is_scanning() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!("Starting BLE scan for service {}", self.service_uuid);

        self.adapter
            .start_scan(ScanFilter {
                services: vec![self.service_uuid],
            })
            .await
            .map_err(Error::Bluetooth)?;

        *self.is_scanning.write() = true;

        Ok(())
    }

    /// Stop scanning.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !self.is_scanning() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    /// Forget the scanning flag after the adapter went away.
    pub fn reset(&self) {
        *self.is_scanning.write() = false;
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Look up a discovered peripheral and return it if it advertises the
    /// sensor service.
    ///
    /// Not every platform honours the scan filter, so the advertised
    /// services are checked again here.
    pub async fn resolve_sensor(&self, id: &PeripheralId) -> Option<Peripheral> {
        let peripheral = match self.adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        if !advertises_service(&properties.services, &self.service_uuid) {
            trace!("Ignoring peripheral {:?} without sensor service", id);
            return None;
        }

        debug!(
            "Sensor found: {} ({:?}, RSSI {:?})",
            id, properties.local_name, properties.rssi
        );

        Some(peripheral)
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}
