//! GATT lookups on a connected sensor.

use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, ValueNotification};
use btleplug::platform::Peripheral;
use futures::stream::Stream;
use std::pin::Pin;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Stream of characteristic notifications from one peripheral.
pub type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Check if discovered services include `service_uuid`.
///
/// Services must have been discovered first.
pub fn has_service(peripheral: &Peripheral, service_uuid: &Uuid) -> bool {
    peripheral
        .services()
        .iter()
        .any(|service| service.uuid == *service_uuid)
}

/// Find a notifying characteristic within a service.
pub fn find_characteristic(
    peripheral: &Peripheral,
    service_uuid: &Uuid,
    characteristic_uuid: &Uuid,
) -> Result<Characteristic> {
    let services = peripheral.services();
    let service = services
        .iter()
        .find(|service| service.uuid == *service_uuid)
        .ok_or_else(|| Error::ServiceNotFound {
            uuid: service_uuid.to_string(),
        })?;

    for characteristic in &service.characteristics {
        debug!(
            "Found characteristic: {} in service {}, properties: {:?}",
            characteristic.uuid, service.uuid, characteristic.properties
        );
    }

    service
        .characteristics
        .iter()
        .find(|c| c.uuid == *characteristic_uuid && supports_notify(c.properties))
        .cloned()
        .ok_or_else(|| Error::CharacteristicNotFound {
            uuid: characteristic_uuid.to_string(),
        })
}

/// Open the notification stream and enable notifications on `characteristic`.
///
/// The stream is opened before subscribing so the first notification is not
/// missed.
pub async fn subscribe(
    peripheral: &Peripheral,
    characteristic: &Characteristic,
) -> Result<NotificationStream> {
    let notifications = peripheral.notifications().await.map_err(Error::Bluetooth)?;

    peripheral
        .subscribe(characteristic)
        .await
        .map_err(Error::Bluetooth)?;

    debug!(
        "Successfully subscribed to notifications from {}",
        characteristic.uuid
    );

    Ok(notifications)
}

fn supports_notify(properties: CharPropFlags) -> bool {
    properties.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
}
