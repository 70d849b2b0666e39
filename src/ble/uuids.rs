//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants identifying the distance sensor.

use uuid::Uuid;

/// Service advertised by the distance sensor.
pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0xdca96e5a_fe28_4697_9c1a_d67181d8fa8b);

/// Characteristic streaming JSON readings (Notify).
pub const READING_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x77eed7e7_4bf1_478d_a432_440428ed4acf);

/// Check if an advertised service list contains the given service.
pub fn advertises_service(services: &[Uuid], service_uuid: &Uuid) -> bool {
    services.iter().any(|uuid| uuid == service_uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            SENSOR_SERVICE_UUID.to_string(),
            "dca96e5a-fe28-4697-9c1a-d67181d8fa8b"
        );
        assert_eq!(
            READING_CHARACTERISTIC_UUID.to_string(),
            "77eed7e7-4bf1-478d-a432-440428ed4acf"
        );
    }

    #[test]
    fn test_advertises_service() {
        let services = vec![Uuid::from_u128(0x180a), SENSOR_SERVICE_UUID];
        assert!(advertises_service(&services, &SENSOR_SERVICE_UUID));
        assert!(!advertises_service(&services, &READING_CHARACTERISTIC_UUID));
        assert!(!advertises_service(&[], &SENSOR_SERVICE_UUID));
    }
}
