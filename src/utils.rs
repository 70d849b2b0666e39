//! Utility functions for the distance-sensor-ble crate.

/// Source of wall-clock time for stamping readings.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        epoch_millis()
    }
}

/// Current wall-clock time in epoch milliseconds.
///
/// # Example
///
/// ```
/// use distance_sensor_ble::epoch_millis;
///
/// // Later than 2024-01-01T00:00:00Z.
/// assert!(epoch_millis() > 1_704_067_200_000);
/// ```
#[inline]
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
