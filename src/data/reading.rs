//! Sensor reading data structures.
//!
//! The sensor pushes one JSON object per notification:
//!
//! ```text
//! {"distance":12,"flux":5,"temperature":21}
//! ```
//!
//! The receiver may add a `timeStamp` field holding the capture time in
//! epoch milliseconds before the record is persisted.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// JSON key of the receiver-side capture timestamp.
pub const TIMESTAMP_KEY: &str = "timeStamp";

/// A single decoded sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reading {
    /// Measured distance in centimetres.
    pub distance: i64,

    /// Magnetic flux, in sensor units.
    pub flux: i64,

    /// Temperature in degrees Celsius.
    pub temperature: i64,

    /// Capture time in epoch milliseconds, if the record was stamped.
    #[serde(
        rename = "timeStamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
}

impl Reading {
    /// Create a reading without a timestamp.
    pub fn new(distance: i64, flux: i64, temperature: i64) -> Self {
        Self {
            distance,
            flux,
            temperature,
            timestamp: None,
        }
    }

    /// Decode a reading from JSON text.
    ///
    /// All three measurement fields must be present and integral.
    /// Unknown fields are ignored.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode the reading as compact JSON text.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The capture time as a UTC date, if stamped and in range.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "distance={}, flux={}, temperature={}",
            self.distance, self.flux, self.temperature
        )
    }
}

/// Wire record used when stamping a payload.
///
/// Same shape as [`Reading`] but keeps any extra fields the sensor sent so
/// that stamping only ever adds `timeStamp`. Any incoming `timeStamp` is
/// accepted whatever its JSON type, since it gets replaced anyway.
#[derive(Debug, Serialize, Deserialize)]
struct StampedRecord {
    distance: i64,
    flux: i64,
    temperature: i64,
    #[serde(flatten)]
    extra: Map<String, Value>,
    #[serde(
        rename = "timeStamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    timestamp: Option<Value>,
}

/// Decode `text` as a reading, set its `timeStamp` to `epoch_millis` and
/// re-encode it.
///
/// An existing `timeStamp` is overwritten. Fails if the text is not a JSON
/// object carrying integer `distance`, `flux` and `temperature` fields.
pub fn stamp_payload(text: &str, epoch_millis: i64) -> Result<String> {
    let mut record: StampedRecord = serde_json::from_str(text)?;
    record.timestamp = Some(Value::from(epoch_millis));
    Ok(serde_json::to_string(&record)?)
}
