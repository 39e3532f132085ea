use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// form key carrying the reading timestamp
pub const TIMESTAMP: &str = "timestamp";
/// form key carrying the sensor name
pub const SENSOR_NAME: &str = "sensorname";
/// form key carrying the sensor id
pub const SENSOR_ID: &str = "sensorid";

/// every field a sensor must post, in validation order
pub const FIELDS: [&str; 15] = [
    TIMESTAMP,
    SENSOR_NAME,
    SENSOR_ID,
    "particles_003dl", // 00.3 µm per 0.1 liters
    "particles_005dl", // 00.5 µm per 0.1 liters
    "particles_010dl", // 01.0 µm per 0.1 liters
    "particles_025dl", // 02.5 µm per 0.1 liters
    "particles_050dl", // 05.0 µm per 0.1 liters
    "particles_100dl", // 10.0 µm per 0.1 liters
    "stdPm010",        // standardized readings
    "stdPm025",
    "stdPm100",
    "envPm010", // environmental readings
    "envPm025",
    "envPm100",
];

/// fields kept as strings; everything else is a measurement
pub const IDENTITY_FIELDS: [&str; 3] = [TIMESTAMP, SENSOR_NAME, SENSOR_ID];

pub fn is_identity(field: &str) -> bool {
    IDENTITY_FIELDS.contains(&field)
}

/// a fully validated particulate-matter reading
///
/// only the ingest pipeline builds these, so a `Reading` in hand always has
/// a parsed timestamp, non-empty identity strings and finite measurements.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub sensor_name: String,
    pub sensor_id: String,
    /// measurement channel -> value (e.g. "stdPm025" -> 8.0)
    pub measurements: BTreeMap<String, f64>,
}
