//! InfluxDB line protocol encoding for readings.
//!
//! One reading becomes one newline-terminated line:
//!
//! ```text
//! airquality,sensorId=id1,sensorName=sensorA envPm010=10,stdPm025=8 1672531200000000000
//! ```
//!
//! Escaping is left to [`LineProtocolBuilder`]. It has no escape for line
//! breaks, so ingest refuses identity values that contain one.

use crate::domain::Reading;

use chrono::{DateTime, Utc};
use influxdb_line_protocol::LineProtocolBuilder;

pub const TAG_SENSOR_ID: &str = "sensorId";
pub const TAG_SENSOR_NAME: &str = "sensorName";

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("reading has no measurements")]
    NoMeasurements,

    #[error("timestamp {0} does not fit in nanoseconds")]
    TimestampOutOfRange(DateTime<Utc>),
}

/// Encode `reading` under `measurement` with nanosecond precision.
pub fn encode(measurement: &str, reading: &Reading) -> Result<Vec<u8>, EncodeError> {
    let nanos = reading
        .timestamp
        .timestamp_nanos_opt()
        .ok_or(EncodeError::TimestampOutOfRange(reading.timestamp))?;

    let mut fields = reading.measurements.iter();
    let (first_key, first_value) = fields.next().ok_or(EncodeError::NoMeasurements)?;

    // tag keys in lexical order
    let mut line = LineProtocolBuilder::new()
        .measurement(measurement)
        .tag(TAG_SENSOR_ID, &reading.sensor_id)
        .tag(TAG_SENSOR_NAME, &reading.sensor_name)
        .field(first_key, *first_value);
    for (key, value) in fields {
        line = line.field(key, *value);
    }

    Ok(line.timestamp(nanos).close_line().build())
}
