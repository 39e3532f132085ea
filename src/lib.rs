//! Particulate-matter sensor ingest service.
//!
//! Sensors `POST /data` a form reading; the service validates it,
//! normalizes the timestamp to UTC and hands it to a [`sink::StorageSink`]
//! (InfluxDB in production).

pub mod config;
pub mod domain;
pub mod influx;
pub mod ingest;
pub mod line_protocol;
pub mod server;
pub mod sink;
pub mod timestamp;

pub use domain::Reading;
pub use ingest::{IngestError, ValidationMode};
pub use server::{router, AppState};
pub use sink::{LogSink, SinkError, StorageSink};
