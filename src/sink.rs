//! ==============================================================================
//! sink.rs - storage abstraction
//! ==============================================================================
//!
//! purpose:
//!     the ingest handler only knows it has "somewhere to put a reading".
//!     this trait is that somewhere. the concrete backend is picked once at
//!     startup (see main.rs) and handed to the router as `Arc<dyn StorageSink>`.
//!
//! backends:
//!     - InfluxSink (influx.rs): batched, non-blocking writes to influxdb
//!     - LogSink: logs readings and drops them (no database needed)
//!
//! test doubles live with the tests that need them (tests/http.rs).
//!
//! ==============================================================================

use crate::domain::Reading;
use crate::influx;
use crate::line_protocol;

use async_trait::async_trait;

/// Failures a sink can report while the request is still open.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("write queue is full")]
    QueueFull,

    #[error("sink is closed")]
    Closed,

    #[error(transparent)]
    Encode(#[from] line_protocol::EncodeError),

    #[error(transparent)]
    Influx(#[from] influx::Error),
}

impl SinkError {
    /// true when retrying later could succeed (maps to 503)
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::QueueFull | Self::Closed)
    }
}

#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Hand one reading to the backend. May return before it is durable.
    async fn write(&self, reading: Reading) -> Result<(), SinkError>;

    /// Flush anything buffered and stop background work. Called once on shutdown.
    async fn close(&self);

    /// short backend name for logs and /health
    fn name(&self) -> &'static str;
}

// ==============================================================================
// log sink
// ==============================================================================

/// Logs every reading and keeps nothing.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        tracing::info!("Using LOG sink (readings are not persisted)");
        Self
    }
}

#[async_trait]
impl StorageSink for LogSink {
    async fn write(&self, reading: Reading) -> Result<(), SinkError> {
        tracing::info!(
            timestamp = %reading.timestamp,
            sensor_name = %reading.sensor_name,
            sensor_id = %reading.sensor_id,
            measurements = ?reading.measurements,
            "reading"
        );
        Ok(())
    }

    async fn close(&self) {}

    fn name(&self) -> &'static str {
        "log"
    }
}
