//! ==============================================================================
//! main.rs - air quality ingest entry point
//! ==============================================================================
//!
//! purpose:
//!     receives particulate-matter readings from sensors scattered around the
//!     house/garden and persists them to influxdb for grafana & co.
//!
//! responsibilities:
//!     - parse cli / environment overrides
//!     - load configuration (config/ingest.toml)
//!     - install logging
//!     - build the storage sink ONCE and inject it into the router
//!     - serve http until ctrl-c / sigterm, then flush the sink
//!
//! architecture:
//!
//!     ┌────────────┐  POST /data   ┌─────────────────────────────────────┐
//!     │ sensor     │ ────────────► │ axum router (server.rs)             │
//!     │ (pm2.5 etc)│               │   └─ ingest.rs (validate, coerce)   │
//!     └────────────┘               │        └─ Arc<dyn StorageSink>      │
//!                                  └──────────────────┬──────────────────┘
//!                                                     │ line protocol
//!                                                     ▼
//!                                               ┌──────────┐
//!                                               │ influxdb │
//!                                               └──────────┘
//!
//! ==============================================================================

use airquality_ingest::config::{Backend, IngestConfig};
use airquality_ingest::influx::InfluxSink;
use airquality_ingest::{router, AppState, LogSink, StorageSink};

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Particulate-matter sensor ingest service
#[derive(Parser, Debug)]
#[command(name = "airquality-ingest")]
#[command(about = "Receives air quality sensor readings and stores them in InfluxDB")]
#[command(version)]
struct Args {
    /// Config file (defaults to config/ingest.toml or ../config/ingest.toml)
    #[arg(short, long, env = "AIRQUALITY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8080
    #[arg(short, long, env = "AIRQUALITY_LISTEN")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins if set
    #[arg(long, env = "AIRQUALITY_LOG")]
    log_level: Option<String>,

    /// InfluxDB base URL
    #[arg(long, env = "INFLUX_URL")]
    influx_url: Option<String>,

    /// InfluxDB API token
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    influx_token: Option<String>,

    /// InfluxDB organization
    #[arg(long, env = "INFLUX_ORG")]
    influx_org: Option<String>,

    /// InfluxDB bucket
    #[arg(long, env = "INFLUX_BUCKET")]
    influx_bucket: Option<String>,
}

impl Args {
    fn apply(self, config: &mut IngestConfig) {
        let influx = &mut config.storage.influxdb;
        if let Some(v) = self.listen {
            config.server.listen = v;
        }
        if let Some(v) = self.log_level {
            config.logging.level = v;
        }
        if let Some(v) = self.influx_url {
            influx.url = v;
        }
        if let Some(v) = self.influx_token {
            influx.token = v;
        }
        if let Some(v) = self.influx_org {
            influx.org = v;
        }
        if let Some(v) = self.influx_bucket {
            influx.bucket = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();

    // step 1: load configuration (before logging, so it can set the level)
    let config_path = args.config.take().or_else(IngestConfig::locate);
    let mut config = match &config_path {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default(),
    };
    args.apply(&mut config);

    // step 2: logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!("===========================================================");
    tracing::info!("  Air Quality Ingest v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("===========================================================");
    match &config_path {
        Some(path) => tracing::info!("[CONFIG] Loaded from {}", path.display()),
        None => tracing::warn!("[CONFIG] No config file found - using defaults"),
    }
    config.log_summary();

    // step 3: storage sink, built once and shared by every request
    let sink: Arc<dyn StorageSink> = match config.storage.backend {
        Backend::Influxdb => Arc::new(
            InfluxSink::new(&config.storage.influxdb).context("failed to create influxdb sink")?,
        ),
        Backend::Log => Arc::new(LogSink::new()),
    };

    // step 4: serve until asked to stop
    let app = router(AppState::new(sink.clone(), config.ingest.validation));
    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;
    tracing::info!("[STARTUP] ✓ Listening on http://{}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // step 5: flush buffered writes even if the server failed
    tracing::info!("[SHUTDOWN] Flushing storage sink...");
    sink.close().await;
    tracing::info!("[SHUTDOWN] ✓ Done");

    served.context("http server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for sigterm");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("[SHUTDOWN] Signal received");
}
