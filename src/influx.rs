//! ==============================================================================
//! influx.rs - influxdb v2 write client and batching sink
//! ==============================================================================
//!
//! purpose:
//!     persists readings to influxdb through its http write api
//!     (`/api/v2/write`). writes are non-blocking from the request's point of
//!     view: the handler only pushes an encoded line into a queue.
//!
//! tasks:
//!
//! ```text
//!     ┌──────────────┐  lines   ┌───────────────┐  batch   ┌──────────┐
//!     │ /data handler│ ───────► │ writer task   │ ───────► │ influxdb │
//!     │ (many)       │ bounded  │ (batch, tick) │  http    └──────────┘
//!     └──────────────┘  queue   └───────┬───────┘
//!                                       │ write errors (bounded)
//!                                       ▼
//!                               ┌───────────────┐
//!                               │ observer task │ ──► tracing::warn!
//!                               └───────────────┘
//! ```
//!
//! durability:
//!     a batch that influxdb refuses is logged and dropped. the sensor already
//!     got its 200 by then, so such losses only show up in the logs.
//!
//! relationships:
//!     - implements: sink.rs (StorageSink)
//!     - uses: line_protocol.rs (encoding), config.rs (InfluxConfig)
//!
//! ==============================================================================

use crate::config::InfluxConfig;
use crate::domain::Reading;
use crate::line_protocol;
use crate::sink::{SinkError, StorageSink};

use async_trait::async_trait;
use reqwest::{IntoUrl, Method, StatusCode};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

// ==============================================================================
// http client
// ==============================================================================

/// Errors talking to the influxdb http api.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("base URL error: {0}")]
    BaseUrl(#[source] reqwest::Error),

    #[error("request URL error: {0}")]
    RequestUrl(#[from] url::ParseError),

    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Minimal client for `POST /api/v2/write`.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    token: Option<String>,
    org: String,
    bucket: String,
    http_client: reqwest::Client,
}

impl Client {
    pub fn new<U: IntoUrl>(
        base_url: U,
        org: impl Into<String>,
        bucket: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into_url().map_err(Error::BaseUrl)?,
            token: None,
            org: org.into(),
            bucket: bucket.into(),
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(Error::Build)?,
        })
    }

    /// token sent as `Authorization: Token <token>`
    pub fn with_token<S: Into<String>>(mut self, token: S) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    /// Write newline-terminated line protocol with nanosecond precision.
    pub async fn write_lines(&self, body: impl Into<reqwest::Body>) -> Result<()> {
        let mut url = self.base_url.join("api/v2/write")?;
        url.query_pairs_mut()
            .append_pair("org", &self.org)
            .append_pair("bucket", &self.bucket)
            .append_pair("precision", "ns");

        let mut req = self
            .http_client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if let Some(token) = &self.token {
            req = req.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
        }

        let resp = req.send().await.map_err(|source| Error::RequestSend {
            method: Method::POST,
            url: url.to_string(),
            source,
        })?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            Err(Error::ApiError {
                code: status,
                message,
            })
        }
    }
}

// ==============================================================================
// batching sink
// ==============================================================================

enum Command {
    Line(Vec<u8>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct Tasks {
    writer: JoinHandle<()>,
    observer: JoinHandle<()>,
}

/// Non-blocking influxdb sink.
///
/// `write` encodes and enqueues; a background writer batches lines and posts
/// them, and an observer task logs whatever the writer could not deliver.
pub struct InfluxSink {
    measurement: String,
    tx: mpsc::Sender<Command>,
    tasks: Mutex<Option<Tasks>>,
}

impl InfluxSink {
    /// Build the client from config and start the writer and observer tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        let client = Client::new(
            config.url.as_str(),
            config.org.clone(),
            config.bucket.clone(),
            Duration::from_secs(config.timeout_seconds),
        )?
        .with_token(config.token.clone());

        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &InfluxConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (err_tx, err_rx) = mpsc::channel(config.error_capacity.max(1));

        let writer = Writer {
            client,
            rx,
            errors: err_tx,
            batch: Vec::new(),
            pending: 0,
            batch_size: config.batch_size.max(1),
        };
        let flush_interval = Duration::from_millis(config.flush_interval_ms.max(1));

        let writer = tokio::spawn(writer.run(flush_interval));
        let observer = tokio::spawn(observe_errors(err_rx));

        tracing::info!(
            url = %config.url,
            org = %config.org,
            bucket = %config.bucket,
            batch_size = config.batch_size,
            "influxdb sink started"
        );

        Self {
            measurement: config.measurement.clone(),
            tx,
            tasks: Mutex::new(Some(Tasks { writer, observer })),
        }
    }

    /// Push everything queued so far to influxdb and wait for the attempt.
    pub async fn flush(&self) -> Result<(), SinkError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .await
            .map_err(|_| SinkError::Closed)?;
        done_rx.await.map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl StorageSink for InfluxSink {
    async fn write(&self, reading: Reading) -> Result<(), SinkError> {
        let line = line_protocol::encode(&self.measurement, &reading)?;
        self.tx.try_send(Command::Line(line)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    async fn close(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };

        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
        if let Err(e) = tasks.writer.await {
            tracing::error!(error = %e, "influxdb writer task failed");
        }
        // the writer dropped its error sender, so the observer drains and ends
        if let Err(e) = tasks.observer.await {
            tracing::error!(error = %e, "influxdb error observer failed");
        }
        tracing::info!("influxdb sink closed");
    }

    fn name(&self) -> &'static str {
        "influxdb"
    }
}

struct Writer {
    client: Client,
    rx: mpsc::Receiver<Command>,
    errors: mpsc::Sender<SinkError>,
    /// closed lines, each ending in '\n'
    batch: Vec<u8>,
    pending: usize,
    batch_size: usize,
}

impl Writer {
    async fn run(mut self, flush_interval: Duration) {
        // first tick one interval out; `interval` would fire immediately
        let mut ticker =
            tokio::time::interval_at(Instant::now() + flush_interval, flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(Command::Line(line)) => {
                        self.push(line);
                        if self.pending >= self.batch_size {
                            self.flush().await;
                        }
                    }
                    Some(Command::Flush(done)) => {
                        self.flush().await;
                        let _ = done.send(());
                    }
                    Some(Command::Shutdown(done)) => {
                        self.rx.close();
                        // anything enqueued before the shutdown still goes out
                        let mut waiters = vec![done];
                        while let Ok(cmd) = self.rx.try_recv() {
                            match cmd {
                                Command::Line(line) => self.push(line),
                                Command::Flush(w) | Command::Shutdown(w) => waiters.push(w),
                            }
                        }
                        self.flush().await;
                        for w in waiters {
                            let _ = w.send(());
                        }
                        break;
                    }
                    None => {
                        self.flush().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.flush().await,
            }
        }
    }

    fn push(&mut self, line: Vec<u8>) {
        self.batch.extend_from_slice(&line);
        self.pending += 1;
    }

    async fn flush(&mut self) {
        if self.pending == 0 {
            return;
        }
        let body = std::mem::take(&mut self.batch);
        let count = std::mem::take(&mut self.pending);
        match self.client.write_lines(body).await {
            Ok(()) => tracing::debug!(points = count, "flushed batch to influxdb"),
            Err(e) => {
                tracing::debug!(points = count, "dropping batch after failed write");
                // observer gone means we are shutting down; nothing left to tell
                let _ = self.errors.send(SinkError::Influx(e)).await;
            }
        }
    }
}

/// Log write errors until the writer goes away.
async fn observe_errors(mut errors: mpsc::Receiver<SinkError>) {
    while let Some(err) = errors.recv().await {
        tracing::warn!(error = %err, "write error");
    }
}
