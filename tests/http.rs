use airquality_ingest::domain::FIELDS;
use airquality_ingest::{router, AppState, Reading, SinkError, StorageSink, ValidationMode};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{TimeZone, Utc};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const VALID: &str = "timestamp=2023-01-01T00:00:00Z&sensorname=sensorA&sensorid=id1\
    &particles_003dl=1.0&particles_005dl=2.0&particles_010dl=3.0&particles_025dl=4.0\
    &particles_050dl=5.0&particles_100dl=6.0&stdPm010=7.0&stdPm025=8.0&stdPm100=9.0\
    &envPm010=10.0&envPm025=11.0&envPm100=12.0";

fn replace_field(key: &str, value: &str) -> String {
    VALID
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((k, _)) if k == key => format!("{k}={value}"),
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Keeps every reading it is handed, in arrival order.
#[derive(Default)]
struct MemorySink {
    readings: Mutex<Vec<Reading>>,
}

impl MemorySink {
    fn new() -> Self {
        Self::default()
    }

    fn readings(&self) -> Vec<Reading> {
        self.readings.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageSink for MemorySink {
    async fn write(&self, reading: Reading) -> Result<(), SinkError> {
        self.readings.lock().unwrap().push(reading);
        Ok(())
    }

    async fn close(&self) {}

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn state(sink: Arc<dyn StorageSink>) -> AppState {
    AppState::new(sink, ValidationMode::FirstError)
}

async fn send(state: &AppState, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
    send_as(state, method, uri, "application/x-www-form-urlencoded", body).await
}

async fn send_as(
    state: &AppState,
    method: &str,
    uri: &str,
    content_type: &str,
    body: &str,
) -> (StatusCode, String) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn valid_post_is_written_once() {
    let sink = Arc::new(MemorySink::new());
    let state = state(sink.clone());

    let (status, body) = send(&state, "POST", "/data", VALID).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let readings = sink.readings();
    assert_eq!(readings.len(), 1);
    let reading = &readings[0];
    assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(reading.sensor_name, "sensorA");
    assert_eq!(reading.sensor_id, "id1");

    let expected: Vec<(&str, f64)> = vec![
        ("envPm010", 10.0),
        ("envPm025", 11.0),
        ("envPm100", 12.0),
        ("particles_003dl", 1.0),
        ("particles_005dl", 2.0),
        ("particles_010dl", 3.0),
        ("particles_025dl", 4.0),
        ("particles_050dl", 5.0),
        ("particles_100dl", 6.0),
        ("stdPm010", 7.0),
        ("stdPm025", 8.0),
        ("stdPm100", 9.0),
    ];
    let got: Vec<(&str, f64)> = reading
        .measurements
        .iter()
        .map(|(k, v)| (k.as_str(), *v))
        .collect();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn any_missing_field_is_a_client_error() {
    for name in FIELDS {
        let sink = Arc::new(MemorySink::new());
        let state = state(sink.clone());

        let (status, body) = send(&state, "POST", "/data", &replace_field(name, "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "field {name}");
        assert_eq!(body, format!("Missing one or more values, including {name}"));
        assert!(sink.readings().is_empty());
    }
}

#[tokio::test]
async fn bad_timestamp_is_a_client_error() {
    let sink = Arc::new(MemorySink::new());
    let state = state(sink.clone());

    let (status, body) = send(&state, "POST", "/data", &replace_field("timestamp", "not-a-date")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Bad date not-a-date");
    assert!(sink.readings().is_empty());
}

#[tokio::test]
async fn non_numeric_measurement_is_a_client_error() {
    let sink = Arc::new(MemorySink::new());
    let state = state(sink.clone());

    let (status, body) = send(&state, "POST", "/data", &replace_field("particles_003dl", "abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Bad value abc for key particles_003dl");
    assert!(sink.readings().is_empty());
}

#[tokio::test]
async fn malformed_body_is_a_client_error() {
    let sink = Arc::new(MemorySink::new());
    let state = state(sink.clone());

    let (status, body) = send(&state, "POST", "/data", "timestamp=%zz").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Could not parse form data");
    assert!(sink.readings().is_empty());
}

const BOUNDARY: &str = "sensor-boundary";

fn multipart(form: &str) -> String {
    let mut body = String::new();
    for (key, value) in form.split('&').filter_map(|pair| pair.split_once('=')) {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{key}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

#[tokio::test]
async fn multipart_post_is_accepted() {
    let sink = Arc::new(MemorySink::new());
    let state = state(sink.clone());
    let content_type = format!("multipart/form-data; boundary={BOUNDARY}");

    let (status, body) = send_as(&state, "POST", "/data", &content_type, &multipart(VALID)).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = send(&state, "POST", "/data", VALID).await;
    assert_eq!(status, StatusCode::OK);
    let readings = sink.readings();
    assert_eq!(readings.len(), 2);
    // same reading whichever way the form was encoded
    assert_eq!(readings[0], readings[1]);
}

#[tokio::test]
async fn multipart_post_is_validated() {
    let sink = Arc::new(MemorySink::new());
    let state = state(sink.clone());
    let content_type = format!("multipart/form-data; boundary={BOUNDARY}");

    let form = replace_field("stdPm025", "eight");
    let (status, body) = send_as(&state, "POST", "/data", &content_type, &multipart(&form)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Bad value eight for key stdPm025");

    let (status, body) =
        send_as(&state, "POST", "/data", "multipart/form-data", &multipart(VALID)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Could not parse form data");
    assert!(sink.readings().is_empty());
}

#[tokio::test]
async fn out_of_range_timestamp_is_a_client_error() {
    let sink = Arc::new(MemorySink::new());
    let state = state(sink.clone());

    let (status, body) = send(&state, "POST", "/data", &replace_field("timestamp", "9999999999")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Bad date 9999999999");
    assert!(sink.readings().is_empty());
}

#[tokio::test]
async fn other_methods_are_rejected() {
    let sink = Arc::new(MemorySink::new());
    let state = state(sink.clone());

    for method in ["GET", "PUT", "DELETE", "PATCH"] {
        let req = Request::builder()
            .method(method)
            .uri(format!("/data?{VALID}"))
            .body(Body::empty())
            .unwrap();
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
        assert_eq!(resp.headers()[header::ALLOW], "POST");
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"Method not supported");
    }
    assert!(sink.readings().is_empty());
}

#[tokio::test]
async fn repeated_posts_are_not_deduplicated() {
    let sink = Arc::new(MemorySink::new());
    let state = state(sink.clone());

    for _ in 0..2 {
        let (status, _) = send(&state, "POST", "/data", VALID).await;
        assert_eq!(status, StatusCode::OK);
    }
    let readings = sink.readings();
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0], readings[1]);
}

#[tokio::test]
async fn query_string_fills_in_missing_fields() {
    let sink = Arc::new(MemorySink::new());
    let state = state(sink.clone());

    let body = replace_field("sensorid", "");
    let (status, _) = send(&state, "POST", "/data?sensorid=fromquery", &body).await;
    // an empty body value still shadows the query value
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body: String = VALID
        .split('&')
        .filter(|pair| !pair.starts_with("sensorid="))
        .collect::<Vec<_>>()
        .join("&");
    let (status, _) = send(&state, "POST", "/data?sensorid=fromquery", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sink.readings()[0].sensor_id, "fromquery");
}

#[tokio::test]
async fn collect_mode_lists_every_problem() {
    let sink = Arc::new(MemorySink::new());
    let state = AppState::new(sink.clone(), ValidationMode::Collect);

    let body = replace_field("stdPm010", "")
        .replace("stdPm025=8.0", "stdPm025=eight")
        .replace("timestamp=2023-01-01T00:00:00Z", "timestamp=yesterday");
    let (status, msg) = send(&state, "POST", "/data", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        msg,
        "Missing one or more values, including stdPm010; Bad date yesterday; \
         Bad value eight for key stdPm025"
    );
    assert!(sink.readings().is_empty());
}

struct RefusingSink {
    unavailable: bool,
}

#[async_trait]
impl StorageSink for RefusingSink {
    async fn write(&self, _reading: Reading) -> Result<(), SinkError> {
        if self.unavailable {
            Err(SinkError::QueueFull)
        } else {
            Err(SinkError::Influx(airquality_ingest::influx::Error::ApiError {
                code: reqwest::StatusCode::BAD_REQUEST,
                message: "partial write".to_string(),
            }))
        }
    }

    async fn close(&self) {}

    fn name(&self) -> &'static str {
        "refusing"
    }
}

#[tokio::test]
async fn full_queue_is_service_unavailable() {
    let state = state(Arc::new(RefusingSink { unavailable: true }));
    let (status, body) = send(&state, "POST", "/data", VALID).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "Storage write failed: write queue is full");
}

#[tokio::test]
async fn other_storage_failures_are_server_errors() {
    let state = state(Arc::new(RefusingSink { unavailable: false }));
    let (status, body) = send(&state, "POST", "/data", VALID).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("Storage write failed: server responded with error [400"));
}

#[tokio::test]
async fn health_names_the_backend() {
    let state = state(Arc::new(MemorySink::new()));
    let (status, body) = send(&state, "GET", "/health", "").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json, serde_json::json!({"status": "ok", "backend": "memory"}));
}
