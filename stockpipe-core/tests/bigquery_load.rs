//! Integration tests for the BigQuery sink against a local mock server.
//!
//! Covers the token exchange, the multipart load job upload, polling until the
//! job is DONE, a job that reports an errorResult, and a job that never finishes.

use chrono::NaiveDate;
use polars::prelude::*;
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use stockpipe_core::warehouse::{BigQuerySink, TableRef, WarehouseError, WarehouseSink};
use tempfile::NamedTempFile;
use tokio::runtime::Runtime;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_KEY_PEM: &str = include_str!("fixtures/test_service_account_key.pem");
const PROJECT: &str = "acme-analytics";

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

// Field order matters: the mock server is dropped (and verified) before its runtime.
struct Harness {
    server: MockServer,
    key_file: NamedTempFile,
    rt: Runtime,
}

impl Harness {
    fn start() -> Self {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());

        let key = json!({
            "type": "service_account",
            "project_id": PROJECT,
            "private_key_id": "test-key",
            "private_key": TEST_KEY_PEM,
            "client_email": "loader@acme-analytics.iam.gserviceaccount.com",
            "token_uri": format!("{}/token", server.uri()),
        });
        let mut key_file = NamedTempFile::new().unwrap();
        key_file.write_all(key.to_string().as_bytes()).unwrap();

        Self {
            server,
            key_file,
            rt,
        }
    }

    fn mount(&self, mock: Mock) {
        self.rt.block_on(mock.mount(&self.server));
    }

    fn token_ok(&self) {
        self.mount(
            Mock::given(method("POST"))
                .and(path("/token"))
                .and(body_string_contains("jwt-bearer"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "access_token": "test-token",
                    "expires_in": 3600,
                    "token_type": "Bearer"
                })))
                .expect(1),
        );
    }

    fn upload_running(&self) {
        self.mount(
            Mock::given(method("POST"))
                .and(path(format!("/upload/projects/{PROJECT}/jobs")))
                .and(query_param("uploadType", "multipart"))
                .and(header("authorization", "Bearer test-token"))
                .and(body_string_contains("WRITE_TRUNCATE"))
                .and(body_string_contains("\"symbol\":\"AAPL\""))
                .respond_with(ResponseTemplate::new(200).set_body_json(job("RUNNING", None)))
                .expect(1),
        );
    }

    fn poll_returns(&self, body: serde_json::Value) {
        self.mount(
            Mock::given(method("GET"))
                .and(path(format!("/projects/{PROJECT}/jobs/job_1")))
                .and(query_param("location", "US"))
                .and(header("authorization", "Bearer test-token"))
                .respond_with(ResponseTemplate::new(200).set_body_json(body)),
        );
    }

    fn sink(&self) -> BigQuerySink {
        let base = self.server.uri();
        BigQuerySink::new(self.key_file.path())
            .unwrap()
            .with_endpoints(&base, &format!("{base}/upload"))
            .with_poll_interval(Duration::from_millis(10))
            .with_job_timeout(Duration::from_secs(5))
    }
}

fn job(state: &str, error: Option<(&str, &str)>) -> serde_json::Value {
    let mut status = json!({ "state": state });
    if let Some((reason, message)) = error {
        status["errorResult"] = json!({ "reason": reason, "message": message });
    }
    json!({
        "jobReference": { "projectId": PROJECT, "jobId": "job_1", "location": "US" },
        "status": status
    })
}

fn frame() -> DataFrame {
    DataFrame::new(vec![
        Column::new(
            "date".into(),
            vec![
                NaiveDate::from_ymd_opt(2024, 5, 31).unwrap(),
                NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            ],
        ),
        Column::new("close".into(), &[190.5, 192.25]),
        Column::new("symbol".into(), &["AAPL", "AAPL"]),
    ])
    .unwrap()
}

fn table() -> TableRef {
    TableRef::new(PROJECT, "market", "daily_prices")
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[test]
fn uploads_then_polls_until_done() {
    let h = Harness::start();
    h.token_ok();
    h.upload_running();
    h.poll_returns(job("DONE", None));

    let stats = h.sink().replace_table(&table(), &mut frame()).unwrap();

    assert_eq!(stats.job_id, "job_1");
    assert_eq!(stats.rows, 2);
}

#[test]
fn error_result_becomes_job_failure() {
    let h = Harness::start();
    h.token_ok();
    h.upload_running();
    h.poll_returns(job(
        "DONE",
        Some(("invalid", "Provided Schema does not match Table")),
    ));

    let err = h.sink().replace_table(&table(), &mut frame()).unwrap_err();

    match err {
        WarehouseError::JobFailed { job_id, message } => {
            assert_eq!(job_id, "job_1");
            assert!(message.contains("Provided Schema does not match"), "{message}");
        }
        other => panic!("expected JobFailed, got {other:?}"),
    }
}

#[test]
fn job_that_never_finishes_times_out() {
    let h = Harness::start();
    h.token_ok();
    h.upload_running();
    h.poll_returns(job("RUNNING", None));

    let sink = h.sink().with_job_timeout(Duration::from_millis(100));
    let err = sink.replace_table(&table(), &mut frame()).unwrap_err();

    assert!(
        matches!(err, WarehouseError::Timeout { ref job_id, .. } if job_id == "job_1"),
        "{err:?}"
    );
}

#[test]
fn rejected_token_exchange_is_an_auth_error() {
    let h = Harness::start();
    h.mount(
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant")),
    );

    let err = h.sink().replace_table(&table(), &mut frame()).unwrap_err();

    match err {
        WarehouseError::Auth(message) => assert!(message.contains("invalid_grant"), "{message}"),
        other => panic!("expected Auth, got {other:?}"),
    }
}

#[test]
fn rejected_upload_reports_the_response_body() {
    let h = Harness::start();
    h.token_ok();
    h.mount(
        Mock::given(method("POST"))
            .and(path(format!("/upload/projects/{PROJECT}/jobs")))
            .respond_with(
                ResponseTemplate::new(403).set_body_string("Access Denied: Dataset market"),
            ),
    );

    let err = h.sink().replace_table(&table(), &mut frame()).unwrap_err();

    match err {
        WarehouseError::Http(message) => {
            assert!(message.contains("403"), "{message}");
            assert!(message.contains("Access Denied: Dataset market"), "{message}");
        }
        other => panic!("expected Http, got {other:?}"),
    }
}
