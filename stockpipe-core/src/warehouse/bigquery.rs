//! BigQuery sink: uploads a frame as newline-delimited JSON through a load job
//! with `WRITE_TRUNCATE`, so the destination is replaced atomically by the service.

use super::credentials::{ServiceAccountKey, BIGQUERY_SCOPE};
use super::{LoadStats, TableRef, WarehouseError, WarehouseSink};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const UPLOAD_BASE: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";
const BOUNDARY: &str = "stockpipe_load_boundary";

/// One column of a load job schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// Map a frame's dtypes onto BigQuery column types.
pub fn schema_fields(frame: &DataFrame) -> Result<Vec<FieldSchema>, WarehouseError> {
    frame
        .get_columns()
        .iter()
        .map(|column| {
            let field_type = match column.dtype() {
                DataType::Float32 | DataType::Float64 => "FLOAT",
                DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64 => "INTEGER",
                DataType::Boolean => "BOOLEAN",
                DataType::String => "STRING",
                DataType::Date => "DATE",
                DataType::Datetime(_, None) => "DATETIME",
                DataType::Datetime(_, Some(_)) => "TIMESTAMP",
                other => {
                    return Err(WarehouseError::UnsupportedType {
                        column: column.name().to_string(),
                        dtype: other.to_string(),
                    })
                }
            };
            Ok(FieldSchema {
                name: column.name().to_string(),
                field_type: field_type.to_string(),
                mode: "NULLABLE".to_string(),
            })
        })
        .collect()
}

/// Serialize a frame as one JSON object per line.
pub fn encode_ndjson(frame: &mut DataFrame) -> Result<Vec<u8>, WarehouseError> {
    let mut buf = Vec::new();
    JsonWriter::new(&mut buf)
        .with_json_format(JsonFormat::JsonLines)
        .finish(frame)
        .map_err(|e| WarehouseError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Load job configuration replacing `table` with data in `fields` layout.
pub fn load_job_config(table: &TableRef, fields: &[FieldSchema]) -> serde_json::Value {
    json!({
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": table.project,
                    "datasetId": table.dataset,
                    "tableId": table.table,
                },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": "WRITE_TRUNCATE",
                "createDisposition": "CREATE_IF_NEEDED",
                "schema": { "fields": fields },
            }
        }
    })
}

/// Assemble a `multipart/related` upload body: job metadata, then the data.
fn multipart_body(metadata: &serde_json::Value, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 1024);
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// BigQuery full-replace sink authenticated with a service-account key file.
pub struct BigQuerySink {
    client: reqwest::blocking::Client,
    credentials_path: PathBuf,
    api_base: String,
    upload_base: String,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl BigQuerySink {
    pub fn new(credentials_path: impl Into<PathBuf>) -> Result<Self, WarehouseError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| WarehouseError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            credentials_path: credentials_path.into(),
            api_base: API_BASE.to_string(),
            upload_base: UPLOAD_BASE.to_string(),
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(600),
        })
    }

    /// Override the API endpoints (emulators, test servers).
    pub fn with_endpoints(mut self, api_base: &str, upload_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.upload_base = upload_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// How long to wait between job status polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn check_job(job: &JobResource) -> Result<(), WarehouseError> {
        match &job.status.error_result {
            Some(err) => Err(WarehouseError::JobFailed {
                job_id: job.job_reference.job_id.clone(),
                message: format!("{}: {}", err.reason, err.message),
            }),
            None => Ok(()),
        }
    }

    fn parse_job(resp: reqwest::blocking::Response) -> Result<JobResource, WarehouseError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_else(|e| {
                debug!("failed to read job error body: {e}");
                String::new()
            });
            return Err(WarehouseError::Http(format!("HTTP {status}: {body}")));
        }
        resp.json()
            .map_err(|e| WarehouseError::Http(format!("malformed job resource: {e}")))
    }

    fn wait_for_job(
        &self,
        project: &str,
        mut job: JobResource,
        token: &str,
    ) -> Result<JobResource, WarehouseError> {
        let started = Instant::now();
        while job.status.state != "DONE" {
            if started.elapsed() >= self.job_timeout {
                return Err(WarehouseError::Timeout {
                    job_id: job.job_reference.job_id,
                    waited_secs: self.job_timeout.as_secs(),
                });
            }
            std::thread::sleep(self.poll_interval);

            let mut request = self
                .client
                .get(format!(
                    "{}/projects/{project}/jobs/{}",
                    self.api_base, job.job_reference.job_id
                ))
                .bearer_auth(token);
            if let Some(location) = &job.job_reference.location {
                request = request.query(&[("location", location.as_str())]);
            }

            let resp = request
                .send()
                .map_err(|e| WarehouseError::Http(e.to_string()))?;
            job = Self::parse_job(resp)?;
            debug!(job_id = %job.job_reference.job_id, state = %job.status.state, "polled load job");
        }
        Ok(job)
    }
}

impl WarehouseSink for BigQuerySink {
    fn name(&self) -> &str {
        "bigquery"
    }

    fn replace_table(
        &self,
        table: &TableRef,
        frame: &mut DataFrame,
    ) -> Result<LoadStats, WarehouseError> {
        let key = ServiceAccountKey::from_file(&self.credentials_path)?;
        let token = key.authorize(&self.client, BIGQUERY_SCOPE)?;

        let fields = schema_fields(frame)?;
        let data = encode_ndjson(frame)?;
        let metadata = load_job_config(table, &fields);
        let body = multipart_body(&metadata, &data);

        info!(
            "Uploading {} rows ({} bytes) to {table}",
            frame.height(),
            data.len()
        );

        let resp = self
            .client
            .post(format!(
                "{}/projects/{}/jobs?uploadType=multipart",
                self.upload_base, table.project
            ))
            .bearer_auth(&token.token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={BOUNDARY}"),
            )
            .body(body)
            .send()
            .map_err(|e| WarehouseError::Http(e.to_string()))?;

        let job = Self::parse_job(resp)?;
        Self::check_job(&job)?;
        let job = self.wait_for_job(&table.project, job, &token.token)?;
        Self::check_job(&job)?;

        info!(job_id = %job.job_reference.job_id, "Replaced {table}");
        Ok(LoadStats {
            job_id: job.job_reference.job_id,
            rows: frame.height(),
        })
    }
}
