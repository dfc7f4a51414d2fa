//! BigQuery REST client
//!
//! Streaming inserts go through `tabledata.insertAll`, whose response lists
//! rejected rows by index. The normalization lookup runs through
//! `jobs.query`, following result pages until the job is complete.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{InsertResponse, RowRejection, WarehouseClient};
use crate::error::{CacheLoadError, WriteError};
use crate::normalize::LookupSource;
use crate::transform::WarehouseRow;

/// Public BigQuery endpoint
pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com";

/// GCE/GKE metadata server token endpoint
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Environment variable consulted when no token is configured
pub const ACCESS_TOKEN_ENV: &str = "BIGQUERY_ACCESS_TOKEN";

/// Result page polls before the lookup query is abandoned
const MAX_QUERY_POLLS: usize = 1000;

/// Warehouse connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BigQuerySettings {
    /// GCP project that owns the dataset
    pub project_id: String,
    /// Dataset of the metrics table
    pub dataset: String,
    /// Metrics table name
    pub table: String,
    /// Fully qualified lookup table, e.g. `project.dataset.metric_lookup`
    pub lookup_table: String,
    /// API root, overridable for emulators and tests
    pub base_url: String,
    /// Static OAuth bearer token
    pub access_token: Option<String>,
    /// Fetch tokens from the instance metadata server
    pub use_metadata_server: bool,
    /// Per-request timeout
    pub request_timeout_ms: u64,
    /// Let BigQuery write valid rows of a request that also has invalid ones
    pub skip_invalid_rows: bool,
}

impl Default for BigQuerySettings {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            dataset: String::new(),
            table: String::new(),
            lookup_table: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: None,
            use_metadata_server: false,
            request_timeout_ms: 30_000,
            skip_invalid_rows: false,
        }
    }
}

impl BigQuerySettings {
    /// Check required identifiers
    pub fn validate(&self) -> Result<(), String> {
        if self.project_id.is_empty() {
            return Err("warehouse.project_id cannot be empty".to_string());
        }
        if self.dataset.is_empty() || self.table.is_empty() {
            return Err("warehouse.dataset and warehouse.table cannot be empty".to_string());
        }
        if self.lookup_table.is_empty() {
            return Err("warehouse.lookup_table cannot be empty".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("warehouse.request_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// How requests are authorized
#[derive(Debug)]
enum TokenSource {
    None,
    Static(String),
    Metadata {
        url: String,
        cached: Mutex<Option<(String, Instant)>>,
    },
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

impl TokenSource {
    async fn token(&self, http: &Client) -> Result<Option<String>, String> {
        match self {
            TokenSource::None => Ok(None),
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::Metadata { url, cached } => {
                let mut cached = cached.lock().await;
                if let Some((token, expires_at)) = cached.as_ref() {
                    if Instant::now() < *expires_at {
                        return Ok(Some(token.clone()));
                    }
                }

                let response = http
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| format!("metadata token request failed: {}", e))?
                    .error_for_status()
                    .map_err(|e| format!("metadata token request failed: {}", e))?;
                let token: MetadataToken = response
                    .json()
                    .await
                    .map_err(|e| format!("invalid metadata token response: {}", e))?;

                // refresh a minute early
                let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
                *cached = Some((token.access_token.clone(), Instant::now() + lifetime));
                debug!("Refreshed BigQuery access token, valid for {:?}", lifetime);
                Ok(Some(token.access_token))
            }
        }
    }
}

#[derive(Serialize)]
struct InsertAllRow<'a> {
    #[serde(rename = "insertId")]
    insert_id: &'a str,
    json: &'a crate::transform::RowContent,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
    rows: Vec<InsertAllRow<'a>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrorEntry>,
}

#[derive(Deserialize)]
struct InsertErrorEntry {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

/// BigQuery client for streaming inserts and the lookup query
#[derive(Debug)]
pub struct BigQueryClient {
    http: Client,
    settings: BigQuerySettings,
    tokens: TokenSource,
}

impl BigQueryClient {
    /// Build a client. A configured token wins over `BIGQUERY_ACCESS_TOKEN`,
    /// which wins over the metadata server.
    pub fn new(settings: BigQuerySettings) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()?;

        let tokens = match settings
            .access_token
            .clone()
            .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok())
        {
            Some(token) if !token.is_empty() => TokenSource::Static(token),
            _ if settings.use_metadata_server => TokenSource::Metadata {
                url: METADATA_TOKEN_URL.to_string(),
                cached: Mutex::new(None),
            },
            _ => TokenSource::None,
        };

        Ok(Self {
            http,
            settings,
            tokens,
        })
    }

    /// Settings in use
    pub fn settings(&self) -> &BigQuerySettings {
        &self.settings
    }

    fn api_root(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.project_id
        )
    }

    fn insert_url(&self) -> String {
        format!(
            "{}/datasets/{}/tables/{}/insertAll",
            self.api_root(),
            self.settings.dataset,
            self.settings.table
        )
    }

    /// The full-table lookup query
    pub fn lookup_query(&self) -> String {
        format!(
            "SELECT source_metric_type, normalized_metric_type FROM `{}`",
            self.settings.lookup_table
        )
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, String> {
        Ok(match self.tokens.token(&self.http).await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, String> {
        let response = self
            .authorize(request)
            .await?
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, truncate(&body, 512)));
        }
        response.json::<T>().await.map_err(|e| e.to_string())
    }

    async fn fetch_lookup_rows(&self) -> Result<Vec<TableRow>, String> {
        let body = json!({
            "query": self.lookup_query(),
            "useLegacySql": false,
            "timeoutMs": self.settings.request_timeout_ms,
        });
        let mut page: QueryResponse = self
            .send_json(self.http.post(format!("{}/queries", self.api_root())).json(&body))
            .await?;

        let mut rows = Vec::new();
        for _ in 0..MAX_QUERY_POLLS {
            if page.job_complete {
                rows.append(&mut page.rows);
                if page.page_token.is_none() {
                    return Ok(rows);
                }
            }

            let job = page
                .job_reference
                .clone()
                .ok_or_else(|| "query response carries no job reference".to_string())?;
            let mut params = vec![(
                "timeoutMs".to_string(),
                self.settings.request_timeout_ms.to_string(),
            )];
            if let Some(location) = job.location {
                params.push(("location".to_string(), location));
            }
            if page.job_complete {
                if let Some(token) = page.page_token.take() {
                    params.push(("pageToken".to_string(), token));
                }
            }

            debug!("Polling lookup query job {}", job.job_id);
            let request = self
                .http
                .get(format!("{}/queries/{}", self.api_root(), job.job_id))
                .query(&params);
            let next: QueryResponse = self.send_json(request).await?;
            page = QueryResponse {
                job_reference: next.job_reference.or(page.job_reference),
                ..next
            };
        }

        Err(format!("query did not finish within {} polls", MAX_QUERY_POLLS))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl WarehouseClient for BigQueryClient {
    async fn insert_rows(&self, rows: &[WarehouseRow]) -> Result<InsertResponse, WriteError> {
        let request = InsertAllRequest {
            skip_invalid_rows: self.settings.skip_invalid_rows,
            ignore_unknown_values: false,
            rows: rows
                .iter()
                .map(|row| InsertAllRow {
                    insert_id: &row.insert_id,
                    json: &row.content,
                })
                .collect(),
        };

        let response: InsertAllResponse = self
            .send_json(self.http.post(self.insert_url()).json(&request))
            .await
            .map_err(WriteError::Transport)?;

        let rejected: Vec<RowRejection> = response
            .insert_errors
            .into_iter()
            .map(|entry| RowRejection {
                index: entry.index,
                reason: entry
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.reason, e.message))
                    .collect::<Vec<_>>()
                    .join("; "),
            })
            .collect();

        if !rejected.is_empty() {
            warn!(
                "BigQuery rejected {} of {} rows in {}.{}",
                rejected.len(),
                rows.len(),
                self.settings.dataset,
                self.settings.table
            );
        }

        Ok(InsertResponse { rejected })
    }
}

#[async_trait]
impl LookupSource for BigQueryClient {
    async fn fetch_mappings(&self) -> Result<Vec<(String, String)>, CacheLoadError> {
        let rows = self
            .fetch_lookup_rows()
            .await
            .map_err(|reason| CacheLoadError::Query {
                table: self.settings.lookup_table.clone(),
                reason,
            })?;

        let mut mappings = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            let mut cells = row.f.into_iter().map(|cell| cell.v);
            let source = match cells.next() {
                Some(Value::String(s)) => s,
                _ => {
                    return Err(CacheLoadError::MalformedRow {
                        row: i,
                        column: "source_metric_type",
                    })
                }
            };
            let normalized = match cells.next() {
                Some(Value::String(s)) => s,
                _ => {
                    return Err(CacheLoadError::MalformedRow {
                        row: i,
                        column: "normalized_metric_type",
                    })
                }
            };
            mappings.push((source, normalized));
        }

        info!(
            "Fetched {} lookup rows from {}",
            mappings.len(),
            self.settings.lookup_table
        );
        Ok(mappings)
    }

    fn describe(&self) -> String {
        self.settings.lookup_table.clone()
    }
}
