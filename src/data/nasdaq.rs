//! Nasdaq Data Link client for the Sharadar datatables.
//!
//! Key features:
//!
//! - **Cursor pagination**: follows `meta.next_cursor_id` until the API
//!   stops returning one, collecting every page of a date window.
//! - **Rate limiting**: a minimum interval between requests, shared by all
//!   concurrent table jobs, plus exponential backoff on 429 and 5xx errors.
//! - **Typed frames**: rows are converted to a polars `DataFrame` using the
//!   column types the API advertises.

use indicatif::ProgressBar;
use polars::prelude::{DataFrame, PolarsError};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;

use super::frame::{build_frame, ApiColumn};
use crate::config::Settings;
use crate::tables::{DateWindow, SharadarTable};

const TIMEOUT_SECS: u64 = 120;
const MAX_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API key is invalid or expired")]
    InvalidKey,

    #[error("access denied to {table}; check that your subscription includes it")]
    AccessDenied { table: String },

    #[error("table {table} was not found on the API")]
    NotFound { table: String },

    #[error("request for {table} rejected ({status}): {message}")]
    BadRequest {
        table: String,
        status: u16,
        message: String,
    },

    #[error("rate limit still exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("server error ({status}) after {attempts} attempts")]
    Server { status: u16, attempts: u32 },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response for {table}: {message}")]
    Format { table: String, message: String },

    #[error("dataframe error: {0}")]
    Frame(#[from] PolarsError),
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse {
    datatable: Option<Datatable>,
    meta: Option<ApiMeta>,
}

#[derive(Debug, Deserialize)]
struct Datatable {
    #[serde(default)]
    data: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    columns: Vec<ApiColumn>,
}

#[derive(Debug, Deserialize)]
struct ApiMeta {
    next_cursor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    quandl_error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

/// Pull the vendor's message out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.quandl_error);
    match parsed {
        Some(ApiErrorDetail {
            code: Some(code),
            message: Some(message),
        }) => format!("{message} ({code})"),
        Some(ApiErrorDetail {
            message: Some(message),
            ..
        }) => message,
        _ => body.chars().take(200).collect(),
    }
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub dataset: String,
    pub api_key: String,
    pub per_page: u32,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub min_request_interval: Duration,
}

impl ProviderConfig {
    pub fn from_settings(settings: &Settings, api_key: String) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            dataset: settings.dataset.clone(),
            api_key,
            per_page: settings.per_page,
            max_retries: settings.max_retries,
            retry_base: Duration::from_millis(settings.retry_base_ms),
            min_request_interval: Duration::from_millis(settings.min_request_interval_ms),
        }
    }
}

/// All pages of one table for one date window.
#[derive(Debug)]
pub struct FetchedTable {
    pub table: &'static SharadarTable,
    pub window: DateWindow,
    pub frame: DataFrame,
    pub pages: u32,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct NasdaqProvider {
    client: Client,
    config: ProviderConfig,
    last_request_time: Mutex<Option<Instant>>,
    request_count: AtomicU32,
}

impl NasdaqProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            config,
            last_request_time: Mutex::new(None),
            request_count: AtomicU32::new(0),
        })
    }

    /// Total HTTP requests sent, retries included.
    pub fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn table_url(&self, table: &SharadarTable) -> String {
        format!(
            "{}/{}/{}.json",
            self.config.base_url, self.config.dataset, table.name
        )
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.config.retry_base.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(Duration::from_secs(MAX_BACKOFF_SECS))
    }

    // -- HTTP ---------------------------------------------------------------

    /// Rate-limited GET with retry on transport errors, 429 and 5xx.
    ///
    /// When retries run out on a 429/5xx the last response is returned so the
    /// caller can map its status.
    async fn throttled_get(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<reqwest::Response, ProviderError> {
        let max_retries = self.config.max_retries;
        let mut attempt: u32 = 0;
        loop {
            // Enforce minimum interval between requests
            {
                let mut last = self.last_request_time.lock().await;
                if let Some(prev) = *last {
                    if let Some(remaining) =
                        self.config.min_request_interval.checked_sub(prev.elapsed())
                    {
                        sleep(remaining).await;
                    }
                }
                *last = Some(Instant::now());
            }

            let resp = match self.client.get(url).query(params).send().await {
                Ok(r) => r,
                Err(e) => {
                    // Drop the URL: it carries the API key.
                    let e = e.without_url();
                    if attempt >= max_retries {
                        return Err(e.into());
                    }
                    let wait = self.backoff(attempt);
                    tracing::warn!(
                        "Request error, retrying in {wait:?} (attempt {}/{max_retries}): {e}",
                        attempt + 1
                    );
                    sleep(wait).await;
                    attempt += 1;
                    continue;
                }
            };

            self.request_count.fetch_add(1, Ordering::Relaxed);
            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if attempt >= max_retries {
                    return Ok(resp);
                }
                let mut wait = self.backoff(attempt);
                if let Some(retry_after) = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                {
                    wait = wait.max(Duration::from_secs(retry_after.min(MAX_BACKOFF_SECS)));
                }
                tracing::warn!(
                    "HTTP {} from API, backing off {wait:?} (attempt {}/{max_retries})",
                    status.as_u16(),
                    attempt + 1
                );
                sleep(wait).await;
                attempt += 1;
                continue;
            }

            return Ok(resp);
        }
    }

    /// Map a non-success response to a typed error.
    async fn error_for_response(&self, resp: reqwest::Response, table: &str) -> ProviderError {
        let status = resp.status();
        let attempts = self.config.max_retries + 1;
        let body = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => ProviderError::InvalidKey,
            StatusCode::FORBIDDEN => ProviderError::AccessDenied {
                table: table.to_string(),
            },
            StatusCode::NOT_FOUND => ProviderError::NotFound {
                table: table.to_string(),
            },
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { attempts },
            s if s.is_server_error() => ProviderError::Server {
                status: s.as_u16(),
                attempts,
            },
            s => ProviderError::BadRequest {
                table: table.to_string(),
                status: s.as_u16(),
                message: error_message(&body),
            },
        }
    }

    // -- public API ---------------------------------------------------------

    /// Download every row of `table` whose date column falls inside `window`.
    pub async fn fetch_table(
        &self,
        table: &'static SharadarTable,
        window: DateWindow,
        pb: &ProgressBar,
    ) -> Result<FetchedTable, ProviderError> {
        let url = self.table_url(table);
        let qualified = format!("{}/{}", self.config.dataset, table.name);
        let base_params: Vec<(String, String)> = vec![
            (
                format!("{}.gte", table.date_column),
                window.start.format("%Y-%m-%d").to_string(),
            ),
            (
                format!("{}.lte", table.date_column),
                window.end.format("%Y-%m-%d").to_string(),
            ),
            ("qopts.per_page".into(), self.config.per_page.to_string()),
            ("api_key".into(), self.config.api_key.clone()),
        ];

        tracing::info!(
            "Fetching {qualified}: {} from {} to {}",
            table.date_column,
            window.start,
            window.end
        );

        let mut columns: Vec<ApiColumn> = Vec::new();
        let mut rows: Vec<Vec<serde_json::Value>> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages: u32 = 0;

        loop {
            let mut params = base_params.clone();
            if let Some(c) = &cursor {
                params.push(("qopts.cursor_id".into(), c.clone()));
            }

            let resp = self.throttled_get(&url, &params).await?;
            if !resp.status().is_success() {
                return Err(self.error_for_response(resp, &qualified).await);
            }

            let body: ApiResponse = resp.json().await.map_err(|e| ProviderError::Format {
                table: qualified.clone(),
                message: format!("JSON parse error: {}", e.without_url()),
            })?;
            let Some(datatable) = body.datatable else {
                return Err(ProviderError::Format {
                    table: qualified,
                    message: "response has no datatable".into(),
                });
            };

            if columns.is_empty() {
                columns = datatable.columns;
            } else if !datatable.columns.is_empty() && datatable.columns != columns {
                return Err(ProviderError::Format {
                    table: qualified,
                    message: "column list changed between pages".into(),
                });
            }

            rows.extend(datatable.data);
            pages += 1;
            pb.set_message(format!("page {pages}, {} rows", rows.len()));

            match body.meta.and_then(|m| m.next_cursor_id) {
                Some(next) if !next.is_empty() => {
                    if cursor.as_deref() == Some(next.as_str()) {
                        return Err(ProviderError::Format {
                            table: qualified,
                            message: format!("cursor {next} repeated"),
                        });
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        tracing::info!("Fetched {} rows for {qualified} in {pages} page(s)", rows.len());
        let frame = build_frame(&columns, &rows)?;

        Ok(FetchedTable {
            table,
            window,
            frame,
            pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(retry_base_ms: u64) -> NasdaqProvider {
        NasdaqProvider::new(ProviderConfig {
            base_url: "http://localhost:1".into(),
            dataset: "SHARADAR".into(),
            api_key: "k".into(),
            per_page: 10,
            max_retries: 3,
            retry_base: Duration::from_millis(retry_base_ms),
            min_request_interval: Duration::ZERO,
        })
        .unwrap()
    }

    #[test]
    fn table_url_includes_dataset() {
        let p = provider(1);
        let sep = crate::tables::lookup("SEP").unwrap();
        assert_eq!(p.table_url(sep), "http://localhost:1/SHARADAR/SEP.json");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = provider(1000);
        assert_eq!(p.backoff(0), Duration::from_secs(1));
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
        assert_eq!(p.backoff(20), Duration::from_secs(MAX_BACKOFF_SECS));
    }

    #[test]
    fn error_message_prefers_vendor_detail() {
        let body = r#"{"quandl_error":{"code":"QECx02","message":"You have submitted an incorrect Quandl code."}}"#;
        assert_eq!(
            error_message(body),
            "You have submitted an incorrect Quandl code. (QECx02)"
        );
        assert_eq!(error_message("plain failure"), "plain failure");
    }
}
