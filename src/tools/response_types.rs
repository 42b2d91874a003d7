use serde::{Deserialize, Serialize};

use crate::data::sqlite::SyncRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Written,
    NoNewData,
    UpToDate,
    Failed,
}

/// Result of one table within a `download` or `update` run.
#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    pub table: String,
    pub description: String,
    pub status: OutcomeStatus,
    pub rows: usize,
    pub pages: u32,
    /// Date window requested from the API.
    pub requested: Option<DateRange>,
    /// Dates actually present in the fetched rows.
    pub fetched: DateRange,
    pub file_path: String,
    pub error: Option<String>,
}

/// Response for `download` and `update`
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: String,
    pub command: String,
    pub save_to: String,
    pub succeeded: usize,
    pub failed: usize,
    pub api_requests: u32,
    pub tables: Vec<TableOutcome>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Local state of one table, for `status`
#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub table: String,
    pub file_path: String,
    pub exists: bool,
    pub size_bytes: Option<u64>,
    pub watermark: Option<String>,
    pub last_modified: Option<String>,
    pub last_sync: Option<SyncRecord>,
    pub error: Option<String>,
}

/// Response for `status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub summary: String,
    pub save_to: String,
    pub tables: Vec<TableStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub date_column: String,
    pub description: String,
}

/// Response for `tables`
#[derive(Debug, Clone, Serialize)]
pub struct TablesResponse {
    pub summary: String,
    pub dataset: String,
    pub tables: Vec<TableInfo>,
}
