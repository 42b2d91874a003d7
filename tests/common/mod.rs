#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Value};
use wiremock::MockServer;

use sharadar_sync::config::{FileConfig, Overrides, SaveTarget, Settings};
use sharadar_sync::data::nasdaq::{NasdaqProvider, ProviderConfig};
use sharadar_sync::data::open_store;
use sharadar_sync::tools::RunContext;

pub const TEST_KEY: &str = "test-key";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Column list the API advertises for SEP, trimmed to three columns.
pub fn sep_columns() -> Value {
    json!([
        { "name": "ticker", "type": "String" },
        { "name": "date", "type": "Date" },
        { "name": "close", "type": "BigDecimal(15,4)" }
    ])
}

/// One `datatables` response page.
pub fn page(rows: Value, next_cursor: Option<&str>) -> Value {
    json!({
        "datatable": { "data": rows, "columns": sep_columns() },
        "meta": { "next_cursor_id": next_cursor }
    })
}

/// Settings pointing at the mock server, with retries that do not sleep.
pub fn settings(server: &MockServer, dir: &Path, save_to: SaveTarget) -> Settings {
    settings_with(server, dir, save_to, FileConfig::default())
}

pub fn settings_with(
    server: &MockServer,
    dir: &Path,
    save_to: SaveTarget,
    file: FileConfig,
) -> Settings {
    let file = FileConfig {
        base_url: Some(server.uri()),
        retry_base_ms: Some(1),
        min_request_interval_ms: Some(0),
        max_retries: file.max_retries.or(Some(2)),
        ..file
    };
    Settings::resolve(
        file,
        &Overrides {
            directory: Some(dir.display().to_string()),
            save_to: Some(save_to),
            ..Default::default()
        },
    )
    .unwrap()
}

/// Run context with progress hidden and "today" pinned.
pub fn context(settings: Settings, today: NaiveDate) -> RunContext {
    let provider = Arc::new(
        NasdaqProvider::new(ProviderConfig::from_settings(&settings, TEST_KEY.to_string()))
            .unwrap(),
    );
    let store = open_store(&settings).unwrap();
    RunContext::new(settings, provider, store, false).with_today(today)
}

/// Write a SEP csv with one AAPL row per date.
pub fn write_sep_csv(dir: &Path, dates: &[&str]) {
    let mut text = String::from("ticker,date,close\n");
    for d in dates {
        text.push_str(&format!("AAPL,{d},100.0\n"));
    }
    std::fs::write(dir.join("SEP.csv"), text).unwrap();
}

/// Config file pointing the binary at the mock server.
pub fn write_config(server: &MockServer, dir: &Path) -> std::path::PathBuf {
    let path = dir.join("sharadar.toml");
    let text = format!(
        "base_url = \"{}\"\nretry_base_ms = 1\nmin_request_interval_ms = 0\nmax_retries = 1\n",
        server.uri()
    );
    std::fs::write(&path, text).unwrap();
    path
}
