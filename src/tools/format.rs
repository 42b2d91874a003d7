//! Plain-text rendering of command results for the terminal.

use std::fmt::Write;

use super::response_types::{
    DateRange, OutcomeStatus, RunReport, StatusResponse, TablesResponse,
};
use super::Preview;

fn status_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Written => "written",
        OutcomeStatus::NoNewData => "no new data",
        OutcomeStatus::UpToDate => "up to date",
        OutcomeStatus::Failed => "FAILED",
    }
}

fn range_label(range: &DateRange) -> String {
    match (&range.start, &range.end) {
        (Some(s), Some(e)) => format!("{s}..{e}"),
        (Some(s), None) => format!("{s}.."),
        (None, Some(e)) => format!("..{e}"),
        (None, None) => "-".to_string(),
    }
}

/// Human-readable byte count (binary units).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn format_run(report: &RunReport) -> String {
    let mut out = String::new();
    for t in &report.tables {
        let _ = write!(
            out,
            "{:<8} {:<12} {:>10} rows  {:<23} {}",
            t.table,
            status_label(t.status),
            t.rows,
            range_label(&t.fetched),
            t.file_path
        );
        if let Some(err) = &t.error {
            let _ = write!(out, "\n         error: {err}");
        }
        out.push('\n');
    }
    let _ = writeln!(out, "{} ({} API requests)", report.summary, report.api_requests);
    out
}

pub fn format_previews(previews: &[Preview]) -> String {
    let mut out = String::new();
    for p in previews {
        let _ = writeln!(out, "{} - {}", p.table.name, p.table.description);
        let _ = writeln!(out, "{}", p.head);
        let _ = writeln!(out, "{}", p.tail);
    }
    out
}

pub fn format_status(status: &StatusResponse) -> String {
    let mut out = String::new();
    for t in &status.tables {
        let size = t.size_bytes.map_or_else(|| "-".to_string(), format_bytes);
        let _ = write!(
            out,
            "{:<8} latest {:<10}  {:>10}  {}",
            t.table,
            t.watermark.as_deref().unwrap_or("-"),
            size,
            t.file_path
        );
        if let Some(sync) = &t.last_sync {
            let _ = write!(
                out,
                "\n         last {} {}..{} ({} rows) at {}",
                sync.mode, sync.start_date, sync.end_date, sync.rows, sync.finished_at
            );
        }
        if let Some(err) = &t.error {
            let _ = write!(out, "\n         error: {err}");
        }
        out.push('\n');
    }
    let _ = writeln!(out, "{}", status.summary);
    out
}

pub fn format_tables(tables: &TablesResponse) -> String {
    let mut out = String::new();
    for t in &tables.tables {
        let _ = writeln!(out, "{:<8} {:<13} {}", t.name, t.date_column, t.description);
    }
    let _ = writeln!(out, "{}", tables.summary);
    out
}
