pub mod download;
pub mod format;
pub mod key;
pub mod response_types;
pub mod status;
pub mod tables;
pub mod update;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use polars::prelude::DataFrame;
use std::future::Future;
use std::io::{BufRead, Write};
use std::sync::Arc;

use crate::config::Settings;
use crate::data::frame;
use crate::data::nasdaq::NasdaqProvider;
use crate::data::TableStore;
use crate::tables::{SharadarTable, TableSelection, ALL_KEYWORD};

use response_types::{DateRange, OutcomeStatus, RunReport, TableOutcome};

/// Shared state for one `download` or `update` run.
pub struct RunContext {
    pub settings: Settings,
    pub provider: Arc<NasdaqProvider>,
    pub store: Arc<dyn TableStore>,
    pub progress: MultiProgress,
    pub today: NaiveDate,
}

impl RunContext {
    pub fn new(
        settings: Settings,
        provider: Arc<NasdaqProvider>,
        store: Arc<dyn TableStore>,
        show_progress: bool,
    ) -> Self {
        let progress = if show_progress {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        Self {
            settings,
            provider,
            store,
            progress,
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Pin "today" for reproducible windows.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    fn table_bar(&self, table: &SharadarTable) -> ProgressBar {
        let style = ProgressStyle::default_spinner()
            .template("  {prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let pb = self.progress.add(ProgressBar::new_spinner());
        pb.set_style(style);
        pb.set_prefix(table.name);
        pb.enable_steady_tick(std::time::Duration::from_millis(120));
        pb
    }
}

/// First and last rows of a fetched table, kept for printing after the run.
pub struct Preview {
    pub table: &'static SharadarTable,
    pub head: DataFrame,
    pub tail: DataFrame,
}

/// Everything a run produced.
pub struct RunOutput {
    pub report: RunReport,
    pub previews: Vec<Preview>,
}

/// Per-table result handed back by a job.
pub(crate) struct JobResult {
    pub outcome: TableOutcome,
    pub preview: Option<Preview>,
}

impl JobResult {
    pub(crate) fn failed(
        table: &'static SharadarTable,
        file_path: String,
        err: &anyhow::Error,
    ) -> Self {
        Self {
            outcome: TableOutcome {
                table: table.name.to_string(),
                description: table.description.to_string(),
                status: OutcomeStatus::Failed,
                rows: 0,
                pages: 0,
                requested: None,
                fetched: DateRange {
                    start: None,
                    end: None,
                },
                file_path,
                error: Some(format!("{err:#}")),
            },
            preview: None,
        }
    }
}

/// Write a fetched frame on the blocking pool and hand the frame back.
pub(crate) async fn write_blocking<F>(
    store: &Arc<dyn TableStore>,
    mut frame: DataFrame,
    write: F,
) -> Result<(usize, DataFrame)>
where
    F: FnOnce(&dyn TableStore, &mut DataFrame) -> crate::data::StoreResult<usize> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || -> Result<(usize, DataFrame)> {
        let rows = write(store.as_ref(), &mut frame)?;
        Ok((rows, frame))
    })
    .await
    .context("store task panicked")?
}

pub(crate) fn make_preview(
    ctx: &RunContext,
    table: &'static SharadarTable,
    df: &DataFrame,
) -> Option<Preview> {
    if !ctx.settings.print || df.height() == 0 {
        return None;
    }
    let (head, tail) = frame::preview(df, ctx.settings.display_rows);
    Some(Preview { table, head, tail })
}

/// Run one job per selected table, at most `threads` at a time, and collect
/// the outcomes in selection order.
pub(crate) async fn run_jobs<'a, F, Fut>(
    ctx: &'a RunContext,
    command: &str,
    selection: &TableSelection,
    job: F,
) -> RunOutput
where
    F: Fn(&'a RunContext, &'static SharadarTable) -> Fut,
    Fut: Future<Output = JobResult> + 'a,
{
    let results: Vec<JobResult> = stream::iter(selection.tables.iter().copied())
        .map(|table| job(ctx, table))
        .buffered(ctx.settings.threads)
        .collect()
        .await;

    let mut outcomes = Vec::with_capacity(results.len());
    let mut previews = Vec::new();
    for result in results {
        outcomes.push(result.outcome);
        previews.extend(result.preview);
    }

    let failed = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .count();
    let succeeded = outcomes.len() - failed;
    let rows: usize = outcomes.iter().map(|o| o.rows).sum();
    let summary = format!(
        "{command}: {succeeded}/{} table(s) succeeded, {rows} row(s) written to {}.",
        outcomes.len(),
        ctx.settings.save_to
    );

    RunOutput {
        report: RunReport {
            summary,
            command: command.to_string(),
            save_to: ctx.settings.save_to.to_string(),
            succeeded,
            failed,
            api_requests: ctx.provider.request_count(),
            tables: outcomes,
        },
        previews,
    }
}

/// Ask the user to confirm a download of every table.
///
/// Returns `true` when no confirmation is needed, `--yes` was given, or the
/// user typed `ALL` again.
pub fn confirm_all<R: BufRead, W: Write>(
    selection: &TableSelection,
    assume_yes: bool,
    mut input: R,
    mut output: W,
) -> Result<bool> {
    if !selection.requires_confirmation || assume_yes {
        return Ok(true);
    }
    writeln!(
        output,
        "Downloading all of the Sharadar tables at the same time will take up a lot of memory.\n\
         If you wish to continue please type '{ALL_KEYWORD}' again."
    )?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim() == ALL_KEYWORD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_not_needed_for_explicit_tables() {
        let sel = TableSelection::parse(&["SEP"]).unwrap();
        let mut out: Vec<u8> = Vec::new();
        assert!(confirm_all(&sel, false, &b""[..], &mut out).unwrap());
        assert!(out.is_empty());
    }

    #[test]
    fn confirm_all_accepts_typed_keyword() {
        let sel = TableSelection::parse(&["ALL"]).unwrap();
        let mut out: Vec<u8> = Vec::new();
        assert!(confirm_all(&sel, false, &b"ALL\n"[..], &mut out).unwrap());
        assert!(String::from_utf8(out).unwrap().contains("type 'ALL' again"));
    }

    #[test]
    fn confirm_all_rejects_anything_else() {
        let sel = TableSelection::parse(&["ALL"]).unwrap();
        assert!(!confirm_all(&sel, false, &b"yes\n"[..], std::io::sink()).unwrap());
        assert!(!confirm_all(&sel, false, &b""[..], std::io::sink()).unwrap());
    }

    #[test]
    fn confirm_all_skipped_with_yes_flag() {
        let sel = TableSelection::parse(&["ALL"]).unwrap();
        assert!(confirm_all(&sel, true, &b""[..], std::io::sink()).unwrap());
    }
}
