use anyhow::{Context, Result};
use std::sync::Arc;

use crate::data::frame;
use crate::tables::{plan_update, SharadarTable, TableSelection, UpdatePlan};

use super::response_types::{DateRange, OutcomeStatus, TableOutcome};
use super::{make_preview, run_jobs, write_blocking, JobResult, RunContext, RunOutput};

/// Bring every selected table up to date, fetching only dates after the
/// latest one already stored.
pub async fn execute(ctx: &RunContext, selection: &TableSelection) -> RunOutput {
    run_jobs(ctx, "update", selection, |ctx, table| update_table(ctx, table)).await
}

async fn update_table(ctx: &RunContext, table: &'static SharadarTable) -> JobResult {
    let file_path = ctx.store.location(table).display().to_string();
    let pb = ctx.table_bar(table);
    match try_update(ctx, table, &pb).await {
        Ok(result) => {
            let msg = match result.outcome.status {
                OutcomeStatus::UpToDate => "up to date".to_string(),
                OutcomeStatus::NoNewData => "no new data".to_string(),
                _ => format!("{} new rows", result.outcome.rows),
            };
            pb.finish_with_message(msg);
            result
        }
        Err(e) => {
            pb.abandon_with_message(format!("error: {e}"));
            tracing::warn!("Update of {} failed: {e:#}", table.name);
            JobResult::failed(table, file_path, &e)
        }
    }
}

async fn try_update(
    ctx: &RunContext,
    table: &'static SharadarTable,
    pb: &indicatif::ProgressBar,
) -> Result<JobResult> {
    let file_path = ctx.store.location(table).display().to_string();

    pb.set_message("reading local data");
    let store = Arc::clone(&ctx.store);
    let watermark = tokio::task::spawn_blocking(move || store.watermark(table))
        .await
        .context("store task panicked")??;

    let mut outcome = TableOutcome {
        table: table.name.to_string(),
        description: table.description.to_string(),
        status: OutcomeStatus::UpToDate,
        rows: 0,
        pages: 0,
        requested: None,
        fetched: DateRange {
            start: None,
            end: None,
        },
        file_path,
        error: None,
    };

    let window = match plan_update(watermark, ctx.settings.default_start, ctx.today)
        .with_context(|| format!("Cannot update {}", table.name))?
    {
        UpdatePlan::UpToDate { watermark } => {
            tracing::info!(
                "Update for {} skipped: stored data already reaches {watermark}",
                table.name
            );
            return Ok(JobResult {
                outcome,
                preview: None,
            });
        }
        UpdatePlan::Fetch(window) => window,
    };

    match watermark {
        Some(w) => tracing::info!("Resuming {} after {w}", table.name),
        None => tracing::info!("No local data for {}, starting at {}", table.name, window.start),
    }
    outcome.requested = Some(DateRange {
        start: Some(window.start.to_string()),
        end: Some(window.end.to_string()),
    });

    let fetched = ctx.provider.fetch_table(table, window, pb).await?;
    outcome.pages = fetched.pages;
    if fetched.frame.height() == 0 {
        tracing::info!("No new data for {}", table.name);
        outcome.status = OutcomeStatus::NoNewData;
        return Ok(JobResult {
            outcome,
            preview: None,
        });
    }

    let (start, end) = frame::date_range(&fetched.frame, table.date_column);
    pb.set_message("writing");
    let (rows, df) = write_blocking(&ctx.store, fetched.frame, move |store, df| {
        store.append(table, df, window)
    })
    .await?;

    tracing::info!(
        "Successfully updated {} with {rows} rows from {} to {}",
        table.name,
        window.start,
        window.end
    );
    outcome.status = OutcomeStatus::Written;
    outcome.rows = rows;
    outcome.fetched = DateRange { start, end };

    Ok(JobResult {
        preview: make_preview(ctx, table, &df),
        outcome,
    })
}
