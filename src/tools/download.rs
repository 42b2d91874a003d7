use anyhow::Result;
use chrono::NaiveDate;

use crate::data::frame;
use crate::tables::{init_dates, SharadarTable, TableSelection};

use super::response_types::{DateRange, OutcomeStatus, TableOutcome};
use super::{make_preview, run_jobs, write_blocking, JobResult, RunContext, RunOutput};

/// Download a fixed date range for every selected table, replacing what is
/// stored for that range.
pub async fn execute(
    ctx: &RunContext,
    selection: &TableSelection,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> RunOutput {
    run_jobs(ctx, "download", selection, move |ctx, table| {
        download_table(ctx, table, from, to)
    })
    .await
}

async fn download_table(
    ctx: &RunContext,
    table: &'static SharadarTable,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> JobResult {
    let file_path = ctx.store.location(table).display().to_string();
    let pb = ctx.table_bar(table);
    match try_download(ctx, table, from, to, &pb).await {
        Ok(result) => {
            pb.finish_with_message(format!("{} rows", result.outcome.rows));
            result
        }
        Err(e) => {
            pb.abandon_with_message(format!("error: {e}"));
            tracing::warn!("Download of {} failed: {e:#}", table.name);
            JobResult::failed(table, file_path, &e)
        }
    }
}

async fn try_download(
    ctx: &RunContext,
    table: &'static SharadarTable,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    pb: &indicatif::ProgressBar,
) -> Result<JobResult> {
    let (_, window) = init_dates(table, from, to, ctx.settings.default_start, ctx.today)?;
    let fetched = ctx.provider.fetch_table(table, window, pb).await?;
    let file_path = ctx.store.location(table).display().to_string();
    let requested = Some(DateRange {
        start: Some(window.start.to_string()),
        end: Some(window.end.to_string()),
    });

    // An empty window leaves whatever is stored untouched.
    if fetched.frame.height() == 0 {
        tracing::info!(
            "No rows for {} between {} and {}, nothing written",
            table.name,
            window.start,
            window.end
        );
        return Ok(JobResult {
            outcome: TableOutcome {
                table: table.name.to_string(),
                description: table.description.to_string(),
                status: OutcomeStatus::NoNewData,
                rows: 0,
                pages: fetched.pages,
                requested,
                fetched: DateRange {
                    start: None,
                    end: None,
                },
                file_path,
                error: None,
            },
            preview: None,
        });
    }

    let (start, end) = frame::date_range(&fetched.frame, table.date_column);
    pb.set_message("writing");
    let (rows, df) = write_blocking(&ctx.store, fetched.frame, move |store, df| {
        store.replace(table, df, window)
    })
    .await?;
    tracing::info!("Saved {rows} rows of {} to {file_path}", table.name);

    Ok(JobResult {
        preview: make_preview(ctx, table, &df),
        outcome: TableOutcome {
            table: table.name.to_string(),
            description: table.description.to_string(),
            status: OutcomeStatus::Written,
            rows,
            pages: fetched.pages,
            requested,
            fetched: DateRange { start, end },
            file_path,
            error: None,
        },
    })
}
