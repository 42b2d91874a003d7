use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{self, EnvFilter};

use sharadar_sync::config::{resolve_api_key, FileConfig, Overrides, SaveTarget, Settings};
use sharadar_sync::data::nasdaq::{NasdaqProvider, ProviderConfig};
use sharadar_sync::data::open_store;
use sharadar_sync::tables::TableSelection;
use sharadar_sync::tools::{self, format, RunContext, RunOutput};

/// Download and incrementally update Sharadar tables from Nasdaq Data Link.
#[derive(Parser)]
#[command(name = "sharadar-sync", version, about)]
struct Cli {
    /// TOML config file (default: ./sharadar.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a date range, replacing what is stored for that range
    Download {
        #[command(flatten)]
        run: RunArgs,
        /// First date to fetch (YYYY-MM-DD); defaults to the configured start
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last date to fetch (YYYY-MM-DD); defaults to today
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Fetch only rows newer than the latest stored date
    Update {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Show what is stored locally
    Status {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        json: bool,
    },
    /// List the available tables
    Tables {
        #[arg(long)]
        json: bool,
    },
    /// Save an API key to the key file
    Key { key: String },
}

#[derive(Args)]
struct StoreArgs {
    /// Table names, or ALL (default: DAILY)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    tables: Vec<String>,
    #[arg(long, value_enum)]
    save_to: Option<SaveTarget>,
    /// Output directory (~ is expanded)
    #[arg(long)]
    directory: Option<String>,
    /// Database file name without extension, used with --save-to db
    #[arg(long)]
    save_name: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Tables fetched concurrently
    #[arg(long)]
    threads: Option<usize>,
    /// Rows shown from the head and tail of each fetched table
    #[arg(long)]
    display_rows: Option<usize>,
    /// Skip the head/tail preview
    #[arg(long)]
    no_print: bool,
    /// Do not ask for confirmation when downloading ALL tables
    #[arg(long, short = 'y')]
    yes: bool,
    /// API key (overrides environment and key file)
    #[arg(long)]
    key: Option<String>,
    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
    #[arg(long)]
    no_progress: bool,
}

impl StoreArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            directory: self.directory.clone(),
            save_name: self.save_name.clone(),
            save_to: self.save_to,
            ..Default::default()
        }
    }
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            threads: self.threads,
            display_rows: self.display_rows,
            no_print: self.no_print || self.json,
            ..self.store.overrides()
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolve settings and credentials, then run `download` or `update`.
///
/// `window` carries the `--from`/`--to` pair for `download`; `None` means
/// `update`. Returns `false` when any table failed or the run was aborted.
async fn run(
    file: FileConfig,
    args: &RunArgs,
    window: Option<(Option<NaiveDate>, Option<NaiveDate>)>,
) -> Result<bool> {
    let settings = Settings::resolve(file, &args.overrides())?;
    let selection = TableSelection::parse(&args.store.tables)?;

    // Prompt on stderr: stdout is reserved for the report.
    let stdin = std::io::stdin();
    if !tools::confirm_all(&selection, args.yes, stdin.lock(), std::io::stderr())? {
        eprintln!("Aborted: nothing was downloaded.");
        return Ok(false);
    }

    let api_key = resolve_api_key(args.key.as_deref(), &settings.key_file_path())?;
    let provider = Arc::new(NasdaqProvider::new(ProviderConfig::from_settings(
        &settings, api_key,
    ))?);
    let store = open_store(&settings)
        .with_context(|| format!("Failed to open {} output", settings.save_to))?;

    tracing::info!(
        "Syncing {} into {} ({} threads)",
        selection.names().join(", "),
        settings.output_dir().display(),
        settings.threads
    );

    let show_progress = !(args.json || args.no_progress);
    let ctx = RunContext::new(settings, provider, store, show_progress);
    let RunOutput { report, previews } = match window {
        Some((from, to)) => tools::download::execute(&ctx, &selection, from, to).await,
        None => tools::update::execute(&ctx, &selection).await,
    };

    if args.json {
        print_json(&report)?;
    } else {
        print!("{}", format::format_previews(&previews));
        print!("{}", format::format_run(&report));
    }
    Ok(report.all_succeeded())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file = FileConfig::load(cli.config.as_deref())?;

    let ok = match cli.command {
        Command::Download { run: args, from, to } => run(file, &args, Some((from, to))).await?,
        Command::Update { run: args } => run(file, &args, None).await?,
        Command::Status { store, json } => {
            let settings = Settings::resolve(file, &store.overrides())?;
            let selection = TableSelection::parse(&store.tables)?;
            let status = tools::status::execute(&settings, &selection)?;
            if json {
                print_json(&status)?;
            } else {
                print!("{}", format::format_status(&status));
            }
            true
        }
        Command::Tables { json } => {
            let settings = Settings::resolve(file, &Overrides::default())?;
            let tables = tools::tables::execute(&settings.dataset);
            if json {
                print_json(&tables)?;
            } else {
                print!("{}", format::format_tables(&tables));
            }
            true
        }
        Command::Key { key } => {
            let settings = Settings::resolve(file, &Overrides::default())?;
            let path = tools::key::execute(&settings, &key)?;
            println!("API key saved to {}", path.display());
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
