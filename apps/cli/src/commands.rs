//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use grandguru_api::AppState;
use grandguru_core::{CrawlJob, JobService, StorageIndexer};
use grandguru_crawler::{CrawlParams, run_worker};
use grandguru_shared::{
    AppConfig, CrawlRequest, EngineSettings, LogEvent, LogStatus, ProgressSnapshot, init_config,
    load_config, load_config_from, storage_path,
};
use grandguru_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// GrandGuru: crawl product sites into a searchable knowledge base.
#[derive(Parser)]
#[command(
    name = "grandguru",
    version,
    about = "Crawl product and documentation sites and stream job progress.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.grandguru/grandguru.toml).
    #[arg(long, global = true, env = "GRANDGURU_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Start the HTTP/WebSocket API server.
    Serve {
        /// Address to listen on (overrides `[server] bind`).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run the crawl worker: one JSON record per line on stdout.
    ///
    /// Normally spawned by the job engine. Stops early on a
    /// `{"type":"shutdown"}` line or end of input on stdin.
    Worker(WorkerArgs),

    /// Crawl a site in-process and store what it finds.
    Crawl {
        /// Start URL or bare host.
        url: String,

        /// Maximum link depth.
        #[arg(long)]
        depth: Option<u32>,

        /// Concurrent requests.
        #[arg(long)]
        concurrency: Option<u32>,

        /// Seconds to wait before each request.
        #[arg(long)]
        delay: Option<f64>,

        /// Stop after this many records.
        #[arg(long)]
        item_limit: Option<u64>,

        /// Route worker traffic through the configured proxy.
        #[arg(long)]
        use_proxies: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Worker flags, as appended by the job engine.
#[derive(Args)]
pub(crate) struct WorkerArgs {
    #[arg(long)]
    start_url: String,

    #[arg(long, default_value_t = 2)]
    depth: u32,

    #[arg(long, default_value_t = 8)]
    concurrency: u32,

    /// Seconds.
    #[arg(long, default_value_t = 0.5)]
    delay: f64,

    #[arg(long)]
    item_limit: Option<u64>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so the worker's
/// stdout carries records only.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "grandguru=info",
        1 => "grandguru=debug,tower_http=debug",
        _ => "grandguru=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Serve { bind } => cmd_serve(config_path, bind).await,
        Command::Worker(args) => cmd_worker(args).await,
        Command::Crawl {
            url,
            depth,
            concurrency,
            delay,
            item_limit,
            use_proxies,
        } => {
            let request = CrawlRequest {
                domain: url,
                depth,
                concurrency,
                delay,
                use_proxies,
                item_limit,
            };
            cmd_crawl(config_path, request).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

/// Job engine and content store shared by `serve` and `crawl`.
async fn open_engine(config: &AppConfig) -> Result<(Arc<JobService>, Arc<Storage>)> {
    let db_path = storage_path(config)?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| eyre!("cannot create {}: {e}", parent.display()))?;
    }
    let storage = Arc::new(Storage::open(&db_path).await?);

    let self_exe =
        std::env::current_exe().map_err(|e| eyre!("cannot locate own executable: {e}"))?;
    let settings = EngineSettings::from_config(config, &self_exe);
    info!(
        db = %db_path.display(),
        worker = %settings.program.display(),
        "job engine ready"
    );

    let indexer = Arc::new(StorageIndexer::new(storage.clone()));
    Ok((Arc::new(JobService::new(settings, indexer)), storage))
}

async fn cmd_serve(config_path: Option<&Path>, bind: Option<String>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let (jobs, storage) = open_engine(&config).await?;

    println!("GrandGuru API listening on http://{bind}");
    let state = AppState {
        jobs,
        storage,
        config: Arc::new(config),
    };
    grandguru_api::serve(state, &bind).await?;
    Ok(())
}

pub(crate) async fn cmd_worker(args: WorkerArgs) -> Result<()> {
    let start_url = Url::parse(&args.start_url)
        .map_err(|e| eyre!("invalid start URL '{}': {e}", args.start_url))?;
    if !args.delay.is_finite() || args.delay < 0.0 {
        return Err(eyre!("delay must be a non-negative number of seconds"));
    }

    let summary = run_worker(CrawlParams {
        start_url,
        depth: args.depth,
        concurrency: args.concurrency,
        delay: Duration::from_secs_f64(args.delay),
        item_limit: args.item_limit,
    })
    .await?;

    info!(
        pages = summary.pages_fetched,
        records = summary.records,
        errors = summary.errors.len(),
        interrupted = summary.interrupted,
        elapsed_ms = summary.duration.as_millis() as u64,
        "worker finished"
    );
    Ok(())
}

async fn cmd_crawl(config_path: Option<&Path>, request: CrawlRequest) -> Result<()> {
    let config = resolve_config(config_path)?;
    let job = CrawlJob::from_request(&request, &config.crawl)?;
    let (jobs, _storage) = open_engine(&config).await?;

    let start_url = job.start_url.clone();
    let job_id = jobs.launch(job)?;
    let mut events = jobs.subscribe(&job_id).await?;
    info!(%job_id, %start_url, "crawl started");

    let progress = CliProgress::new();
    let mut last: Option<LogEvent> = None;
    let mut snapshot = ProgressSnapshot::default();
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    progress.update(&event);
                    if let Some(snap) = event.progress() {
                        snapshot = snap;
                    }
                    last = Some(event);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                progress.spinner.set_message("stopping…");
                jobs.stop(&job_id).await;
            }
        }
    }
    progress.spinner.finish_and_clear();

    let Some(terminal) = last else {
        return Err(eyre!("job {job_id} ended without events"));
    };
    println!();
    match terminal.status {
        LogStatus::Completed => println!("  Crawl completed"),
        _ => println!("  Crawl stopped"),
    }
    println!("  Job:      {job_id}");
    println!("  URL:      {start_url}");
    println!("  Fetched:  {}", snapshot.fetched);
    println!("  Ingested: {}", snapshot.ingested);
    println!("  Errors:   {}", snapshot.errors);
    println!("  Time:     {:.1}s", snapshot.elapsed);
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner that follows a job's event stream.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn update(&self, event: &LogEvent) {
        match event.status {
            LogStatus::Started => self.spinner.set_message(format!("crawling {}", event.url)),
            LogStatus::Fetched => self.spinner.set_message(format!("fetched {}", event.url)),
            LogStatus::Progress => {
                if let Some(snap) = event.progress() {
                    self.spinner.set_message(format!(
                        "{} fetched, {} ingested, {} errors",
                        snap.fetched, snap.ingested, snap.errors
                    ));
                }
            }
            LogStatus::Error => {
                let detail = event.detail.as_deref().unwrap_or("unknown error");
                self.spinner.println(format!("  error: {detail}"));
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
