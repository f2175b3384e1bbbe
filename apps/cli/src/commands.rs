//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use topicharvest_core::{HarvestInput, HarvestSummary, Harvester, ProgressReporter};
use topicharvest_shared::{
    AppConfig, HarvestConfig, Outcome, SeedUrl, StatusCounts, Topic, init_config, load_config,
    load_config_from,
};
use topicharvest_storage::{DatasetSink, ProgressStore, count_dataset_lines, read_error_list};

use crate::topics::load_topics;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// topicharvest: build a text dataset from web search results.
#[derive(Parser)]
#[command(
    name = "topicharvest",
    version,
    about = "Search the web for topics and harvest the main text of the result pages.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.topicharvest/topicharvest.toml).
    #[arg(long, global = true, env = "TOPICHARVEST_CONFIG")]
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
    /// Discover URLs for topics and harvest them.
    Harvest {
        /// Comma-separated topics, or a .json/.yaml/.txt/.md topic file.
        #[arg(short, long)]
        topics: String,

        /// Total URL budget, split evenly across topics.
        #[arg(short, long, conflicts_with = "per_topic")]
        websites: Option<usize>,

        /// URLs examined per topic.
        #[arg(long)]
        per_topic: Option<usize>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Re-attempt the URLs in an error list.
    Retry {
        /// Error list to re-feed (defaults to the failed URLs in <out>).
        #[arg(long)]
        errors: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Show progress counts for an output directory.
    Status {
        /// Output directory (defaults to the configured one).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Settings shared by the commands that run a harvest.
#[derive(Args)]
pub(crate) struct RunArgs {
    /// Output directory for progress lists and the dataset.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Concurrent page fetches.
    #[arg(long)]
    fetch_concurrency: Option<usize>,

    /// Topics searched concurrently.
    #[arg(long)]
    topic_concurrency: Option<usize>,

    /// Minimum extracted text length in characters.
    #[arg(long)]
    min_chars: Option<usize>,
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "topicharvest=info,topicharvest_core=info",
        1 => "topicharvest=debug,topicharvest_core=debug,topicharvest_discovery=debug,topicharvest_crawler=debug",
        _ => "topicharvest=trace,topicharvest_core=trace,topicharvest_discovery=trace,topicharvest_crawler=trace,topicharvest_extract=trace,topicharvest_storage=trace",
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
    let config_path = cli.config;
    match cli.command {
        Command::Harvest {
            topics,
            websites,
            per_topic,
            run,
        } => cmd_harvest(config_path.as_deref(), &topics, websites, per_topic, &run).await,
        Command::Retry { errors, run } => cmd_retry(config_path.as_deref(), errors, &run).await,
        Command::Status { out, json } => cmd_status(config_path.as_deref(), out, json),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_harvest(
    config_path: Option<&Path>,
    topics_arg: &str,
    websites: Option<usize>,
    per_topic: Option<usize>,
    run: &RunArgs,
) -> Result<()> {
    let topics = load_topics(topics_arg)?;
    let mut config = harvest_config(config_path, run)?;
    if let Some(n) = per_topic {
        config.urls_per_topic = n;
    } else if let Some(total) = websites {
        config.urls_per_topic = split_budget(total, topics.len());
    }

    info!(
        topics = topics.len(),
        per_topic = config.urls_per_topic,
        out = %config.output_dir.display(),
        "harvesting"
    );

    let input = HarvestInput {
        topics,
        seeds: Vec::new(),
    };
    run_harvest(config, input).await
}

async fn cmd_retry(config_path: Option<&Path>, errors: Option<PathBuf>, run: &RunArgs) -> Result<()> {
    let config = harvest_config(config_path, run)?;
    let (seeds, source) = match errors {
        Some(path) => {
            if !path.exists() {
                return Err(eyre!("no error list at '{}'", path.display()));
            }
            (read_error_list(&path)?, path)
        }
        // The master list is current even when the error view lags behind it.
        None => {
            let dir = &config.output_dir;
            if !dir.join(ProgressStore::MASTER_FILE).exists() {
                return Err(eyre!("no harvest state in '{}'", dir.display()));
            }
            let store = ProgressStore::load(dir)?;
            (store.failed(), store.master_path())
        }
    };

    let seeds: Vec<SeedUrl> = seeds.into_iter().map(SeedUrl::from).collect();
    if seeds.is_empty() {
        println!("Nothing to retry: no failed URLs in {}.", source.display());
        return Ok(());
    }
    info!(count = seeds.len(), source = %source.display(), "retrying failed URLs");

    let input = HarvestInput {
        topics: Vec::new(),
        seeds,
    };
    run_harvest(config, input).await
}

fn cmd_status(config_path: Option<&Path>, out: Option<PathBuf>, json: bool) -> Result<()> {
    let app = app_config(config_path)?;
    let dir = out.unwrap_or_else(|| PathBuf::from(&app.defaults.output_dir));
    if !dir.join(ProgressStore::MASTER_FILE).exists() {
        return Err(eyre!("no harvest state in '{}'", dir.display()));
    }

    let store = ProgressStore::load(&dir)?;
    let counts = store.counts();
    let dataset_lines = count_dataset_lines(&dir.join(DatasetSink::FILE_NAME))?;

    if json {
        let report = serde_json::json!({
            "output_dir": dir,
            "counts": counts,
            "dataset_records": dataset_lines,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("  Output:    {}", dir.display());
    println!("  Total:     {}", counts.total);
    println!("  Pending:   {}", counts.pending);
    println!("  Completed: {}", counts.completed);
    println!("  Failed:    {}", counts.failed);
    println!("  Dataset:   {dataset_lines} records");
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config: AppConfig = app_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn app_config(config_path: Option<&Path>) -> Result<AppConfig> {
    Ok(match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

/// Resolve the effective harvest config: file defaults, then CLI overrides.
fn harvest_config(config_path: Option<&Path>, run: &RunArgs) -> Result<HarvestConfig> {
    let mut config = HarvestConfig::from(&app_config(config_path)?);
    if let Some(out) = &run.out {
        config.output_dir = out.clone();
    }
    if let Some(n) = run.fetch_concurrency {
        config.fetch_concurrency = n;
    }
    if let Some(n) = run.topic_concurrency {
        config.topic_concurrency = n;
    }
    if let Some(n) = run.min_chars {
        config.min_text_chars = n;
    }
    config.validate()?;
    Ok(config)
}

/// Per-topic share of a total URL budget; every topic gets at least one.
fn split_budget(total: usize, topic_count: usize) -> usize {
    (total / topic_count.max(1)).max(1)
}

async fn run_harvest(config: HarvestConfig, input: HarvestInput) -> Result<()> {
    let harvester = Harvester::new(config).wrap_err("failed to set up harvester")?;
    let stop = CancellationToken::new();
    tokio::spawn(stop_on_ctrl_c(stop.clone()));

    let reporter = CliProgress::new();
    let summary = harvester.run(input, stop, &reporter).await?;
    print_summary(&summary);
    Ok(())
}

/// First Ctrl-C stops the run gracefully; a second one exits immediately.
async fn stop_on_ctrl_c(stop: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("stopping: letting in-flight pages finish (Ctrl-C again to abort)");
    stop.cancel();
    if tokio::signal::ctrl_c().await.is_ok() {
        std::process::exit(130);
    }
}

fn print_summary(summary: &HarvestSummary) {
    println!();
    if summary.stopped {
        println!("  Harvest stopped; run again to resume.");
    } else {
        println!("  Harvest complete!");
    }
    println!("  Run:       {}", summary.run_id);
    println!("  New URLs:  {}", summary.discovered_new);
    println!("  Completed: {}", summary.completed);
    println!("  Failed:    {}", summary.failed);
    println!("  Pending:   {}", summary.pending);
    println!(
        "  Totals:    {} completed / {} failed / {} total",
        summary.totals.completed, summary.totals.failed, summary.totals.total
    );
    println!("  Dataset:   {}", summary.dataset_path.display());
    println!("  Errors:    {}", summary.error_list_path.display());
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    admitted: AtomicUsize,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner,
            admitted: AtomicUsize::new(0),
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn url_admitted(&self, _url: &str, topic: &Topic) {
        let n = self.admitted.fetch_add(1, Ordering::Relaxed) + 1;
        self.spinner
            .set_message(format!("Discovered {n} new URLs (latest topic: {topic})"));
    }

    fn url_finished(&self, url: &str, outcome: &Outcome, totals: &StatusCounts) {
        let mark = match outcome {
            Outcome::Completed { .. } => "ok",
            Outcome::Failed { .. } => "failed",
        };
        self.spinner.set_message(format!(
            "[{done}/{total}] {mark} {url}",
            done = totals.completed + totals.failed,
            total = totals.total
        ));
    }

    fn done(&self, _summary: &HarvestSummary) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_split_across_topics() {
        assert_eq!(split_budget(10, 3), 3);
        assert_eq!(split_budget(2, 5), 1);
        assert_eq!(split_budget(7, 0), 7);
    }

    #[test]
    fn cli_parses_harvest_flags() {
        let cli = Cli::try_parse_from([
            "topicharvest",
            "harvest",
            "--topics",
            "rust,go",
            "--websites",
            "20",
            "--out",
            "data",
            "--fetch-concurrency",
            "8",
        ])
        .unwrap();
        match cli.command {
            Command::Harvest {
                topics,
                websites,
                run,
                ..
            } => {
                assert_eq!(topics, "rust,go");
                assert_eq!(websites, Some(20));
                assert_eq!(run.out.as_deref(), Some(Path::new("data")));
                assert_eq!(run.fetch_concurrency, Some(8));
            }
            _ => panic!("expected harvest"),
        }
    }

    #[test]
    fn websites_and_per_topic_conflict() {
        let parsed = Cli::try_parse_from([
            "topicharvest",
            "harvest",
            "--topics",
            "rust",
            "--websites",
            "5",
            "--per-topic",
            "2",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn status_reads_counts_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProgressStore::load(dir.path()).unwrap();
        store
            .admit("https://example.com/a", &Topic::new("rust").unwrap())
            .unwrap();
        assert!(cmd_status(None, Some(dir.path().to_path_buf()), true).is_ok());
    }

    #[test]
    fn status_does_not_touch_the_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProgressStore::load(dir.path()).unwrap();
        store
            .admit("https://example.com/a", &Topic::new("rust").unwrap())
            .unwrap();

        let out = Some(dir.path().to_path_buf());
        let dataset = dir.path().join(DatasetSink::FILE_NAME);
        cmd_status(None, out.clone(), true).unwrap();
        assert!(!dataset.exists());

        // A record still being appended has no newline yet.
        let partial = b"{\"url\":\"https://example.com/done\"}\n{\"url\":\"https://exa";
        std::fs::write(&dataset, partial).unwrap();
        cmd_status(None, out, true).unwrap();
        assert_eq!(std::fs::read(&dataset).unwrap(), partial);
    }
}
