//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use digest_collectors::{CollectorContext, CollectorRegistry};
use digest_core::{Pipeline, PipelineRun, ProgressReporter, SilentProgress, Stage};
use digest_shared::{AppConfig, DEFAULT_CONFIG_FILE, init_config, load_config_from};
use digest_storage::DedupStore;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// research-digest: a daily digest of discussions, feeds, and papers.
#[derive(Parser)]
#[command(
    name = "research-digest",
    version,
    about = "Collect new discussions, feed entries, and papers into a dated markdown digest.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv). Also turns on per-item skip messages.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors; no progress spinner.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, PartialEq, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline once.
    Run,

    /// List the registered collectors and whether the config enables them.
    Collectors,

    /// Inspect the dedup ledger.
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Ledger subcommands.
#[derive(Subcommand)]
pub(crate) enum StateAction {
    /// Print the number of processed items per source.
    Stats,
    /// Print whether and when an item was processed.
    Check {
        /// Source key (`hn`, `reddit`, `rss`, `arxiv`).
        source: String,
        /// Source-specific item id.
        id: String,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a starter config file.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

const LOG_TARGETS: &[&str] = &[
    "research_digest",
    "digest_core",
    "digest_collectors",
    "digest_storage",
    "digest_shared",
];

/// Default filter directive for the given flags.
fn filter_directive(verbose: u8, quiet: bool) -> String {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize tracing based on CLI flags. `RUST_LOG` takes precedence.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(cli.verbose, cli.quiet)));

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
    let verbose = cli.verbose > 0;
    match cli.command {
        Command::Run => cmd_run(&cli.config, verbose, cli.quiet).await,
        Command::Collectors => cmd_collectors(&cli.config).await,
        Command::State { action } => match action {
            StateAction::Stats => cmd_state_stats(&cli.config).await,
            StateAction::Check { source, id } => cmd_state_check(&cli.config, &source, &id).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(&cli.config),
            ConfigAction::Show => cmd_config_show(&cli.config),
        },
    }
}

/// Open the ledger named by the config.
async fn open_store(config: &AppConfig) -> Result<DedupStore> {
    let db_path = config.storage.resolve_db_path()?;
    let store = DedupStore::open(&db_path).await?;
    Ok(store)
}

/// Build the registry the pipeline and `collectors` command share.
async fn build_registry(config: &AppConfig, verbose: bool) -> Result<CollectorRegistry> {
    let store = Arc::new(open_store(config).await?);
    let ctx = CollectorContext::new(store, &config.http, verbose)?;
    let registry = CollectorRegistry::discover(&ctx);
    if registry.is_empty() {
        return Err(eyre!("no collectors could be initialized"));
    }
    Ok(registry)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: &Path, verbose: bool, quiet: bool) -> Result<()> {
    let config = load_config_from(config_path)?;
    let registry = build_registry(&config, verbose).await?;
    info!(
        config = %config_path.display(),
        collectors = registry.len(),
        "configuration loaded"
    );

    let pipeline = Pipeline::new(config, registry);
    let run = if quiet {
        pipeline.run(&SilentProgress).await?
    } else {
        pipeline.run(&CliProgress::new()).await?
    };

    print_summary(&run);
    Ok(())
}

fn print_summary(run: &PipelineRun) {
    println!();
    println!("  Digest run complete.");
    println!("  Run:        {}", run.run_id);
    println!("  Output:     {}", run.output_root.display());
    for (name, count) in &run.counts {
        println!("  {name:<11} {count} new");
    }
    for (name, error) in &run.failures {
        println!("  {name:<11} FAILED: {error}");
    }
    println!("  Total:      {}", run.total_emitted());
    println!("  Duplicates: {}", run.duplicates_removed);
    if let Some(report) = &run.report_path {
        println!("  Report:     {}", report.display());
    }
    println!("  Time:       {:.1}s", run.elapsed.as_secs_f64());
    println!();
}

async fn cmd_collectors(config_path: &Path) -> Result<()> {
    let config = load_config_from(config_path)?;
    let registry = build_registry(&config, false).await?;

    for (name, collector) in registry.iter() {
        let state = match config.collector_config(name) {
            Some(section) if section.enabled => "enabled",
            Some(_) => "disabled",
            None => "not configured",
        };
        println!("{name:<12} source={:<8} {state}", collector.source_key());
    }
    Ok(())
}

async fn cmd_state_stats(config_path: &Path) -> Result<()> {
    let config = load_config_from(config_path)?;
    let store = open_store(&config).await?;

    let counts = store.source_counts().await?;
    if counts.is_empty() {
        println!("No items processed yet.");
        return Ok(());
    }
    let total: u64 = counts.iter().map(|(_, n)| n).sum();
    for (source, count) in &counts {
        println!("{source:<10} {count}");
    }
    println!("{:<10} {total}", "total");
    Ok(())
}

async fn cmd_state_check(config_path: &Path, source: &str, id: &str) -> Result<()> {
    let config = load_config_from(config_path)?;
    let store = open_store(&config).await?;

    match store.get(source, id).await? {
        Some(item) => println!(
            "{}/{} processed at {}",
            item.source,
            item.unique_id,
            item.processed_at.to_rfc3339()
        ),
        None => println!("{source}/{id} has not been processed"),
    }
    Ok(())
}

fn cmd_config_init(config_path: &Path) -> Result<()> {
    init_config(config_path)?;
    println!("Config initialized at: {}", config_path.display());
    Ok(())
}

fn cmd_config_show(config_path: &Path) -> Result<()> {
    let config = load_config_from(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: Stage) {
        self.spinner.set_message(stage.label().to_string());
    }

    fn collector_started(&self, name: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Collecting [{current}/{total}] {name}"));
    }

    fn collector_finished(&self, name: &str, emitted: Option<usize>) {
        match emitted {
            Some(n) => self.spinner.println(format!("  {name}: {n} new")),
            None => self.spinner.println(format!("  {name}: failed")),
        }
    }

    fn done(&self, _run: &PipelineRun) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_global_flags() {
        let cli = Cli::try_parse_from([
            "research-digest",
            "run",
            "-vv",
            "--config",
            "digest.toml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Run));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("digest.toml"));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn config_defaults_to_working_directory_file() {
        let cli = Cli::try_parse_from(["research-digest", "collectors"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(!cli.quiet);
    }

    #[test]
    fn parses_state_check() {
        let cli = Cli::try_parse_from(["research-digest", "state", "check", "hn", "42"]).unwrap();
        match cli.command {
            Command::State {
                action: StateAction::Check { source, id },
            } => {
                assert_eq!(source, "hn");
                assert_eq!(id, "42");
            }
            _ => panic!("expected state check"),
        }
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["research-digest", "run", "-q", "-v"]).is_err());
    }

    #[test]
    fn filter_levels_follow_flags() {
        assert!(filter_directive(0, false).contains("digest_core=info"));
        assert!(filter_directive(1, false).contains("research_digest=debug"));
        assert!(filter_directive(3, false).contains("digest_collectors=trace"));
        assert!(filter_directive(2, true).starts_with("research_digest=warn"));
    }
}
