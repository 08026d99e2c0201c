//! CLI entry point for bugfuse.
//!
//! Thin operator surface over [`SearchContext`]: builds and rebuilds the
//! index from the configured bug report file, runs fused searches and
//! manages backup snapshots.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use bugfuse::display::{
    THEME, Theme, create_help_text, create_results_table, create_snapshots_table,
    create_spinner, create_status_table, with_spinner,
};
use bugfuse::store::StoreManifest;
use bugfuse::{BugQuery, LoadOutcome, SearchContext, SearchError, Settings};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Multi-field bug report similarity search
#[derive(Parser)]
#[command(
    name = "bugfuse",
    version = env!("CARGO_PKG_VERSION"),
    about = "Multi-field bug report similarity search",
    long_about = "Index bug reports per field and find similar reports with weighted rank fusion.",
    styles = clap_cargo_style(),
    after_help = create_help_text()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up .bugfuse directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Config,

    /// Build a new index version from the bug report source
    Rebuild,

    /// Find bug reports similar to the given fields
    Search {
        #[arg(long)]
        summary: Option<String>,

        #[arg(long)]
        code: Option<String>,

        #[arg(long = "test-steps")]
        test_steps: Option<String>,

        #[arg(long)]
        expected: Option<String>,

        #[arg(long)]
        actual: Option<String>,

        #[arg(long)]
        log: Option<String>,

        #[arg(long, alias = "env")]
        environment: Option<String>,

        /// Weight overrides, e.g. "summary=0.5,log=0.2"
        #[arg(short, long)]
        weights: Option<String>,

        /// Number of results (defaults to search.default_results)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show index, staging and cache state
    Status,

    /// Manage backup snapshots
    Snapshots {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// List snapshots, oldest first
    List,
    /// Delete snapshots outside the retention policy
    Prune,
    /// Exempt a snapshot from pruning
    Mark { name: String },
    /// Make a snapshot prunable again
    Unmark { name: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("{}", THEME.error_with_icon(&format!("{err:#}")));
        if let Some(search_err) = err.downcast_ref::<SearchError>() {
            for suggestion in search_err.recovery_suggestions() {
                eprintln!("  {}", THEME.apply(&THEME.dim, suggestion));
            }
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "bugfuse=debug" } else { "bugfuse=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!Theme::should_disable_colors())
        .init();
}

fn load_settings(config: Option<&PathBuf>) -> Result<Settings> {
    match config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| anyhow!("Configuration error: {e}"))
}

fn open_context(config: Option<&PathBuf>) -> Result<Arc<SearchContext>> {
    let settings = load_settings(config)?;
    Ok(Arc::new(SearchContext::from_settings(&settings)?))
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force).map_err(|e| anyhow!("{e}"))?;
            println!(
                "{}",
                THEME.success_with_icon(&format!("Created configuration file at {}", path.display()))
            );
        }

        Commands::Config => {
            let settings = load_settings(config)?;
            println!("{}", toml::to_string_pretty(&settings)?);
        }

        Commands::Rebuild => {
            let context = open_context(config)?;
            let spinner = create_spinner("Rebuilding index");
            let outcome = context.spawn_rebuild().await;
            spinner.finish_and_clear();
            let report = outcome.context("rebuild task panicked")??;

            if cli.json {
                return print_json(&report);
            }
            println!(
                "{}",
                THEME.success_with_icon(&format!(
                    "Published {} with {} bug reports in {} ms",
                    report.version, report.report_count, report.elapsed_ms
                ))
            );
            if let Some(snapshot) = &report.snapshot {
                println!("  backup: {}", THEME.apply(&THEME.path, snapshot.path.display()));
            }
            if report.skipped_fields > 0 {
                println!(
                    "{}",
                    THEME.warning_with_icon(&format!(
                        "{} field texts could not be embedded",
                        report.skipped_fields
                    ))
                );
            }
        }

        Commands::Search {
            summary,
            code,
            test_steps,
            expected,
            actual,
            log,
            environment,
            weights,
            limit,
        } => {
            let context = open_context(config)?;
            let query = BugQuery {
                summary,
                code,
                test_steps,
                expected_result: expected,
                actual_result: actual,
                log,
                environment,
            };
            let weights = weights
                .map(|spec| context.weights().with_overrides(&spec))
                .transpose()?;

            with_spinner("Loading index", || context.load())?;
            let response = context.search(&query, weights.as_ref(), limit)?;

            if cli.json {
                return print_json(&response);
            }
            if response.hits.is_empty() {
                println!("{}", THEME.warning_with_icon("No similar bug reports found"));
                return Ok(());
            }
            println!(
                "{} {}",
                THEME.apply(&THEME.header, format!("{} query", response.shape)),
                THEME.apply(&THEME.dim, format!("against {}", response.version)),
            );
            println!("{}", create_results_table(&response));
            for field in &response.dropped_fields {
                println!(
                    "{}",
                    THEME.warning_with_icon(&format!(
                        "{field} text could not be embedded and was ignored"
                    ))
                );
            }
        }

        Commands::Status => {
            let context = open_context(config)?;
            if StoreManifest::exists(&context.store().live_dir()) {
                if let LoadOutcome::Rebuilt(report) = context.load()? {
                    tracing::info!(version = %report.version, "persisted index was incompatible and has been rebuilt");
                }
            }
            let status = context.status();
            if cli.json {
                return print_json(&status);
            }
            println!("{}", create_status_table(&status));
        }

        Commands::Snapshots { action } => {
            let context = open_context(config)?;
            let backups = context.store().backups();
            match action {
                SnapshotAction::List => {
                    let snapshots = backups.list()?;
                    if cli.json {
                        return print_json(&snapshots);
                    }
                    if snapshots.is_empty() {
                        println!("No snapshots in {}", backups.dir().display());
                    } else {
                        println!("{}", create_snapshots_table(&snapshots));
                    }
                }
                SnapshotAction::Prune => {
                    let pruned = context.store().prune_snapshots()?;
                    if cli.json {
                        return print_json(&pruned);
                    }
                    println!(
                        "{}",
                        THEME.success_with_icon(&format!("Pruned {} snapshot(s)", pruned.len()))
                    );
                }
                SnapshotAction::Mark { name } => {
                    let snapshot = backups.set_important(&name, true)?;
                    println!(
                        "{}",
                        THEME.success_with_icon(&format!("{} marked important", snapshot.name))
                    );
                }
                SnapshotAction::Unmark { name } => {
                    let snapshot = backups.set_important(&name, false)?;
                    println!(
                        "{}",
                        THEME.success_with_icon(&format!("{} can be pruned again", snapshot.name))
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
