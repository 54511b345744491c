use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use lucidity_cache::SweepReport;
use lucidity_core::{ChangeCollector, ChangeRequest, LucidityConfig};
use lucidity_logging::LogFormat;

#[derive(Parser, Debug)]
#[command(
    name = "lucidity",
    about = "Prepare structured git change sets for code review",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    log_format: LogFormatChoice,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Config file (default: ./lucidity.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect the changes of a local or remote repository as JSON
    Analyze {
        /// Local path, clone URL, or owner/repo[@branch]
        workspace: String,

        /// Only include changes under this repository-relative path
        #[arg(long)]
        path: Option<String>,

        /// Commit range such as HEAD~1..HEAD (default: uncommitted changes)
        #[arg(long)]
        commits: Option<String>,

        /// Print JSON on a single line
        #[arg(long)]
        compact: bool,
    },
    /// Remove cached repositories that have not been used recently
    CleanupCache {
        /// Remove repositories idle for at least this many days
        #[arg(long)]
        days: Option<u64>,

        /// Show what would be removed without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let _log_guard = lucidity_logging::init_tracing(
        &cli.log_level,
        cli.log_format.into(),
        cli.log_file.as_deref(),
    )
    .context("Failed to initialize logging")?;

    let working_dir = std::env::current_dir().context("Failed to get current directory")?;
    let config = LucidityConfig::load(cli.config.as_deref(), &working_dir)
        .context("Failed to load configuration")?;

    match cli.command {
        Command::Analyze {
            workspace,
            path,
            commits,
            compact,
        } => {
            let mut request = ChangeRequest::new(workspace);
            if let Some(path) = path {
                request = request.with_path(path);
            }
            if let Some(commits) = commits {
                request = request.with_commits(commits);
            }
            analyze(&config, &request, compact).await
        }
        Command::CleanupCache { days, dry_run } => {
            let config = LucidityConfig {
                cleanup_days: days.unwrap_or(config.cleanup_days),
                ..config
            };
            let report = config
                .repository_cache()
                .sweep(config.cleanup_max_idle(), dry_run)
                .context("Cache cleanup failed")?;
            print_sweep(&report, config.cleanup_days);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn analyze(
    config: &LucidityConfig,
    request: &ChangeRequest,
    compact: bool,
) -> Result<ExitCode> {
    if !config.runner().is_available().await {
        anyhow::bail!(
            "git executable not found: {}",
            config.git_binary.display()
        );
    }
    let collector = ChangeCollector::from_config(config);

    match collector.collect(request).await {
        Ok(record) => {
            let json = if compact {
                serde_json::to_string(&record)?
            } else {
                serde_json::to_string_pretty(&record)?
            };
            println!("{}", json);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            eprintln!("{}", serde_json::to_string(&err.report())?);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_sweep(report: &SweepReport, days: u64) {
    let verb = if report.dry_run { "Would remove" } else { "Removed" };

    eprintln!();
    eprintln!("{}", "=== CACHE CLEANUP ===".bold());
    eprintln!("Cache directory: {}", report.cache_dir.display());
    eprintln!("Idle threshold: {} day(s)", days);
    eprintln!("Repositories scanned: {}", report.scanned);

    for slot in &report.removed {
        eprintln!(
            "  {} {} (last used {}, {})",
            "-".red(),
            slot.cache_key,
            slot.last_accessed.format("%Y-%m-%d %H:%M UTC"),
            format_size(slot.size_bytes)
        );
    }

    if report.removed.is_empty() {
        eprintln!("{}", "Nothing to remove.".green());
    } else {
        eprintln!(
            "{} {} repositor{}, {}",
            verb.yellow(),
            report.removed.len(),
            if report.removed.len() == 1 { "y" } else { "ies" },
            format_size(report.freed_bytes)
        );
    }
    if !report.stale_staging.is_empty() {
        eprintln!(
            "{} {} stale staging director{}",
            verb.yellow(),
            report.stale_staging.len(),
            if report.stale_staging.len() == 1 { "y" } else { "ies" }
        );
    }
    if report.skipped_locked > 0 {
        eprintln!(
            "Skipped {} repositor{} in use",
            report.skipped_locked,
            if report.skipped_locked == 1 { "y" } else { "ies" }
        );
    }
    if report.dry_run {
        eprintln!("{}", "Dry run: nothing was deleted.".dimmed());
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
