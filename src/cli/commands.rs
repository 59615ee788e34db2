// CLI Command Implementations
// One-shot commands against the pipeline with colored output

use super::{error, info, score_label, status_label, success, warning, Commands};
use crate::config::ConsoleConfig;
use crate::context::AppContext;
use crate::history::{HistoryStore, TrendReport};
use crate::model::Snapshot;
use anyhow::Context;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Execute a one-shot command. `serve` is handled by the binary.
pub async fn execute(command: Commands, config: ConsoleConfig) -> anyhow::Result<()> {
    match command {
        Commands::Collect { json } => collect_command(config, json).await,
        Commands::Trends { hours, bucket_minutes, json } => {
            trends_command(config, hours, bucket_minutes, json).await
        }
        Commands::Prune { days } => prune_command(config, days).await,
        Commands::Serve { .. } | Commands::Validate => {
            anyhow::bail!("command is not a one-shot command")
        }
    }
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg}")
    {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Run one collection pass
async fn collect_command(config: ConsoleConfig, json: bool) -> anyhow::Result<()> {
    let context = AppContext::build(config);

    let progress = spinner(&format!(
        "Running {} measurement sources...",
        context.orchestrator.source_count()
    ));
    let snapshot = context.orchestrator.collect(false).await;
    progress.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    if snapshot.domains.is_empty() {
        warning("No measurements collected; every source was disabled or failed");
        return;
    }

    println!();
    for (category, records) in &snapshot.domains {
        let domain = snapshot.summary.domains.get(category).cloned().unwrap_or_default();
        println!(
            "{} {}",
            category.as_str().to_uppercase().bright_cyan().bold(),
            score_label(domain.score)
        );
        for record in records {
            println!(
                "  {} {:<36} {:>10.2} / {:<10.2}",
                status_label(record.status),
                record.name,
                record.value,
                record.target
            );
        }
        println!();
    }

    let summary = &snapshot.summary;
    println!(
        "{} {}  ({} passed, {} warnings, {} failed of {})",
        "Overall:".bright_white(),
        score_label(summary.score),
        summary.passed.to_string().green(),
        summary.warnings.to_string().yellow(),
        summary.failed.to_string().red(),
        summary.total
    );
}

/// Show trends from the history store
async fn trends_command(config: ConsoleConfig, hours: u32, bucket_minutes: u32, json: bool) -> anyhow::Result<()> {
    if hours == 0 || bucket_minutes == 0 {
        anyhow::bail!("--hours and --bucket-minutes must be positive");
    }

    let context = AppContext::build(config);
    let history = context
        .history
        .clone()
        .context("History store is unavailable")?;

    let report = history.query_trends(hours, bucket_minutes).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_trends(&report, hours);
    }
    Ok(())
}

fn print_trends(report: &TrendReport, hours: u32) {
    if report.is_empty() {
        info(&format!("No measurements recorded in the last {hours}h"));
        return;
    }

    println!();
    println!("{}", "Buckets".bright_cyan().bold());
    for bucket in &report.trends {
        println!(
            "  {:<36} avg {:>9.2}  p95 {:>9.2}  n={:<4} pass {:>5.1}%",
            bucket.name,
            bucket.avg,
            bucket.p95,
            bucket.count,
            bucket.pass_rate
        );
    }
    println!();

    if report.regressions.is_empty() {
        success("No regressions against the 7-day baseline");
        return;
    }

    warning(&format!("{} regression(s) against the 7-day baseline", report.regressions.len()));
    for regression in &report.regressions {
        println!(
            "  {:<36} {:>9.2} vs {:>9.2}  {}",
            regression.name,
            regression.current,
            regression.baseline,
            format!("+{:.1}%", regression.change_percent).red().bold()
        );
    }
}

/// Apply the retention policy now
async fn prune_command(config: ConsoleConfig, days: Option<u32>) -> anyhow::Result<()> {
    let context = AppContext::build(config);
    let history = context
        .history
        .clone()
        .context("History store is unavailable")?;
    let days = prune_window(days, &history)?;

    let removed = history.prune(days).await;
    success(&format!(
        "Removed {} measurement(s) older than {} day(s)",
        removed.to_string().yellow(),
        days
    ));
    Ok(())
}

/// Explicit `--days`, else the store's own retention window
fn prune_window(days: Option<u32>, history: &HistoryStore) -> anyhow::Result<u32> {
    match days.unwrap_or_else(|| history.retention_days()) {
        0 => anyhow::bail!("--days must be at least 1"),
        days => Ok(days),
    }
}

/// Validate a configuration file without starting anything
pub fn validate_command(path: &str) -> anyhow::Result<()> {
    info(&format!("Validating {}", path.bright_white()));

    if !Path::new(path).exists() {
        warning("Configuration file not found; defaults would be used");
        return Ok(());
    }

    match ConsoleConfig::load(path) {
        Ok(config) => {
            success("Configuration file is valid");
            println!(
                "  {} {}:{}",
                "Server:".bright_white(),
                config.server.bind_addr,
                config.server.port
            );
            println!(
                "  {} {}",
                "History:".bright_white(),
                config.history.path.display()
            );
            match config.collection_interval() {
                Some(interval) => println!(
                    "  {} every {}s",
                    "Collection:".bright_white(),
                    interval.as_secs()
                ),
                None => println!("  {} on demand only", "Collection:".bright_white()),
            }
            Ok(())
        }
        Err(err) => {
            error(&format!("{err:#}"));
            Err(err)
        }
    }
}
