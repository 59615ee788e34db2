// Command Line Interface Module
// clap definitions and colored output helpers for the console binary

pub mod commands;

use clap::{Parser, Subcommand};
use colored::*;

use crate::model::Status;

/// Probe Console - telemetry collection, history, and live dashboard push
#[derive(Parser)]
#[command(name = "probe-console")]
#[command(version)]
#[command(about = "Probe Console - parallel probe collection with trend history and live push", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "probe-console.toml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the console server with periodic collection
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not start the periodic collector
        #[arg(long)]
        no_schedule: bool,
    },

    /// Run one collection pass and print the snapshot
    ///
    /// Each invocation is a fresh process with a cold cache, so this always
    /// runs every source.
    Collect {
        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show trend buckets and regressions from history
    Trends {
        /// Look-back window in hours
        #[arg(long, default_value = "24")]
        hours: u32,

        /// Bucket width in minutes
        #[arg(long, default_value = "60")]
        bucket_minutes: u32,

        /// Print the raw report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete history older than the retention window
    Prune {
        /// Retention in days, defaults to the configured value
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Validate configuration file
    Validate,
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}

/// Colored status label
pub fn status_label(status: Status) -> ColoredString {
    match status {
        Status::Pass => "PASS".green().bold(),
        Status::Warning => "WARN".yellow().bold(),
        Status::Fail => "FAIL".red().bold(),
    }
}

/// Colored score, green at 90 and above, red below 70
pub fn score_label(score: u8) -> ColoredString {
    let text = format!("{score}%");
    match score {
        90..=100 => text.green().bold(),
        70..=89 => text.yellow().bold(),
        _ => text.red().bold(),
    }
}

pub fn print_banner() {
    println!(
        "{}",
        r#"
╔═══════════════════════════════════════════════════╗
║   PROBE CONSOLE                                   ║
║   parallel probes · trend history · live push     ║
╚═══════════════════════════════════════════════════╝
    "#
        .bright_cyan()
        .bold()
    );
}
