// Probe Console
// Binary entry point: one-shot commands or the long-running console server

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::sync::Arc;
use tracing::{error, info};

use probe_console::cli::{self, Cli, Commands};
use probe_console::config::ConsoleConfig;
use probe_console::orchestrator::scheduler::CollectionScheduler;
use probe_console::{dashboard, observability, signals, AppContext};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Validate = cli.command {
        return cli::commands::validate_command(&cli.config);
    }

    let config = ConsoleConfig::load(&cli.config)?;
    observability::init(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Serve { port, no_schedule } => {
            cli::print_banner();
            run_console(config, port, no_schedule).await
        }
        command => cli::commands::execute(command, config).await,
    }
}

/// Run the console until SIGINT/SIGTERM
async fn run_console(mut config: ConsoleConfig, port: Option<u16>, no_schedule: bool) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let interval = config.collection_interval();

    let context = Arc::new(AppContext::build(config));
    info!(
        sources = context.orchestrator.source_count(),
        persistence = context.history.is_some(),
        "Pipeline initialized"
    );

    let shutdown_signal = signals::create_shutdown_listener()?;
    let coordinator = signals::ShutdownCoordinator::new();

    let scheduler = match (interval, no_schedule) {
        (Some(interval), false) => {
            let scheduler = CollectionScheduler::new(context.orchestrator.clone(), interval);
            scheduler.start();
            Some(scheduler)
        }
        _ => {
            info!("Periodic collection disabled; snapshots run on demand");
            None
        }
    };

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let server = tokio::spawn(dashboard::serve(listener, context.clone(), coordinator.wait()));

    println!();
    cli::success("Probe Console is ready");
    cli::info(&format!("Live feed: {}", format!("ws://{addr}/ws").cyan().underline()));
    cli::info(&format!("Snapshot:  {}", format!("http://{addr}/api/snapshot").cyan().underline()));
    cli::info("Press Ctrl+C for graceful shutdown");
    println!();

    shutdown_signal.await;
    info!("Shutdown signal received - stopping console");

    if let Some(scheduler) = &scheduler {
        scheduler.stop();
    }
    coordinator.trigger();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("Console server error: {err:#}"),
        Err(err) => error!("Console server task failed: {err}"),
    }

    info!(viewers = context.hub.viewer_count(), "Graceful shutdown complete");
    Ok(())
}
