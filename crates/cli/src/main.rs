mod cli;
mod config;
mod demo;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use quay_dispatch::Dispatcher;

use crate::cli::CliArgs;
use crate::demo::{DemoPlan, SimulatedFetcher, StdoutSink};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let config = config::load(args.config.as_deref()).context("failed to load configuration")?;
    if args.print_config {
        println!("{}", config::render(&config)?);
        return Ok(());
    }
    let dispatcher = Dispatcher::from_config(config).context("failed to start dispatcher")?;

    let plan = DemoPlan {
        images: args.images.clone(),
        queue: args.queue.clone(),
        concurrency: args.concurrency,
        drain: !args.no_drain,
    };
    let fetcher = Arc::new(SimulatedFetcher::new(
        Duration::from_millis(args.latency_ms),
        args.fail.clone(),
    ));

    let report = demo::run(&dispatcher, &plan, fetcher, Arc::new(StdoutSink))?;
    dispatcher.log_status();
    if report.failed > 0 {
        warn!(failed = report.failed, "some fetches failed");
    }

    if args.metrics {
        let summary = serde_json::json!({
            "report": report,
            "queues": dispatcher.metrics(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("failed to serialize metrics")?
        );
    }

    Ok(())
}
