//! perfcore - main CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::future::join_all;
use perfcore::cache::compression;
use perfcore::cli::{Args, Commands};
use perfcore::monitor::SystemSampler;
use perfcore::tasks::{TaskKind, TaskSpec};
use perfcore::{Config, Optimizer, Priority, SetOptions};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = Config::load(args.config.clone()).context("Failed to load configuration")?;

    match &args.command {
        Commands::Report { seconds } => run_report(config, *seconds).await?,
        Commands::Optimize => run_optimize(config).await?,
        Commands::Suggest => run_suggest(config).await?,
        Commands::Config { write } => show_config(&config, write.as_deref())?,
    }

    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.verbosity().filter_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Exercise every component for `seconds`, then print the export
async fn run_report(config: Config, seconds: u64) -> Result<()> {
    let optimizer = Arc::new(Optimizer::new(config).context("Invalid configuration")?);
    optimizer.start();
    info!(seconds, "running synthetic workload");

    optimizer
        .background()
        .register_handler(TaskKind::Compression, |payload| {
            let text = payload["text"].as_str().ok_or("payload has no text")?;
            let packed = compression::compress(text.as_bytes()).map_err(|e| e.to_string())?;
            Ok(json!({ "original": text.len(), "compressed": packed.len() }))
        });

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut round = 0u64;
    while Instant::now() < deadline {
        run_workload_round(&optimizer, round).await?;
        round += 1;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    match optimizer.perform_optimization().await.run() {
        Some(run) => info!(run = run.run, failed = run.failed_steps(), "final optimization cycle"),
        None => warn!("optimization cycle already in progress"),
    }
    println!("{}", optimizer.export_json()?);
    optimizer.stop();
    Ok(())
}

async fn run_workload_round(optimizer: &Optimizer, round: u64) -> Result<()> {
    let started = Instant::now();
    let cache = optimizer.cache();
    let memory = optimizer.memory();
    let background = optimizer.background();

    let text = format!("round {} ", round).repeat(200);
    for i in 0..10 {
        let priority = if i % 3 == 0 { Priority::High } else { Priority::Normal };
        cache.set(
            format!("doc:{}:{}", round % 20, i),
            &text,
            SetOptions::new()
                .with_priority(priority)
                .with_tag(format!("round:{}", round % 20)),
        )?;
    }
    for i in 0..20 {
        let _: Option<String> = cache.get(&format!("doc:{}:{}", (round + i) % 25, i % 10))?;
    }

    let mut buffer = memory.get_pooled_object("buffers", || Vec::<u8>::with_capacity(4096))?;
    buffer.extend_from_slice(text.as_bytes());
    memory.return_pooled_object(buffer);

    let specs = (0..4)
        .map(|i| {
            let priority = if i == 0 { Priority::High } else { Priority::Low };
            TaskSpec::new(TaskKind::Compression, json!({ "text": text })).with_priority(priority)
        })
        .collect();
    for result in join_all(background.submit_batch(specs)).await {
        if let Err(err) = result {
            warn!(error = %err, "workload task failed");
        }
    }

    let elapsed = started.elapsed().as_secs_f64() * 1000.0;
    optimizer
        .monitor()
        .record_operation("workload_round", elapsed, Some(json!({ "round": round })));
    debug!(round, elapsed_ms = elapsed, "workload round finished");
    Ok(())
}

async fn run_optimize(config: Config) -> Result<()> {
    let optimizer = Optimizer::new(config).context("Invalid configuration")?;
    let outcome = optimizer.perform_optimization().await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_suggest(config: Config) -> Result<()> {
    let optimizer = Optimizer::new(config).context("Invalid configuration")?;
    let sample = SystemSampler::new().sample().await;
    optimizer.monitor().record_system_sample(sample);

    let suggestions = optimizer.get_optimization_suggestions();
    if suggestions.is_empty() {
        println!("No suggestions, everything is within thresholds.");
        return Ok(());
    }
    for suggestion in suggestions {
        println!(
            "[{:?}] {} ({})",
            suggestion.severity, suggestion.title, suggestion.category
        );
        println!("    {}", suggestion.description);
        for action in &suggestion.actions {
            println!("    - {}", action);
        }
    }
    Ok(())
}

fn show_config(config: &Config, write: Option<&Path>) -> Result<()> {
    match write {
        Some(path) => {
            config
                .save(path)
                .with_context(|| format!("Failed to write config to {}", path.display()))?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{}", config.to_toml()?),
    }
    Ok(())
}
