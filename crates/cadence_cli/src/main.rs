use cadence_core::CadenceConfig;
use cadence_queue::Engine;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod console;
mod echo;

use commands::Command;
use console::ConsoleTransport;
use echo::EchoBackend;

#[derive(Parser, Debug)]
#[command(name = "cadence", author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file (missing file falls back to defaults)
    #[arg(short, long, default_value = "cadence.toml")]
    config: String,

    /// Worker id shown in logs
    #[arg(long, env = "CADENCE_WORKER_ID")]
    worker_id: Option<String>,

    /// Simulated latency of the echo backend, in milliseconds
    #[arg(long, default_value_t = 1500)]
    echo_latency_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut config = CadenceConfig::load_or_default(&args.config);
    if let Some(id) = args.worker_id {
        config.worker.id = id;
    }
    config.validate()?;

    info!("Starting cadence worker {}...", config.worker.id);
    let engine = Engine::start(
        &config,
        Arc::new(ConsoleTransport),
        Arc::new(EchoBackend::new(Duration::from_millis(args.echo_latency_ms))),
    );

    println!("Cadence online. Type /help for commands, 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match commands::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("? {}", e);
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Empty => {}
            Command::Help => println!("{}", commands::HELP),
            Command::Stats => {
                println!("{}", serde_json::to_string_pretty(&engine.stats.snapshot())?);
            }
            Command::Flush => {
                let flushed = engine.scheduler.flush_all().await?;
                println!("Flushed {} conversation(s)", flushed);
            }
            Command::Activity {
                conversation,
                state,
            } => engine.scheduler.notify_activity(conversation, &state)?,
            Command::Message {
                conversation,
                message,
            } => {
                let address = format!("console:{}", conversation);
                engine
                    .scheduler
                    .enqueue(message, conversation, address, false)?;
            }
        }
    }

    shutdown(engine, config.processing.timeout() + Duration::from_secs(60)).await;
    Ok(())
}

/// Flush everything, then give in-flight work a bounded amount of time.
async fn shutdown(engine: Engine, limit: Duration) {
    match engine.scheduler.flush_all().await {
        Ok(0) => {}
        Ok(n) => info!("Flushed {} pending conversation(s) before exit", n),
        Err(e) => warn!("Could not flush on exit: {}", e),
    }

    let stats = Arc::clone(&engine.stats);
    let drained = tokio::time::timeout(limit, async move {
        while stats.queue_depth() > 0 || stats.is_processing() {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("Queue not drained after {}s, exiting anyway", limit.as_secs());
    }

    let snapshot = engine.stats.snapshot();
    info!(
        "Processed {} task(s), {} batched message(s), {} context switch(es)",
        snapshot.total_processed, snapshot.total_batched, snapshot.context_switches
    );
    drop(engine.scheduler);
    engine.dispatcher.abort();
}
