//! AgentPool CLI - drive a pool of demonstration agents from the terminal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agentpool_core::{AgentKind, TaskContext};
use agentpool_runtime::selector::classify;
use agentpool_runtime::{AgentPool, PoolConfig, PoolEvent};

mod demo;
mod output;

use demo::{echo_registry, FAIL_MARKER_SETTING, LATENCY_MS_SETTING};
use output::OutputFormat;

/// AgentPool CLI - priority dispatch over a bounded agent pool
#[derive(Parser)]
#[command(name = "agentpool")]
#[command(about = "Run tasks through an AgentPool of demonstration agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit messages to a pool of echo agents and report the final status
    Run {
        /// Messages to submit (read from stdin, one per line, when omitted)
        messages: Vec<String>,

        /// Priority for every submitted task
        #[arg(short, long, default_value = "1")]
        priority: u32,

        /// Pin every task to one agent kind instead of selecting by keyword
        #[arg(short, long)]
        kind: Option<AgentKind>,

        /// JSON pool configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the per-kind instance capacity
        #[arg(long)]
        max_agents_per_type: Option<usize>,

        /// Enforce per-task timeouts and retries
        #[arg(long)]
        enforce_task_limits: bool,

        /// Simulated agent latency in milliseconds
        #[arg(long, default_value = "50")]
        latency_ms: u64,

        /// Tasks whose message contains this text fail
        #[arg(long)]
        fail_marker: Option<String>,

        /// Report format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Log pool events as they happen
        #[arg(long)]
        events: bool,

        /// Give up waiting for outcomes after this many seconds
        #[arg(long, default_value = "30")]
        wait_secs: u64,
    },

    /// Show the agent kind the keyword classifier picks for a message
    Classify {
        /// Message to classify
        message: String,
    },

    /// List agent kinds and their capabilities
    Kinds,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the report only.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("agentpool=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            messages,
            priority,
            kind,
            config,
            max_agents_per_type,
            enforce_task_limits,
            latency_ms,
            fail_marker,
            format,
            events,
            wait_secs,
        } => {
            let mut pool_config = match config {
                Some(path) => PoolConfig::from_json_file(path)?,
                None => PoolConfig::default(),
            };
            if let Some(max) = max_agents_per_type {
                pool_config.max_agents_per_type = max;
            }
            pool_config.enforce_task_limits |= enforce_task_limits;
            pool_config
                .agent_settings
                .insert(LATENCY_MS_SETTING.to_string(), latency_ms.to_string());
            if let Some(marker) = fail_marker {
                pool_config
                    .agent_settings
                    .insert(FAIL_MARKER_SETTING.to_string(), marker);
            }

            let messages = if messages.is_empty() {
                read_stdin_messages().await?
            } else {
                messages
            };

            run(
                pool_config,
                messages,
                priority,
                kind,
                format,
                events,
                Duration::from_secs(wait_secs),
            )
            .await?;
        }
        Commands::Classify { message } => {
            println!("{}", classify(&message));
        }
        Commands::Kinds => {
            list_kinds();
        }
    }

    Ok(())
}

async fn run(
    config: PoolConfig,
    messages: Vec<String>,
    priority: u32,
    kind: Option<AgentKind>,
    format: OutputFormat,
    events: bool,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = AgentPool::builder(config, Arc::new(echo_registry()));
    let event_log = if events {
        let (tx, rx) = mpsc::unbounded_channel();
        builder = builder.with_events(tx);
        Some(tokio::spawn(log_events(rx)))
    } else {
        None
    };
    let pool = builder.start()?;

    for message in &messages {
        let task_id = pool
            .submit_task(message.clone(), TaskContext::new(), priority, kind)
            .await?;
        info!(task_id = %task_id, "Submitted task");
    }

    let submitted = messages.len() as u64;
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let status = pool.status().await;
        if status.metrics.finished_tasks() >= submitted {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                finished = status.metrics.finished_tasks(),
                submitted, "Gave up waiting for task outcomes"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let status = pool.status().await;
    println!("{}", output::render(&status, format)?);

    pool.shutdown().await?;
    drop(pool);
    if let Some(handle) = event_log {
        handle.await?;
    }
    Ok(())
}

async fn log_events(rx: mpsc::UnboundedReceiver<PoolEvent>) {
    let mut stream = UnboundedReceiverStream::new(rx);
    while let Some(event) = stream.next().await {
        info!(event = ?event, "Pool event");
    }
}

async fn read_stdin_messages() -> Result<Vec<String>, std::io::Error> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut messages = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            messages.push(line.to_string());
        }
    }
    Ok(messages)
}

fn list_kinds() {
    let registry = echo_registry();
    println!("{:<14}  {:<10}  CAPABILITIES", "KIND", "SELECTABLE");
    println!("{}", "-".repeat(80));
    for kind in registry.registered_kinds() {
        let selectable = if AgentKind::SELECTABLE.contains(&kind) {
            "yes"
        } else {
            "no"
        };
        println!(
            "{:<14}  {:<10}  {}",
            kind.as_str(),
            selectable,
            kind.capabilities().join(", ")
        );
    }
}
