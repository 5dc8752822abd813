//! CLI for lodestar: watch a service in a file-backed registry.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use lodestar_rs::{DiscoveryModule, ResolutionResult};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lodestar")]
#[command(about = "Lodestar discovery resolver CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a target against a registry file and print every update as a JSON line.
    Watch {
        /// Registry JSON file (service name -> instances)
        #[arg(long)]
        registry: PathBuf,
        /// Target, e.g. discovery://orders
        #[arg(long)]
        service: String,
        /// Channels config JSON file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Call refresh every N seconds
        #[arg(long)]
        refresh_secs: Option<u64>,
        /// Exit after this many notifications
        #[arg(long)]
        count: Option<usize>,
    },
}

fn render(target: &str, result: &ResolutionResult) -> serde_json::Value {
    match result {
        ResolutionResult::AddressesResolved(addresses) => json!({
            "target": target,
            "addresses": addresses.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }),
        ResolutionResult::ResolutionFailed(e) => json!({
            "target": target,
            "error": e.to_string(),
        }),
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_watch(
    registry: PathBuf,
    service: String,
    config: Option<PathBuf>,
    refresh_secs: Option<u64>,
    count: Option<usize>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut module = DiscoveryModule::new().file_registry(registry);
    if let Some(path) = config {
        module = module.config_file(path);
    }
    let factory = module.build()?;
    let resolver = factory
        .new_resolver(&service)
        .ok_or_else(|| format!("not a {} target: {service}", factory.scheme()))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    resolver.start(tx)?;

    let mut refresh = refresh_secs.map(|secs| tokio::time::interval(Duration::from_secs(secs.max(1))));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut seen = 0usize;
    loop {
        tokio::select! {
            result = rx.recv() => {
                let Some(result) = result else { break };
                println!("{}", render(resolver.service_authority(), &result));
                seen += 1;
                if count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            _ = tick(&mut refresh) => resolver.refresh(),
            _ = &mut ctrl_c => break,
        }
    }

    resolver.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Watch {
            registry,
            service,
            config,
            refresh_secs,
            count,
        } => run_watch(registry, service, config, refresh_secs, count).await,
    }
}
