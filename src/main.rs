//! Upstream: a concurrent liveness responder.
//!
//! This is the application entry point. It parses the command line, loads the
//! optional configuration file, initializes tracing, builds a runtime sized to
//! the configured worker count, binds the listener and serves until a shutdown
//! signal arrives.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use upstream::config::{AppConfig, LogFormat, ServerConfig, DEFAULT_LOG_FILTER};
use upstream::http::{build_runtime, setup_shutdown_handler};
use upstream::{logging, Server};

/// Upstream: answers every HTTP request with 200 OK
#[derive(Parser, Debug)]
#[command(name = "upstream", version, about)]
struct Args {
    /// Address to listen on (e.g. ":8080" or "127.0.0.1:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Runtime worker threads (defaults to available parallelism)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Seconds in-flight requests may run after shutdown begins
    #[arg(short, long = "grace-period")]
    grace_period: Option<u64>,

    /// Path to an optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level filter (e.g., "upstream=debug")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl Args {
    /// CLI flags take priority over the configuration file.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(addr) = &self.addr {
            config.http.addr = addr.clone();
        }
        if let Some(workers) = self.workers {
            config.http.workers = workers;
        }
        if let Some(grace_period) = self.grace_period {
            config.http.grace_period_seconds = grace_period;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    // Report the Display text rather than the variant's Debug form
    start(args).map_err(|e| e.to_string().into())
}

fn start(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    args.apply(&mut config);

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    logging::init(&log_filter, config.logging.format)?;

    let server_config = config.server_config();
    let runtime = build_runtime(&server_config)?;
    runtime.block_on(run(server_config))
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn Error>> {
    let server = Server::new(config);
    let addr = server.config().addr.clone();
    let server = Arc::new(server.start()?);

    println!("Upstream starting on {addr}...");

    setup_shutdown_handler(server.clone());
    server.serve().await?;

    Ok(())
}
