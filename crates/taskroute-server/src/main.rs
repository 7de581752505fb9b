//! # taskroute demo server
//!
//! ```bash
//! # Serve on 127.0.0.1:8001 with a process pool of this same binary
//! cargo run -p taskroute-server -- serve
//!
//! # Upload a file through one of the strategies
//! curl -X POST --data-binary @notes.txt \
//!   "http://127.0.0.1:8001/read_file+separate_process?filename=notes.txt"
//! ```
//!
//! `taskroute-server worker` runs the process-pool worker on stdin/stdout;
//! `serve` starts it automatically.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use taskroute::worker::{self, JobRegistry};
use taskroute::{PoolConfig, ProcessPoolConfig, SaturationPolicy};
use taskroute_server::{DEFAULT_FANOUT_URLS, DemoServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP demo server (default)
    Serve(ServeArgs),
    /// Run a process-pool worker on stdin/stdout
    Worker,
}

#[derive(Parser)]
struct ServeArgs {
    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1:8001")]
    bind: SocketAddr,

    /// Directory for spooled uploads (default: system temp dir)
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Duration of the artificial calculation in milliseconds
    #[arg(long, default_value = "6000")]
    calculation_delay_ms: u64,

    /// Worker threads (default: 2 x CPU cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Worker processes (default: CPU cores, 0 disables the process pool)
    #[arg(long)]
    processes: Option<usize>,

    /// Tasks allowed to queue per pool beyond the busy workers
    #[arg(long, default_value = "64")]
    queue_depth: usize,

    /// Reject work when a pool is full instead of waiting for a slot
    #[arg(long, default_value = "false")]
    reject_when_full: bool,

    /// Fan-out target, repeatable (default: nine popular sites)
    #[arg(long = "fanout-url")]
    fanout_urls: Vec<String>,

    /// Disable CORS headers
    #[arg(long, default_value = "false")]
    no_cors: bool,

    /// Kill and replace a worker process whose job runs longer than this
    #[arg(long)]
    job_timeout_ms: Option<u64>,

    /// Worker program for the process pool (default: this binary with `worker`)
    #[arg(long)]
    worker_program: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Worker) => run_worker(),
        Some(Command::Serve(args)) => run_server(args),
        None => run_server(ServeArgs::parse_from(["taskroute-server"])),
    }
}

fn run_worker() -> Result<()> {
    // stdout carries the protocol; logs must go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    worker::run_stdio(&JobRegistry::with_builtin_jobs()).context("worker protocol failed")?;
    Ok(())
}

fn run_server(args: ServeArgs) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // The scheduler is single-threaded so blocking on it is visible.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(serve(args))
}

async fn serve(args: ServeArgs) -> Result<()> {
    let saturation = if args.reject_when_full {
        SaturationPolicy::Reject
    } else {
        SaturationPolicy::Block
    };

    let mut thread_pool = PoolConfig::default()
        .queue_depth(args.queue_depth)
        .saturation(saturation);
    if let Some(threads) = args.threads {
        thread_pool.size = threads;
    }

    let mut builder = DemoServer::builder()
        .bind_address(args.bind)
        .calculation_delay(Duration::from_millis(args.calculation_delay_ms))
        .thread_pool(thread_pool)
        .cors(!args.no_cors);
    if let Some(dir) = args.upload_dir {
        builder = builder.upload_dir(dir);
    }
    builder = if args.fanout_urls.is_empty() {
        builder.fanout_urls(DEFAULT_FANOUT_URLS)
    } else {
        builder.fanout_urls(args.fanout_urls)
    };

    if args.processes != Some(0) {
        let mut process_pool = match args.worker_program {
            Some(program) => ProcessPoolConfig::new(program),
            None => ProcessPoolConfig::new(
                std::env::current_exe().context("cannot locate own executable")?,
            )
            .args(["worker"]),
        };
        if let Some(ms) = args.job_timeout_ms {
            process_pool = process_pool.job_timeout(Duration::from_millis(ms));
        }
        let mut pool = process_pool.pool.clone();
        if let Some(processes) = args.processes {
            pool.size = processes;
        }
        builder = builder.process_pool(
            process_pool.pool(pool.queue_depth(args.queue_depth).saturation(saturation)),
        );
    }

    let server = builder.build().context("failed to start demo server")?;
    let stats = server.dispatcher().stats();
    info!(
        threads = stats.thread_pool.size,
        processes = stats.process_pool.map(|p| p.size).unwrap_or(0),
        "Pools ready"
    );
    println!("Demo server running at: http://{}/", args.bind);

    let outcome = tokio::select! {
        result = server.run() => result.context("server stopped"),
        signal = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            signal.context("failed to listen for ctrl-c")
        }
    };
    server.shutdown();
    outcome
}
