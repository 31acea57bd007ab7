use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use dispatch_lite::config::{AuthConfig, ControllerConfig, WorkerConfig, DEFAULT_CONTROL_PORT};
use dispatch_lite::controller::run_controller;
use dispatch_lite::fingerprint::Fingerprint;
use dispatch_lite::scheduler::LoggingSink;
use dispatch_lite::shutdown::install_shutdown_handler;
use dispatch_lite::worker::run_worker;

#[derive(Parser, Debug)]
#[command(name = "dispatch-lite")]
#[command(version)]
#[command(about = "Hands jobs to authenticated workers, least-loaded first")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the controller and dispatch the reference workload
    Controller(ControllerArgs),

    /// Run a worker that squares numbers for the controller
    Worker(WorkerArgs),

    /// Print the fingerprint workers built from a binary will present
    Fingerprint {
        /// Binary to fingerprint (defaults to this executable)
        path: Option<PathBuf>,
    },
}

#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Address to accept workers on
    #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_CONTROL_PORT)))]
    listen: SocketAddr,

    /// Jobs a single worker may hold at once
    #[arg(long, default_value = "50")]
    max_jobs_per_worker: usize,

    /// Number of jobs to generate
    #[arg(long, default_value = "10000")]
    total_jobs: u64,

    /// Pause between attempts while every worker is full (ms)
    #[arg(long, default_value = "100")]
    idle_interval_ms: u64,

    /// Accept workers with any fingerprint. Development only.
    #[arg(long)]
    skip_auth: bool,

    /// Expected worker fingerprint (10 hex chars)
    #[arg(long, conflicts_with = "worker_binary")]
    fingerprint: Option<Fingerprint>,

    /// Compute the expected fingerprint from this worker binary
    #[arg(long)]
    worker_binary: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Controller address (host:port)
    #[arg(long, short = 'c', default_value_t = format!("127.0.0.1:{}", DEFAULT_CONTROL_PORT))]
    controller: String,

    /// Identity token (random if omitted)
    #[arg(long)]
    identity: Option<String>,

    /// Bounded wait for each poll (ms)
    #[arg(long, default_value = "100")]
    poll_interval_ms: u64,

    /// Empty polls before probing the controller
    #[arg(long, default_value = "100")]
    idle_threshold: u32,

    /// Polls to wait for a pong
    #[arg(long, default_value = "100")]
    ping_retries: u32,

    /// Pause after an unanswered probe or failed reconnect (ms)
    #[arg(long, default_value = "5000")]
    backoff_ms: u64,

    /// Fingerprint to present instead of this executable's
    #[arg(long)]
    fingerprint: Option<Fingerprint>,

    /// Skip the simulated 100-500 ms compute delay
    #[arg(long)]
    no_jitter: bool,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_controller_command(args: ControllerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ControllerConfig {
        listen_addr: args.listen,
        max_jobs_per_worker: args.max_jobs_per_worker,
        total_jobs: args.total_jobs,
        idle_interval_ms: args.idle_interval_ms,
        auth: AuthConfig {
            skip_auth: args.skip_auth,
            fingerprint: args.fingerprint,
            worker_binary: args.worker_binary,
        },
    };

    let shutdown = install_shutdown_handler();
    let summary = run_controller(config, LoggingSink::default(), shutdown).await?;

    println!(
        "Dispatched {} jobs, {} completed, {} requeued across {} workers",
        summary.stats.dispatched, summary.stats.completed, summary.stats.requeued, summary.workers
    );
    if summary.interrupted {
        println!(
            "Interrupted with {} jobs still assigned and {} awaiting redelivery",
            summary.still_assigned, summary.still_requeued
        );
    }
    Ok(())
}

async fn run_worker_command(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = WorkerConfig {
        controller_addr: args.controller,
        identity: args.identity,
        poll_interval_ms: args.poll_interval_ms,
        idle_threshold: args.idle_threshold,
        ping_retries: args.ping_retries,
        backoff_ms: args.backoff_ms,
        fingerprint: args.fingerprint,
        jitter: !args.no_jitter,
    };

    let shutdown = install_shutdown_handler();
    let stats = run_worker(config, shutdown).await?;
    println!(
        "Completed {} jobs ({} failed), reconnected {} times",
        stats.jobs_completed, stats.compute_failures, stats.reconnects
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Controller(controller_args) => {
            init_tracing();
            run_controller_command(controller_args).await?;
        }
        Commands::Worker(worker_args) => {
            init_tracing();
            run_worker_command(worker_args).await?;
        }
        Commands::Fingerprint { path } => {
            let fingerprint = match path {
                Some(path) => Fingerprint::of_file(path)?,
                None => Fingerprint::of_current_exe()?,
            };
            println!("{}", fingerprint);
        }
    }

    Ok(())
}
