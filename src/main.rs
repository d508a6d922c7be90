use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slidegate::config::{GateConfig, LoggingConfig};
use slidegate::ratelimit::{spawn_reaper, Clock};
use slidegate::{AdmissionEngine, Limit};

/// Simulate concurrent clients hitting a sliding-window admission engine.
#[derive(Debug, Parser)]
#[command(name = "slidegate", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Key every worker sends requests for
    #[arg(short, long, default_value = "user:alice")]
    key: String,

    /// Number of concurrent workers
    #[arg(short, long, default_value_t = 3)]
    workers: usize,

    /// Requests per worker
    #[arg(short, long, default_value_t = 4)]
    attempts: usize,

    /// Pause between a worker's requests, in milliseconds
    #[arg(long, default_value_t = 200)]
    pause_ms: u64,

    /// Random extra pause of up to this many milliseconds
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,

    /// Override the limit for the key: maximum admissions per window
    #[arg(long, requires = "window_ms")]
    max_admissions: Option<u32>,

    /// Override the limit for the key: window length in milliseconds
    #[arg(long, requires = "max_admissions")]
    window_ms: Option<u64>,

    /// Print a JSON report instead of text lines
    #[arg(long)]
    json: bool,
}

/// One request made by a worker.
#[derive(Debug, Serialize)]
struct Attempt {
    worker: usize,
    attempt: usize,
    allowed: bool,
    in_window: u32,
    ttl_secs: f64,
}

/// Full result of a simulation run.
#[derive(Debug, Serialize)]
struct Report {
    key: String,
    max_admissions: u32,
    window_ms: u128,
    allowed: usize,
    rejected: usize,
    interrupted: bool,
    attempts: Vec<Attempt>,
}

/// How one worker paces its requests.
#[derive(Debug, Clone, Copy)]
struct Pacing {
    attempts: usize,
    pause: Duration,
    jitter_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = GateConfig::load(args.config.as_deref())?;

    init_tracing(&config.logging);

    info!("Starting slidegate simulation");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let engine = Arc::new(AdmissionEngine::from_config(&config)?);
    if let (Some(max), Some(window_ms)) = (args.max_admissions, args.window_ms) {
        engine.set_limit(&args.key, max, Duration::from_millis(window_ms))?;
    }
    let limit = engine.get_limit(&args.key);

    let reaper = config
        .reaper
        .enabled
        .then(|| spawn_reaper(Arc::clone(&engine), Duration::from_millis(config.reaper.interval_ms)));

    let stop = Arc::new(AtomicBool::new(false));
    let simulation = simulate(Arc::clone(&engine), &args, limit, Arc::clone(&stop));
    tokio::pin!(simulation);

    let report = tokio::select! {
        report = &mut simulation => report?,
        _ = shutdown_signal() => {
            warn!("Simulation interrupted, waiting for workers to stop");
            stop.store(true, Ordering::SeqCst);
            simulation.await?
        }
    };

    if let Some(reaper) = reaper {
        reaper.shutdown().await;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for a in &report.attempts {
            println!(
                "worker {} attempt {}: {} | in-window={} ttl={:.3}s",
                a.worker,
                a.attempt,
                if a.allowed { "ALLOWED" } else { "REJECTED" },
                a.in_window,
                a.ttl_secs
            );
        }
        println!(
            "{} allowed, {} rejected ({} per {:?} for {}){}",
            report.allowed,
            report.rejected,
            report.max_admissions,
            limit.window(),
            report.key,
            if report.interrupted { ", interrupted" } else { "" }
        );
    }

    info!("Simulation finished");
    Ok(())
}

/// Run every worker until it finishes or `stop` is raised, and collect
/// their attempts.
async fn simulate(
    engine: Arc<AdmissionEngine>,
    args: &Args,
    limit: Limit,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<Report> {
    let pacing = Pacing {
        attempts: args.attempts,
        pause: Duration::from_millis(args.pause_ms),
        jitter_ms: args.jitter_ms,
    };
    let mut handles = Vec::with_capacity(args.workers);

    for worker in 0..args.workers {
        let engine = Arc::clone(&engine);
        let key = args.key.clone();
        let stop = Arc::clone(&stop);

        handles.push(tokio::task::spawn_blocking(move || {
            run_worker(&*engine, &key, worker, pacing, &stop)
        }));
    }

    let mut attempts = Vec::new();
    for handle in handles {
        attempts.extend(handle.await?);
    }

    let allowed = attempts.iter().filter(|a| a.allowed).count();
    Ok(Report {
        key: args.key.clone(),
        max_admissions: limit.max_admissions(),
        window_ms: limit.window().as_millis(),
        allowed,
        rejected: attempts.len() - allowed,
        interrupted: stop.load(Ordering::SeqCst),
        attempts,
    })
}

/// Send `pacing.attempts` requests for `key`, checking `stop` before each
/// one and after each pause.
fn run_worker<C: Clock>(
    engine: &AdmissionEngine<C>,
    key: &str,
    worker: usize,
    pacing: Pacing,
    stop: &AtomicBool,
) -> Vec<Attempt> {
    let mut rng = rand::thread_rng();
    let mut results = Vec::with_capacity(pacing.attempts);

    for attempt in 0..pacing.attempts {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let allowed = engine.allow(key);
        let usage = engine.usage(key);
        results.push(Attempt {
            worker,
            attempt,
            allowed,
            in_window: usage.count,
            ttl_secs: usage.ttl.as_secs_f64(),
        });

        if attempt + 1 == pacing.attempts {
            break;
        }
        let jitter = if pacing.jitter_ms > 0 {
            Duration::from_millis(rng.gen_range(0..=pacing.jitter_ms))
        } else {
            Duration::ZERO
        };
        std::thread::sleep(pacing.pause + jitter);
    }

    results
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
