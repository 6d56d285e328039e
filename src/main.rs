//! wwv-tuner — closed-loop parameter optimizer for a WWV decoding pipeline
//!
//! Listens for telemetry from the remote tick/marker/sync detectors,
//! pushes candidate parameter vectors back at them, and lets a black-box
//! minimizer walk the parameter space toward the cleanest decode.
//!
//! # Usage
//!
//! ```bash
//! # Tune the tick detector with the default simplex method
//! wwv-tuner optimize tick
//!
//! # Tune everything, bounded quasi-Newton, 200 evaluations max
//! wwv-tuner optimize all --method bounded-bfgs --max-evals 200
//!
//! # Watch raw telemetry scroll by
//! wwv-tuner monitor --enable CORR --enable SYNC
//!
//! # Inspect the persisted all-time best
//! wwv-tuner show-best sync
//! ```
//!
//! # Environment Variables
//!
//! - `WWV_TUNER_CONFIG`: path to a TOML config file (default: ./wwv_tuner.toml)
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wwv_tuner::{
    Method, ParamStore, PipelineLink, SdrLink, TelemetryListener, TelemetryStore, TuneMode, Tuner,
    TunerConfig,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "wwv-tuner")]
#[command(about = "Closed-loop parameter optimizer for a WWV decoding pipeline")]
#[command(version)]
struct CliArgs {
    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run one optimization against the live pipeline
    Optimize {
        /// Parameter family to tune
        #[arg(value_enum)]
        mode: TuneMode,

        /// Minimization method
        #[arg(long, value_enum, default_value_t = Method::NelderMead)]
        method: Method,

        /// Objective-evaluation budget
        #[arg(long, default_value = "50")]
        max_evals: usize,

        /// Seed from the saved all-time best instead of bound midpoints
        #[arg(long)]
        from_best: bool,
    },

    /// Print telemetry datagrams as they arrive
    Monitor {
        /// Seconds to watch (0 = until Ctrl+C)
        #[arg(long, default_value = "0")]
        duration: u64,

        /// Ask the remote to start streaming a channel first (repeatable)
        #[arg(long, value_name = "CHANNEL")]
        enable: Vec<String>,
    },

    /// Set one named pipeline parameter
    Set {
        /// Parameter short name, e.g. `threshold` or `sync_locked_threshold`
        name: String,
        value: f64,
    },

    /// Send one raw control command to the pipeline
    Send {
        /// Command words, e.g. `SET_TICK_THRESHOLD 2.5`
        #[arg(required = true)]
        command: Vec<String>,
    },

    /// Show persisted all-time-best parameters for a mode
    ShowBest {
        #[arg(value_enum, default_value_t = TuneMode::All)]
        mode: TuneMode,
    },

    /// Drive the SDR front-end control port
    Sdr {
        #[command(subcommand)]
        command: SdrCommand,
    },
}

#[derive(clap::Subcommand, Debug)]
enum SdrCommand {
    /// Start IQ streaming
    Start,
    /// Stop IQ streaming
    Stop,
    /// Query streaming status
    Status,
    /// Liveness check
    Ping,
    /// Report server version
    Version,
    /// Set center frequency in Hz
    Freq { hz: f64 },
    /// Set gain reduction in dB
    Gain { db: i32 },
    /// Set AGC mode (OFF, 5HZ, 50HZ, 100HZ)
    Agc { mode: String },
    /// Select antenna port (A, B, HIZ)
    Antenna { port: String },
}

// ============================================================================
// Subcommand runners
// ============================================================================

async fn run_optimize(
    config: &TunerConfig,
    mode: TuneMode,
    method: Method,
    max_evals: usize,
    from_best: bool,
) -> Result<()> {
    // The SDR front-end is optional: if its control port is unreachable,
    // assume the operator already has it streaming and tune anyway.
    let mut sdr = SdrLink::new(&config.sdr.addr);
    match sdr.connect() {
        Ok(()) => {
            if let Err(e) = sdr.start() {
                warn!(error = %e, "SDR streaming start failed — continuing with current state");
            }
        }
        Err(e) => {
            info!(error = %e, "SDR control unavailable — assuming the front-end is already running");
        }
    }

    let store = Arc::new(TelemetryStore::new());
    let listener = TelemetryListener::bind(&config.telemetry.bind_addr, Arc::clone(&store))
        .await
        .context("telemetry listener is required for optimization")?;
    let cancel = CancellationToken::new();
    let listener_handle = listener.spawn(cancel.clone());

    let pipeline = PipelineLink::connect(&config.pipeline.addr).with_context(|| {
        format!(
            "cannot set up pipeline control link to {}",
            config.pipeline.addr
        )
    })?;
    let results = ParamStore::new(&config.results.best_path, &config.results.last_run_path);

    let initial = if from_best {
        let saved = results.saved_best_params(mode);
        if saved.is_none() {
            warn!(mode = %mode, "No saved best to seed from — using bound midpoints");
        }
        saved
    } else {
        None
    };

    let mut tuner = Tuner::new(store, pipeline, results, config.timing.clone());

    // Ctrl+C aborts the run within one poll slice; every improvement is
    // already on disk by the time the flag is observed.
    let stop = tuner.stop_flag();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C — aborting run, best result so far is persisted");
        stop.store(true, Ordering::Relaxed);
    });

    // The driver blocks through settle/collection windows; keep it off the
    // async runtime.
    let outcome =
        tokio::task::spawn_blocking(move || tuner.optimize(mode, initial, method, max_evals))
            .await
            .context("optimization task panicked")?;

    cancel.cancel();
    let _ = listener_handle.await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_monitor(config: &TunerConfig, duration: u64, enable: Vec<String>) -> Result<()> {
    let store = Arc::new(TelemetryStore::new());
    let listener = TelemetryListener::bind(&config.telemetry.bind_addr, Arc::clone(&store)).await?;
    let cancel = CancellationToken::new();
    let listener_handle = listener.spawn(cancel.clone());

    let pipeline = if enable.is_empty() {
        None
    } else {
        let pipeline = PipelineLink::connect(&config.pipeline.addr)?;
        for channel in &enable {
            pipeline.enable_telemetry(channel);
        }
        Some(pipeline)
    };

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.cancel();
    });
    if duration > 0 {
        let timed = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(duration)).await;
            timed.cancel();
        });
    }

    info!(address = %config.telemetry.bind_addr, "Monitoring telemetry — Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                for msg in store.drain_recent(256) {
                    if msg.raw.is_empty() {
                        println!("{}", msg.channel);
                    } else {
                        println!("{},{}", msg.channel, msg.raw);
                    }
                }
            }
        }
    }

    // Leave the remote as we found it.
    if let Some(pipeline) = pipeline {
        for channel in &enable {
            pipeline.disable_telemetry(channel);
        }
    }
    let _ = listener_handle.await;
    Ok(())
}

fn run_set(config: &TunerConfig, name: &str, value: f64) -> Result<()> {
    let pipeline = PipelineLink::connect(&config.pipeline.addr)?;
    if pipeline.set_named(name, value) {
        info!(parameter = name, value, "Parameter sent");
        Ok(())
    } else {
        anyhow::bail!("could not set '{name}' — unknown parameter or send failure")
    }
}

fn run_send(config: &TunerConfig, command: &[String]) -> Result<()> {
    let pipeline = PipelineLink::connect(&config.pipeline.addr)?;
    let line = command.join(" ");
    if pipeline.send(&line) {
        info!(command = %line, "Command sent");
        Ok(())
    } else {
        anyhow::bail!("send failed: {line}")
    }
}

fn run_show_best(config: &TunerConfig, mode: TuneMode) -> Result<()> {
    let results = ParamStore::new(&config.results.best_path, &config.results.last_run_path);

    match results.existing_best_score(mode) {
        Some(score) => println!("# {mode} best score: {score:.6}"),
        None => {
            println!(
                "No recorded best for mode '{mode}' in {}",
                config.results.best_path
            );
            return Ok(());
        }
    }

    match results.saved_best_params(mode) {
        Some(values) => {
            for (spec, value) in mode.specs().iter().zip(&values) {
                println!("{:<26} {}", spec.name, spec.file_value(*value));
            }
        }
        None => println!("(parameter sections incomplete — rerun an optimization to refresh)"),
    }
    Ok(())
}

fn run_sdr(config: &TunerConfig, command: SdrCommand) -> Result<()> {
    let mut sdr = SdrLink::new(&config.sdr.addr);
    sdr.connect()
        .with_context(|| format!("cannot connect to SDR control at {}", config.sdr.addr))?;

    let response = match command {
        SdrCommand::Start => sdr.start()?,
        SdrCommand::Stop => sdr.stop()?,
        SdrCommand::Status => sdr.status()?,
        SdrCommand::Ping => sdr.ping()?,
        SdrCommand::Version => sdr.version()?,
        SdrCommand::Freq { hz } => sdr.set_frequency(hz)?,
        SdrCommand::Gain { db } => sdr.set_gain(db)?,
        SdrCommand::Agc { mode } => sdr.set_agc(&mode)?,
        SdrCommand::Antenna { port } => sdr.set_antenna(&port)?,
    };
    println!("{response}");
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let config = TunerConfig::load();
    for warning in config.validate() {
        warn!("Config: {warning}");
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  wwv-tuner — WWV pipeline parameter optimizer");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    match args.command {
        SubCommand::Optimize {
            mode,
            method,
            max_evals,
            from_best,
        } => run_optimize(&config, mode, method, max_evals, from_best).await,
        SubCommand::Monitor { duration, enable } => run_monitor(&config, duration, enable).await,
        SubCommand::Set { name, value } => run_set(&config, &name, value),
        SubCommand::Send { command } => run_send(&config, &command),
        SubCommand::ShowBest { mode } => run_show_best(&config, mode),
        SubCommand::Sdr { command } => run_sdr(&config, command),
    }
}
