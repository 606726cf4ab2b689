//! Roomprint Trainer
//!
//! Guided front → middle → back training run for one room. The operator
//! stands at each position and presses Enter; Ctrl+C abandons the run
//! without touching the stored fingerprint.

use anyhow::{Context, Result};
use clap::Parser;
use roomprint_fingerprint::{
    Aggregator, Collector, FingerprintError, FingerprintStore, JsonFileStore, LoggingObserver, Position,
    RawSample, RoomFingerprint, Sampler, TrainingObserver, TrainingRun, TrainingState,
};
use roomprint_hal::ScanPrimitive;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

mod config;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "roomprint")]
#[command(author = "Roomprint Team")]
#[command(version = "0.1.0")]
#[command(about = "Train a room's WiFi fingerprint for attendance", long_about = None)]
struct Args {
    /// Room to train, e.g. "CMD LAB"
    room_id: String,

    /// Configuration file (searched in the standard locations otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sample every position without waiting for Enter
    #[arg(short = 'y', long)]
    no_prompt: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    init_logging(&config.log_format);

    tracing::info!("╔══════════════════════════════════════════╗");
    tracing::info!("║      Roomprint Fingerprint Trainer       ║");
    tracing::info!("║            Version 0.1.0                 ║");
    tracing::info!("╚══════════════════════════════════════════╝");

    if config.config_path.as_os_str().is_empty() {
        tracing::info!("Using default configuration");
    } else {
        tracing::info!("Configuration loaded from {:?}", config.config_path);
    }

    let store: Arc<dyn FingerprintStore> = Arc::new(JsonFileStore::open(&config.store_path())?);
    let scanner = config.open_scanner()?;
    tracing::info!("Scanning with {}", scanner.name());

    let sampler = Sampler::new(config.sampler_config())?;
    let collector = Collector::new(store.clone(), sampler, Aggregator::new(config.aggregator_config()))
        .with_observer(Arc::new(ConsoleObserver))
        .with_lock_dir(config.lock_dir());

    let mut run = collector.training_run(config.training_context(&args.room_id))?;

    if let Some(existing) = store.get(run.room_id())? {
        tracing::warn!(
            "{} already has a fingerprint trained {} by {}; a successful run replaces it",
            existing.room_id,
            existing.trained_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            existing.trained_by
        );
    }

    run.begin()?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let outcome = tokio::select! {
        result = guided(&mut run, scanner.as_ref(), &mut stdin, !args.no_prompt) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(Ok(Some(fingerprint))) => {
            print_summary(&fingerprint);
            Ok(())
        }
        Some(Ok(None)) => {
            run.cancel();
            println!("Training cancelled. No fingerprint was saved.");
            Ok(())
        }
        Some(Err(e)) => {
            tracing::error!("Training failed in state {}: {}", run.state(), e);
            run.reset();
            Err(e).context(format!("training {} failed, previous fingerprint kept", args.room_id))
        }
        None => {
            tracing::info!("Interrupt received");
            run.cancel();
            println!("\nTraining cancelled. No fingerprint was saved.");
            // a pending stdin read would otherwise hold the runtime open
            std::process::exit(130)
        }
    }
}

/// Walk the run through its positions; `None` when the operator quits
async fn guided(
    run: &mut TrainingRun,
    scanner: &dyn ScanPrimitive,
    stdin: &mut BufReader<Stdin>,
    prompt: bool,
) -> std::result::Result<Option<RoomFingerprint>, FingerprintError> {
    while let TrainingState::AwaitingPosition(position) = run.state() {
        if prompt && !wait_for_operator(stdin, position).await {
            return Ok(None);
        }

        println!("Sampling at {} ({}/{})...", position, position.step(), Position::ALL.len());
        run.capture_position(scanner).await?;
    }

    Ok(run.fingerprint().cloned())
}

/// Prompt for the next position; false when the operator quits or input ends
async fn wait_for_operator(stdin: &mut BufReader<Stdin>, position: Position) -> bool {
    print!(
        "\nStand at the {} of the room and press Enter (q to quit): ",
        position.as_str().to_uppercase()
    );
    std::io::stdout().flush().ok();

    let mut line = String::new();
    match stdin.read_line(&mut line).await {
        Ok(0) | Err(_) => false,
        Ok(_) => !line.trim().eq_ignore_ascii_case("q"),
    }
}

/// Prints per-sample progress for the operator and logs everything else
struct ConsoleObserver;

impl TrainingObserver for ConsoleObserver {
    fn on_sample(&self, room_id: &str, sample: &RawSample, index: usize, total: usize) {
        println!("  [{:>2}/{}] {:>4} dBm  {}", index, total, sample.rssi, sample.bssid);
        LoggingObserver.on_sample(room_id, sample, index, total);
    }

    fn on_position_complete(&self, room_id: &str, position: Position, samples: usize) {
        LoggingObserver.on_position_complete(room_id, position, samples);
    }

    fn on_trained(&self, fingerprint: &RoomFingerprint) {
        LoggingObserver.on_trained(fingerprint);
    }

    fn on_failed(&self, room_id: &str, error: &FingerprintError) {
        LoggingObserver.on_failed(room_id, error);
    }

    fn on_cancelled(&self, room_id: &str) {
        LoggingObserver.on_cancelled(room_id);
    }
}

fn print_summary(fingerprint: &RoomFingerprint) {
    let stats = &fingerprint.stats;

    println!();
    println!("╭──────────────── Training Complete ────────────────╮");
    println!("│ Room: {:>43} │", fingerprint.room_id);
    println!("│ Network: {:>40} │", fingerprint.ssid);
    println!("│ Access points: {:>34} │", fingerprint.num_access_points());
    println!("│ Surveyed APs: {:>35} │", fingerprint.ap_profile.len());
    println!("│ Samples: {:>40} │", stats.sample_count);
    println!("│ Average: {:>36} dBm │", stats.avg_rssi);
    println!("│ Std dev: {:>40.2} │", stats.std_dev);
    println!("│ Accepted from: {:>30} dBm │", stats.min_rssi);
    println!("╰───────────────────────────────────────────────────╯");
}

fn init_logging(format: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,roomprint=debug,roomprint_hal=debug,roomprint_fingerprint=debug")
    });

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}
