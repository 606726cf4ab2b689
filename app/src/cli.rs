//! Roomprint CLI Tool
//!
//! Command-line interface for managing trained rooms and checking presence.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use roomprint_fingerprint::store::{read_fingerprint_file, write_fingerprint_file};
use roomprint_fingerprint::{
    FingerprintError, FingerprintStore, JsonFileStore, LiveScan, PresenceValidator, RoomFingerprint,
};
use roomprint_hal::WifiReading;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod config;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "roomprint-cli")]
#[command(author = "Roomprint Team")]
#[command(version = "0.1.0")]
#[command(about = "Roomprint room fingerprint CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (searched in the standard locations otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the configured one
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List trained rooms
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show one room's fingerprint
    Show {
        room_id: String,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Delete a room's fingerprint
    Delete { room_id: String },

    /// Import a fingerprint from a JSON file
    Import {
        file: PathBuf,

        /// Store under this room instead of the one in the file
        #[arg(short, long)]
        room: Option<String>,
    },

    /// Export a room's fingerprint
    Export {
        room_id: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Check whether a reading places this device in a room
    Verify {
        room_id: String,

        /// SSID of the reading (scans live when omitted)
        #[arg(long, requires = "rssi")]
        ssid: Option<String>,

        /// RSSI of the reading in dBm
        #[arg(long, requires = "ssid", allow_hyphen_values = true)]
        rssi: Option<i32>,
    },

    /// Take readings and print them as JSON (replay scanner input)
    Scan {
        /// Number of readings
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Pause between readings in milliseconds
        #[arg(short, long, default_value_t = 800)]
        interval_ms: u64,

        /// List every access point in range instead of the connected one
        #[arg(long)]
        survey: bool,
    },

    /// Generate sample configuration
    Config {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// System information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.data_directory = dir.display().to_string();
    }

    match cli.command {
        Commands::List { verbose } => {
            list_rooms(&open_store(&config)?, verbose)?;
        }

        Commands::Show { room_id, format } => {
            show_room(&open_store(&config)?, &room_id, &format)?;
        }

        Commands::Delete { room_id } => {
            open_store(&config)?.delete(&room_id)?;
            println!("Deleted fingerprint for {}", room_id);
        }

        Commands::Import { file, room } => {
            import_room(&open_store(&config)?, &file, room)?;
        }

        Commands::Export { room_id, output } => {
            export_room(&open_store(&config)?, &room_id, &output)?;
        }

        Commands::Verify { room_id, ssid, rssi } => {
            verify(&config, &room_id, ssid.zip(rssi)).await?;
        }

        Commands::Scan {
            count,
            interval_ms,
            survey: false,
        } => {
            scan(&config, count, Duration::from_millis(interval_ms)).await?;
        }

        Commands::Scan { survey: true, .. } => {
            survey(&config).await?;
        }

        Commands::Config { output } => {
            generate_config(output)?;
        }

        Commands::Info => {
            show_info(&config)?;
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_store(config: &AppConfig) -> Result<JsonFileStore> {
    let path = config.store_path();
    JsonFileStore::open(&path).with_context(|| format!("opening fingerprint store {:?}", path))
}

fn list_rooms(store: &JsonFileStore, verbose: bool) -> Result<()> {
    let rooms = store.list()?;

    if rooms.is_empty() {
        println!("No trained rooms found.");
        return Ok(());
    }

    println!("╭────────────────────────────────────────────────────────────────────╮");
    println!("│                          Trained Rooms                             │");
    println!("├────────────────────┬──────────────────────┬──────┬─────────────────┤");
    println!("│ Room               │ Network              │ APs  │ Updated         │");
    println!("├────────────────────┼──────────────────────┼──────┼─────────────────┤");

    for room in &rooms {
        println!(
            "│ {:18} │ {:20} │ {:>4} │ {:15} │",
            truncate(&room.room_id, 18),
            truncate(&room.ssid, 20),
            room.num_access_points,
            room.updated_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        );
    }

    println!("╰────────────────────┴──────────────────────┴──────┴─────────────────╯");

    if verbose {
        for summary in &rooms {
            if let Some(fingerprint) = store.get(&summary.room_id)? {
                println!("\n{}", "─".repeat(60));
                print_fingerprint(&fingerprint);
            }
        }
    }

    Ok(())
}

fn show_room(store: &JsonFileStore, room_id: &str, format: &str) -> Result<()> {
    let fingerprint = store
        .get(room_id)?
        .ok_or_else(|| FingerprintError::FingerprintNotFound(room_id.to_string()))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&fingerprint)?),
        _ => print_fingerprint(&fingerprint),
    }

    Ok(())
}

fn print_fingerprint(fingerprint: &RoomFingerprint) {
    let stats = &fingerprint.stats;

    println!("Room: {}", fingerprint.room_id);
    println!("  Network: {}", fingerprint.ssid);
    if let Some(gateway) = &fingerprint.gateway {
        println!("  Gateway: {}", gateway);
    }
    println!(
        "  Trained: {} by {}",
        fingerprint.trained_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
        fingerprint.trained_by
    );
    println!(
        "  Positions: {}",
        stats
            .trained_positions
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Samples: {}", stats.sample_count);
    println!("  Average: {} dBm (σ {:.2}, variance {:.2})", stats.avg_rssi, stats.std_dev, stats.variance);
    println!("  Accepted from: {} dBm", stats.min_rssi);
    println!("  Access points: {}", fingerprint.num_access_points());
    for bssid in &fingerprint.bssid_list {
        match fingerprint.ap_profile.get(bssid) {
            Some(mean) => println!("    - {} ({:.1} dBm)", bssid, mean),
            None => println!("    - {}", bssid),
        }
    }
}

fn import_room(store: &JsonFileStore, file: &Path, room: Option<String>) -> Result<()> {
    let mut fingerprint = read_fingerprint_file(file)?;
    if let Some(room) = room {
        fingerprint.room_id = room.trim().to_string();
    }

    if store.get(&fingerprint.room_id)?.is_some() {
        println!("Replacing existing fingerprint for {}", fingerprint.room_id);
    }
    store.upload(&fingerprint.room_id, &fingerprint)?;

    println!(
        "Imported {} ({}, accepted from {} dBm)",
        fingerprint.room_id, fingerprint.ssid, fingerprint.stats.min_rssi
    );
    Ok(())
}

fn export_room(store: &JsonFileStore, room_id: &str, output: &Path) -> Result<()> {
    let fingerprint = store
        .get(room_id)?
        .ok_or_else(|| FingerprintError::FingerprintNotFound(room_id.to_string()))?;
    write_fingerprint_file(output, &fingerprint)?;
    println!("Fingerprint exported to: {:?}", output);
    Ok(())
}

async fn verify(config: &AppConfig, room_id: &str, reading: Option<(String, i32)>) -> Result<()> {
    let live = match reading {
        Some((ssid, rssi)) => LiveScan::new(&ssid, rssi),
        None => {
            let scanner = config.open_scanner()?;
            LiveScan::from(scanner.scan().await?)
        }
    };

    let store: Arc<dyn FingerprintStore> = Arc::new(open_store(config)?);
    let verdict = PresenceValidator::new(store).verify(room_id, &live)?;

    println!("Reading: {} dBm on {}", live.rssi, live.ssid);
    match verdict.reason() {
        None => println!("✓ Present in {}", room_id),
        Some(reason) => {
            println!("✗ Not in {} [{}]", room_id, reason.code());
            println!("  {}", reason.user_message());
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn scan(config: &AppConfig, count: usize, interval: Duration) -> Result<()> {
    if count == 0 {
        bail!("--count must be at least 1");
    }

    let scanner = config.open_scanner()?;
    let mut readings: Vec<WifiReading> = Vec::with_capacity(count);

    for index in 0..count {
        if index > 0 {
            tokio::time::sleep(interval).await;
        }
        let reading = scanner.scan().await?;
        eprintln!("[{:>2}/{}] {} {} {} dBm", index + 1, count, reading.ssid, reading.bssid, reading.rssi);
        readings.push(reading);
    }

    println!("{}", serde_json::to_string_pretty(&readings)?);
    Ok(())
}

async fn survey(config: &AppConfig) -> Result<()> {
    let scanner = config.open_scanner()?;
    let mut readings = scanner.survey().await?;
    if readings.is_empty() {
        eprintln!("{} cannot list nearby access points", scanner.name());
    }

    readings.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    for reading in &readings {
        eprintln!("{:>4} dBm  {}  {}", reading.rssi, reading.bssid, truncate(&reading.ssid, 32));
    }

    println!("{}", serde_json::to_string_pretty(&readings)?);
    Ok(())
}

fn generate_config(output: Option<PathBuf>) -> Result<()> {
    let example = AppConfig::example();

    if let Some(path) = output {
        std::fs::write(&path, example)?;
        println!("Configuration written to: {:?}", path);
    } else {
        println!("{}", example);
    }

    Ok(())
}

fn show_info(config: &AppConfig) -> Result<()> {
    use sysinfo::System;

    let mut sys = System::new_all();
    sys.refresh_all();

    println!("╭──────────────────────────────────────────────────────────────╮");
    println!("│             Roomprint System Information                     │");
    println!("╰──────────────────────────────────────────────────────────────╯\n");

    println!("System:");
    println!("  Hostname: {}", System::host_name().unwrap_or_default());
    println!(
        "  OS: {} {}",
        System::name().unwrap_or_default(),
        System::os_version().unwrap_or_default()
    );
    println!("  Kernel: {}", System::kernel_version().unwrap_or_default());
    println!(
        "  Memory: {} MB total, {} MB used",
        sys.total_memory() / 1024 / 1024,
        sys.used_memory() / 1024 / 1024
    );

    println!("\nRoomprint:");
    println!("  Version: {}", env!("CARGO_PKG_VERSION"));
    if config.config_path.as_os_str().is_empty() {
        println!("  Config: defaults");
    } else {
        println!("  Config: {:?}", config.config_path);
    }
    println!("  Store: {:?}", config.store_path());
    println!("  Scanner: {}", config.scanner);
    println!(
        "  Sampling: {} readings per position, {} ms apart",
        config.samples_per_position, config.sample_interval_ms
    );
    println!("  Floor margin: {} dBm", config.floor_margin_dbm);

    println!("\nScanner Availability:");
    match roomprint_hal::native_backend() {
        Ok(backend) => println!("  Native backend: {}", backend),
        Err(e) => println!("  Native backend: none ({})", e),
    }
    println!("  iw: {}", if on_path("iw") { "✓" } else { "✗" });
    println!("  netsh: {}", if on_path("netsh.exe") || on_path("netsh") { "✓" } else { "✗" });
    println!("  Simulated: {}", if cfg!(feature = "simulated") { "compiled in" } else { "not compiled" });

    Ok(())
}

fn on_path(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max - 3).collect::<String>())
    }
}
