// Application Configuration

use anyhow::Result;
use roomprint_fingerprint::aggregator::DEFAULT_FLOOR_MARGIN_DBM;
use roomprint_fingerprint::{AggregatorConfig, SamplerConfig, TrainingContext};
use roomprint_hal::{ScanPrimitive, ScannerBackend, ScannerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration problems caught before any scanning starts
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("scanner = \"replay\" requires replay_file")]
    MissingReplayFile,

    #[error("scanner = \"simulated\" requires allow_simulated = true")]
    SimulatedNotAllowed,

    #[error("unknown log_format '{0}' (expected text or json)")]
    UnknownLogFormat(String),

    #[error("floor_margin_dbm must be a finite, non-negative number")]
    InvalidFloorMargin,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the fingerprint store
    #[serde(default = "default_data_dir")]
    pub data_directory: String,

    /// Scanner backend: auto, netsh, iw, replay or simulated
    #[serde(default = "default_scanner")]
    pub scanner: ScannerBackend,

    /// Wireless interface for the iw backend
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Recorded readings for the replay backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_file: Option<PathBuf>,

    /// Timeout for one platform scan command in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Readings taken at each position
    #[serde(default = "default_samples_per_position")]
    pub samples_per_position: usize,

    /// Pause between readings in milliseconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    /// Flat margin below avg - 2σ for the acceptance floor (dBm)
    #[serde(default = "default_floor_margin")]
    pub floor_margin_dbm: f64,

    /// Network to train against (most frequently seen SSID when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ssid: Option<String>,

    /// Gateway address recorded with each fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// Recorded as the trainer of new fingerprints
    #[serde(default = "default_trained_by")]
    pub trained_by: String,

    /// Fall back to synthetic readings when no adapter is available
    #[serde(default)]
    pub allow_simulated: bool,

    /// SSID reported by the synthetic scanner
    #[serde(default = "default_simulated_ssid")]
    pub simulated_ssid: String,

    /// Log output: text or json
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Path to config file (for reference)
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_data_dir() -> String { "/var/lib/roomprint".to_string() }
fn default_scanner() -> ScannerBackend { ScannerBackend::Auto }
fn default_interface() -> String { "wlan0".to_string() }
fn default_command_timeout() -> u64 { 5000 }
fn default_samples_per_position() -> usize { 7 }
fn default_sample_interval() -> u64 { 800 }
fn default_floor_margin() -> f64 { DEFAULT_FLOOR_MARGIN_DBM }
fn default_trained_by() -> String { "Faculty (Multi-Pos)".to_string() }
fn default_simulated_ssid() -> String { "College-WiFi".to_string() }
fn default_log_format() -> String { "text".to_string() }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_directory: default_data_dir(),
            scanner: default_scanner(),
            interface: default_interface(),
            replay_file: None,
            command_timeout_ms: default_command_timeout(),
            samples_per_position: default_samples_per_position(),
            sample_interval_ms: default_sample_interval(),
            floor_margin_dbm: default_floor_margin(),
            target_ssid: None,
            gateway: None,
            trained_by: default_trained_by(),
            allow_simulated: false,
            simulated_ssid: default_simulated_ssid(),
            log_format: default_log_format(),
            config_path: PathBuf::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from standard paths
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("/etc/roomprint/config.toml"),
            dirs::config_dir()
                .map(|p| p.join("roomprint/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("./config.toml"),
        ];

        for path in &config_paths {
            if path.exists() {
                return Self::load_from(path);
            }
        }

        tracing::warn!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.scanner == ScannerBackend::Replay && self.replay_file.is_none() {
            return Err(ConfigError::MissingReplayFile);
        }
        if self.scanner == ScannerBackend::Simulated && !self.allow_simulated {
            return Err(ConfigError::SimulatedNotAllowed);
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(ConfigError::UnknownLogFormat(self.log_format.clone()));
        }
        if !self.floor_margin_dbm.is_finite() || self.floor_margin_dbm < 0.0 {
            return Err(ConfigError::InvalidFloorMargin);
        }
        Ok(())
    }

    /// Location of the fingerprint store document
    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.data_directory).join("fingerprints.json")
    }

    /// Directory of per-room training lock files
    pub fn lock_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_directory).join("locks")
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            backend: self.scanner,
            interface: self.interface.clone(),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            replay_file: self.replay_file.clone(),
            simulated_ssid: self.simulated_ssid.clone(),
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            samples_per_position: self.samples_per_position,
            interval: Duration::from_millis(self.sample_interval_ms),
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            floor_margin_dbm: self.floor_margin_dbm,
        }
    }

    /// Open the configured scanner, backed by the synthetic one when allowed
    pub fn open_scanner(&self) -> Result<Box<dyn ScanPrimitive>> {
        let primary = roomprint_hal::open_scanner(&self.scanner_config());

        #[cfg(feature = "simulated")]
        {
            if self.allow_simulated && self.scanner != ScannerBackend::Simulated {
                let fallback = Box::new(roomprint_hal::SimulatedScanner::new(&self.simulated_ssid));
                return match primary {
                    Ok(primary) => Ok(Box::new(roomprint_hal::FallbackScanner::new(primary, fallback))),
                    Err(e) => {
                        tracing::warn!("{}, using simulated readings", e);
                        Ok(fallback)
                    }
                };
            }
        }

        Ok(primary?)
    }

    /// Training context for `room_id` using the configured network and trainer
    pub fn training_context(&self, room_id: &str) -> TrainingContext {
        let mut context = TrainingContext::new(room_id, &self.trained_by);
        if let Some(ssid) = &self.target_ssid {
            context = context.with_target_ssid(ssid);
        }
        if let Some(gateway) = &self.gateway {
            context = context.with_gateway(gateway);
        }
        context
    }

    /// Generate example configuration
    pub fn example() -> &'static str {
        r#"# Roomprint Configuration File
#
# Copy this file to /etc/roomprint/config.toml or ~/.config/roomprint/config.toml

# Directory holding fingerprints.json
data_directory = "/var/lib/roomprint"

# Scanner backend: auto, netsh, iw, replay, simulated
scanner = "auto"

# Wireless interface (iw backend)
interface = "wlan0"

# Recorded readings (replay backend)
# replay_file = "readings.json"

# Timeout for one scan command in milliseconds
command_timeout_ms = 5000

# Readings per position and pause between them
samples_per_position = 7
sample_interval_ms = 800

# Extra margin below avg - 2σ for the acceptance floor (dBm).
# Changing this moves the floor of every room trained afterwards.
floor_margin_dbm = 5.0

# Network to train against (defaults to the most frequently seen SSID)
# target_ssid = "College-WiFi"

# Gateway recorded with each fingerprint
# gateway = "172.16.0.1"

# Recorded as the trainer of new fingerprints
trained_by = "Faculty (Multi-Pos)"

# Use synthetic readings when no WiFi adapter is available (demo only)
allow_simulated = false
simulated_ssid = "College-WiFi"

# Log output: text or json
log_format = "text"
"#
    }
}

/// Helper for getting config directories
mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_parses_to_defaults() {
        let config: AppConfig = toml::from_str(AppConfig::example()).unwrap();
        assert_eq!(config.scanner, ScannerBackend::Auto);
        assert_eq!(config.samples_per_position, 7);
        assert_eq!(config.floor_margin_dbm, 5.0);
        assert!(config.target_ssid.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: AppConfig = toml::from_str("scanner = \"iw\"\ninterface = \"wlp2s0\"\n").unwrap();
        assert_eq!(config.scanner, ScannerBackend::Iw);
        assert_eq!(config.scanner_config().interface, "wlp2s0");
        assert_eq!(config.sampler_config().interval, Duration::from_millis(800));
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/roomprint/fingerprints.json"));
        assert_eq!(config.lock_dir(), PathBuf::from("/var/lib/roomprint/locks"));
    }

    #[test]
    fn simulated_scanner_needs_opt_in() {
        let config = AppConfig {
            scanner: ScannerBackend::Simulated,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::SimulatedNotAllowed)));
    }

    #[test]
    fn training_context_carries_network() {
        let config = AppConfig {
            target_ssid: Some("HITECHCMD-21".to_string()),
            gateway: Some("172.16.0.1".to_string()),
            ..Default::default()
        };
        let context = config.training_context(" CMD LAB ");
        assert_eq!(context.room_id, "CMD LAB");
        assert_eq!(context.target_ssid.as_deref(), Some("HITECHCMD-21"));
        assert_eq!(context.trained_by, "Faculty (Multi-Pos)");
    }

    #[test]
    fn replay_scanner_from_config() {
        let dir = std::env::temp_dir().join(format!("roomprint-config-replay-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let readings = dir.join("readings.json");
        std::fs::write(&readings, r#"[{"ssid":"College-WiFi","bssid":"aa:bb:cc:dd:ee:01","rssi":-61}]"#).unwrap();

        let config = AppConfig {
            scanner: ScannerBackend::Replay,
            replay_file: Some(readings),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let scanner = config.open_scanner().unwrap();
        let reading = tokio_test::block_on(scanner.scan()).unwrap();
        assert_eq!(reading.rssi, -61);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn replay_without_file_is_rejected() {
        let config = AppConfig {
            scanner: ScannerBackend::Replay,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingReplayFile)));
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir()
            .join(format!("roomprint-config-{}", std::process::id()))
            .join("config.toml");
        let config = AppConfig {
            floor_margin_dbm: 3.0,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.floor_margin_dbm, 3.0);
        assert_eq!(loaded.config_path, path);

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
