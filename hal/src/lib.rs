//! Roomprint WiFi scan layer
//!
//! Provides the scan primitive the fingerprint engine samples from:
//! "read the signal strength of the network this device is connected to",
//! plus an optional survey of every access point in range.
//!
//! # Modules
//!
//! - [`netsh`] - Windows `netsh wlan show interfaces` / `show networks` adapter
//! - [`iw`] - Linux `iw dev <iface> link` / `scan dump` adapter
//! - [`replay`] - Plays back previously recorded readings
//! - [`simulated`] - Synthetic readings for demo builds (feature `simulated`)
//!
//! # Example
//!
//! ```rust,no_run
//! use roomprint_hal::{open_scanner, ScannerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let scanner = open_scanner(&ScannerConfig::default()).unwrap();
//!     let reading = scanner.scan().await.unwrap();
//!     println!("{} {} {} dBm", reading.ssid, reading.bssid, reading.rssi);
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

#[cfg(feature = "iw")]
pub mod iw;
#[cfg(feature = "netsh")]
pub mod netsh;
pub mod replay;
#[cfg(feature = "simulated")]
pub mod simulated;

#[cfg(feature = "iw")]
pub use iw::IwLinkScanner;
#[cfg(feature = "netsh")]
pub use netsh::NetshScanner;
pub use replay::ReplayScanner;
#[cfg(feature = "simulated")]
pub use simulated::SimulatedScanner;

/// Weakest reading still considered physically plausible (dBm)
pub const RSSI_PLAUSIBLE_MIN: i32 = -100;

/// Strongest reading still considered physically plausible (dBm)
pub const RSSI_PLAUSIBLE_MAX: i32 = 0;

/// Future returned by [`ScanPrimitive::scan`]
pub type ScanFuture<'a> = Pin<Box<dyn Future<Output = Result<WifiReading, HalError>> + Send + 'a>>;

/// Future returned by [`ScanPrimitive::survey`]
pub type SurveyFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<WifiReading>, HalError>> + Send + 'a>>;

/// Device capability: read the current network signal strength
pub trait ScanPrimitive: Send + Sync {
    /// Scanner name, used in logs
    fn name(&self) -> &str;

    /// Backend kind
    fn backend(&self) -> ScannerBackend;

    /// Take one reading of the connected network
    fn scan(&self) -> ScanFuture<'_>;

    /// One reading per access point currently in range, on any network
    ///
    /// Backends that cannot see beyond the connected access point return
    /// an empty list.
    fn survey(&self) -> SurveyFuture<'_> {
        Box::pin(std::future::ready(Ok::<_, HalError>(Vec::new())))
    }
}

/// Scanner backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerBackend {
    /// Pick the native backend for the current platform
    Auto,
    Netsh,
    Iw,
    Replay,
    Simulated,
}

impl std::fmt::Display for ScannerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScannerBackend::Auto => "auto",
            ScannerBackend::Netsh => "netsh",
            ScannerBackend::Iw => "iw",
            ScannerBackend::Replay => "replay",
            ScannerBackend::Simulated => "simulated",
        };
        f.write_str(name)
    }
}

/// HAL Error types
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("Scan unavailable: {0}")]
    ScanUnavailable(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Could not parse scanner output: {0}")]
    ParseError(String),

    #[error("Timeout")]
    Timeout,
}

/// One reading of the connected access point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiReading {
    pub ssid: String,
    pub bssid: String,
    /// Signal strength in dBm
    pub rssi: i32,
    /// Capture time, epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,
}

impl WifiReading {
    /// Create a reading stamped with the current time
    pub fn now(ssid: &str, bssid: &str, rssi: i32) -> Self {
        Self {
            ssid: ssid.to_string(),
            bssid: bssid.to_string(),
            rssi,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Whether the RSSI lies in the physically plausible range
    pub fn is_plausible(&self) -> bool {
        (RSSI_PLAUSIBLE_MIN..=RSSI_PLAUSIBLE_MAX).contains(&self.rssi)
    }
}

/// Convert a Windows signal quality percentage to approximate dBm
pub fn percent_to_dbm(percent: u8) -> i32 {
    (-100.0 + f64::from(percent.min(100)) * 0.7).round() as i32
}

/// Normalise a hardware address to lowercase colon-separated form
pub fn normalize_bssid(raw: &str) -> String {
    raw.trim().replace('-', ":").to_ascii_lowercase()
}

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub backend: ScannerBackend,
    /// Wireless interface for the `iw` backend
    pub interface: String,
    /// Upper bound on a single platform command
    pub command_timeout: Duration,
    /// Recorded readings for the replay backend
    pub replay_file: Option<PathBuf>,
    /// Network name reported by the simulated backend
    pub simulated_ssid: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            backend: ScannerBackend::Auto,
            interface: "wlan0".to_string(),
            command_timeout: Duration::from_secs(5),
            replay_file: None,
            simulated_ssid: "College-WiFi".to_string(),
        }
    }
}

/// Open a scanner for the configured backend
pub fn open_scanner(config: &ScannerConfig) -> Result<Box<dyn ScanPrimitive>, HalError> {
    let backend = match config.backend {
        ScannerBackend::Auto => native_backend()?,
        other => other,
    };

    tracing::info!("Opening {} scanner", backend);

    match backend {
        #[cfg(feature = "netsh")]
        ScannerBackend::Netsh => Ok(Box::new(NetshScanner::new(config.command_timeout))),
        #[cfg(feature = "iw")]
        ScannerBackend::Iw => Ok(Box::new(IwLinkScanner::new(&config.interface, config.command_timeout))),
        ScannerBackend::Replay => {
            let path = config.replay_file.as_ref().ok_or_else(|| {
                HalError::InvalidConfig("replay backend requires a replay file".to_string())
            })?;
            Ok(Box::new(ReplayScanner::from_json_file(path)?))
        }
        #[cfg(feature = "simulated")]
        ScannerBackend::Simulated => Ok(Box::new(SimulatedScanner::new(&config.simulated_ssid))),
        other => Err(HalError::InvalidConfig(format!(
            "{} backend is not compiled into this build",
            other
        ))),
    }
}

/// Native backend for the current platform
pub fn native_backend() -> Result<ScannerBackend, HalError> {
    if cfg!(target_os = "windows") {
        Ok(ScannerBackend::Netsh)
    } else if cfg!(target_os = "linux") {
        Ok(ScannerBackend::Iw)
    } else {
        Err(HalError::InvalidConfig(
            "no native WiFi scanner for this platform".to_string(),
        ))
    }
}

/// Scanner that falls back to a second scanner when the first is unavailable
pub struct FallbackScanner {
    name: String,
    primary: Box<dyn ScanPrimitive>,
    fallback: Box<dyn ScanPrimitive>,
}

impl FallbackScanner {
    pub fn new(primary: Box<dyn ScanPrimitive>, fallback: Box<dyn ScanPrimitive>) -> Self {
        let name = format!("{} (fallback: {})", primary.name(), fallback.name());
        Self {
            name,
            primary,
            fallback,
        }
    }
}

impl ScanPrimitive for FallbackScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> ScannerBackend {
        self.primary.backend()
    }

    fn scan(&self) -> ScanFuture<'_> {
        Box::pin(async move {
            match self.primary.scan().await {
                Ok(reading) => Ok(reading),
                Err(HalError::ScanUnavailable(reason)) => {
                    tracing::warn!(
                        "{} unavailable ({}), using {}",
                        self.primary.name(),
                        reason,
                        self.fallback.name()
                    );
                    self.fallback.scan().await
                }
                Err(e) => Err(e),
            }
        })
    }

    fn survey(&self) -> SurveyFuture<'_> {
        Box::pin(async move {
            match self.primary.survey().await {
                Err(HalError::ScanUnavailable(reason)) => {
                    tracing::warn!(
                        "{} survey unavailable ({}), using {}",
                        self.primary.name(),
                        reason,
                        self.fallback.name()
                    );
                    self.fallback.survey().await
                }
                other => other,
            }
        })
    }
}

/// Run a platform command and capture stdout
///
/// A missing executable or non-zero exit means the platform cannot
/// provide a reading, so both map to [`HalError::ScanUnavailable`].
#[cfg(any(feature = "netsh", feature = "iw"))]
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, HalError> {
    let child = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Err(_) => return Err(HalError::Timeout),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HalError::ScanUnavailable(format!("{} not found", program)));
        }
        Ok(Err(e)) => return Err(HalError::IoError(e)),
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HalError::ScanUnavailable(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_conversion_matches_trainer_formula() {
        assert_eq!(percent_to_dbm(100), -30);
        assert_eq!(percent_to_dbm(0), -100);
        assert_eq!(percent_to_dbm(84), -41);
        assert_eq!(percent_to_dbm(200), -30);
    }

    #[test]
    fn bssid_is_normalised() {
        assert_eq!(normalize_bssid(" 00-1A-2B-3C-4D-5E "), "00:1a:2b:3c:4d:5e");
    }

    #[test]
    fn plausibility_range() {
        assert!(WifiReading::now("X", "aa", -55).is_plausible());
        assert!(WifiReading::now("X", "aa", 0).is_plausible());
        assert!(!WifiReading::now("X", "aa", -120).is_plausible());
        assert!(!WifiReading::now("X", "aa", 12).is_plausible());
    }

    #[tokio::test]
    async fn fallback_used_when_primary_unavailable() {
        let primary = ReplayScanner::new("empty", Vec::new());
        let fallback = ReplayScanner::new(
            "recorded",
            vec![WifiReading::now("College-WiFi", "aa:bb:cc:dd:ee:01", -50)],
        );
        let scanner = FallbackScanner::new(Box::new(primary), Box::new(fallback));

        let reading = scanner.scan().await.unwrap();
        assert_eq!(reading.rssi, -50);
        assert_eq!(scanner.backend(), ScannerBackend::Replay);
    }

    #[tokio::test]
    async fn fallback_surveys_when_primary_unavailable() {
        struct Offline;

        impl ScanPrimitive for Offline {
            fn name(&self) -> &str {
                "offline"
            }
            fn backend(&self) -> ScannerBackend {
                ScannerBackend::Iw
            }
            fn scan(&self) -> ScanFuture<'_> {
                Box::pin(std::future::ready(Err::<WifiReading, _>(HalError::ScanUnavailable(
                    "no adapter".to_string(),
                ))))
            }
            fn survey(&self) -> SurveyFuture<'_> {
                Box::pin(std::future::ready(Err::<Vec<WifiReading>, _>(HalError::ScanUnavailable(
                    "no adapter".to_string(),
                ))))
            }
        }

        let fallback = ReplayScanner::new("recorded", Vec::new()).with_survey(vec![
            WifiReading::now("College-WiFi", "aa:bb:cc:dd:ee:01", -48),
            WifiReading::now("College-WiFi", "aa:bb:cc:dd:ee:02", -67),
        ]);
        let scanner = FallbackScanner::new(Box::new(Offline), Box::new(fallback));

        let survey = scanner.survey().await.unwrap();
        assert_eq!(survey.len(), 2);
        assert_eq!(scanner.backend(), ScannerBackend::Iw);
    }

    #[test]
    fn replay_backend_needs_a_file() {
        let config = ScannerConfig {
            backend: ScannerBackend::Replay,
            ..Default::default()
        };
        assert!(matches!(open_scanner(&config), Err(HalError::InvalidConfig(_))));
    }
}
