//! Roomprint Fingerprint Engine
//!
//! Trains a statistical WiFi signal profile for a room from samples
//! taken at the front, middle and back, and later decides whether a
//! live reading places a device inside that room.
//!
//! - [`sampler`] - paced capture of readings at one position
//! - [`collector`] - front → middle → back training runs
//! - [`aggregator`] - outlier trimming and acceptance floor
//! - [`validator`] - presence decision for attendance
//! - [`store`] - one persisted fingerprint per room

pub mod aggregator;
pub mod collector;
pub mod sampler;
pub mod store;
pub mod validator;

use chrono::{DateTime, Utc};
use roomprint_hal::{HalError, WifiReading, RSSI_PLAUSIBLE_MAX, RSSI_PLAUSIBLE_MIN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use aggregator::{Aggregator, AggregatorConfig, RssiStats, TrainingContext};
pub use collector::{Collector, TrainingRun, TrainingState};
pub use sampler::{Sampler, SamplerConfig};
pub use store::{FingerprintStore, JsonFileStore, MemoryStore};
pub use validator::{validate, PresenceValidator, PresenceVerdict, RejectReason};

/// Physical sampling positions, in training order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Front,
    Middle,
    Back,
}

impl Position {
    /// Every position, in the order a run visits them
    pub const ALL: [Position; 3] = [Position::Front, Position::Middle, Position::Back];

    /// 1-based step number of this position in a run
    pub fn step(&self) -> usize {
        match self {
            Position::Front => 1,
            Position::Middle => 2,
            Position::Back => 3,
        }
    }

    /// Position visited after this one
    pub fn next(&self) -> Option<Position> {
        match self {
            Position::Front => Some(Position::Middle),
            Position::Middle => Some(Position::Back),
            Position::Back => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Front => "front",
            Position::Middle => "middle",
            Position::Back => "back",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(Position::Front),
            "middle" | "mid" => Ok(Position::Middle),
            "back" => Ok(Position::Back),
            other => Err(FingerprintError::InvalidConfig(format!("unknown position '{}'", other))),
        }
    }
}

/// One reading taken during training, tagged with where it was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub ssid: String,
    pub bssid: String,
    /// Signal strength in dBm
    pub rssi: i32,
    /// Capture time, epoch milliseconds
    pub timestamp: i64,
    pub position: Position,
}

impl RawSample {
    pub fn from_reading(reading: WifiReading, position: Position) -> Self {
        Self {
            ssid: reading.ssid,
            bssid: reading.bssid,
            rssi: reading.rssi,
            timestamp: reading.timestamp,
            position,
        }
    }

    /// Whether the RSSI lies in the physically plausible range
    pub fn is_plausible(&self) -> bool {
        (RSSI_PLAUSIBLE_MIN..=RSSI_PLAUSIBLE_MAX).contains(&self.rssi)
    }
}

/// A single reading taken at attendance time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveScan {
    pub ssid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bssid: Option<String>,
    pub rssi: i32,
}

impl LiveScan {
    pub fn new(ssid: &str, rssi: i32) -> Self {
        Self {
            ssid: ssid.to_string(),
            bssid: None,
            rssi,
        }
    }
}

impl From<WifiReading> for LiveScan {
    fn from(reading: WifiReading) -> Self {
        Self {
            ssid: reading.ssid,
            bssid: Some(reading.bssid),
            rssi: reading.rssi,
        }
    }
}

/// Signal statistics of a trained room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintStats {
    pub avg_rssi: i32,
    /// Acceptance floor: weakest RSSI still inside the room
    pub min_rssi: i32,
    pub variance: f64,
    pub std_dev: f64,
    /// Raw samples before outlier trimming
    pub sample_count: usize,
    pub trained_positions: Vec<Position>,
}

/// Persisted signal profile of one room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomFingerprint {
    pub room_id: String,
    pub ssid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Distinct access points seen while training
    #[serde(default)]
    pub bssid_list: Vec<String>,
    pub stats: FingerprintStats,
    /// Trimmed mean RSSI per access point, informational only
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ap_profile: BTreeMap<String, f64>,
    pub trained_at: DateTime<Utc>,
    pub trained_by: String,
}

impl RoomFingerprint {
    pub fn num_access_points(&self) -> usize {
        self.bssid_list.len()
    }

    /// Summary row for listings
    pub fn summary(&self) -> FingerprintSummary {
        FingerprintSummary {
            room_id: self.room_id.clone(),
            ssid: self.ssid.clone(),
            num_access_points: self.num_access_points(),
            updated_at: self.trained_at,
        }
    }

    /// Reject documents that could never validate a scan
    pub fn validate(&self) -> Result<()> {
        if self.room_id.trim().is_empty() {
            return Err(FingerprintError::MissingRoomId);
        }
        if self.ssid.is_empty() {
            return Err(FingerprintError::InvalidConfig(format!(
                "fingerprint for {} has no SSID",
                self.room_id
            )));
        }
        if self.stats.min_rssi > self.stats.avg_rssi {
            return Err(FingerprintError::InvalidConfig(format!(
                "fingerprint for {} has floor {} above average {}",
                self.room_id, self.stats.min_rssi, self.stats.avg_rssi
            )));
        }
        Ok(())
    }
}

/// Store listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintSummary {
    pub room_id: String,
    pub ssid: String,
    pub num_access_points: usize,
    pub updated_at: DateTime<Utc>,
}

/// Progress notifications from training runs
pub trait TrainingObserver: Send + Sync {
    /// Called after each reading is captured
    fn on_sample(&self, room_id: &str, sample: &RawSample, index: usize, total: usize);

    /// Called when all readings for a position are in
    fn on_position_complete(&self, room_id: &str, position: Position, samples: usize);

    /// Called once the fingerprint has been stored
    fn on_trained(&self, fingerprint: &RoomFingerprint);

    /// Called when a run fails and its samples are discarded
    fn on_failed(&self, room_id: &str, error: &FingerprintError);

    /// Called when an in-progress run is abandoned
    fn on_cancelled(&self, room_id: &str);
}

/// Observer that writes progress to the log
pub struct LoggingObserver;

impl TrainingObserver for LoggingObserver {
    fn on_sample(&self, room_id: &str, sample: &RawSample, index: usize, total: usize) {
        tracing::debug!(
            room = room_id,
            position = %sample.position,
            rssi = sample.rssi,
            "Sample {}/{} captured",
            index,
            total
        );
    }

    fn on_position_complete(&self, room_id: &str, position: Position, samples: usize) {
        tracing::info!("{}: {} complete ({} samples)", room_id, position, samples);
    }

    fn on_trained(&self, fingerprint: &RoomFingerprint) {
        tracing::info!(
            room = %fingerprint.room_id,
            avg_rssi = fingerprint.stats.avg_rssi,
            min_rssi = fingerprint.stats.min_rssi,
            "Training complete: accepted range {} dBm and up (avg {})",
            fingerprint.stats.min_rssi,
            fingerprint.stats.avg_rssi
        );
    }

    fn on_failed(&self, room_id: &str, error: &FingerprintError) {
        tracing::warn!("Training for {} failed: {}", room_id, error);
    }

    fn on_cancelled(&self, room_id: &str) {
        tracing::info!("Training for {} cancelled", room_id);
    }
}

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("Scan unavailable: {0}")]
    ScanUnavailable(#[from] HalError),

    #[error("Room ID is required")]
    MissingRoomId,

    #[error("Training already in progress for room: {0}")]
    TrainingAlreadyInProgress(String),

    #[error("Incomplete position set, missing: {}", join_positions(.missing))]
    IncompletePositionSet { missing: Vec<Position> },

    #[error("Not enough valid samples after filtering ({pooled} pooled)")]
    InsufficientSamples { pooled: usize },

    #[error("No fingerprint stored for room: {0}")]
    FingerprintNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid training state: {0}")]
    InvalidState(String),

    #[error("Store error: {0}")]
    Store(String),
}

fn join_positions(positions: &[Position]) -> String {
    positions
        .iter()
        .map(Position::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, FingerprintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_walk_front_to_back() {
        assert_eq!(Position::Front.next(), Some(Position::Middle));
        assert_eq!(Position::Middle.next(), Some(Position::Back));
        assert_eq!(Position::Back.next(), None);
        assert_eq!(
            Position::ALL.iter().map(Position::step).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn positions_parse_case_insensitively() {
        assert_eq!("FRONT".parse::<Position>().unwrap(), Position::Front);
        assert_eq!("mid".parse::<Position>().unwrap(), Position::Middle);
        assert!("side".parse::<Position>().is_err());
    }

    #[test]
    fn fingerprint_serializes_with_wire_names() {
        let fingerprint = RoomFingerprint {
            room_id: "CMD LAB".to_string(),
            ssid: "HITECHCMD-21".to_string(),
            gateway: Some("172.16.0.1".to_string()),
            bssid_list: vec!["00:1a:2b:3c:4d:5e".to_string()],
            stats: FingerprintStats {
                avg_rssi: -55,
                min_rssi: -74,
                variance: 49.5,
                std_dev: 7.04,
                sample_count: 21,
                trained_positions: Position::ALL.to_vec(),
            },
            ap_profile: BTreeMap::new(),
            trained_at: Utc::now(),
            trained_by: "Faculty (Multi-Pos)".to_string(),
        };

        let json = serde_json::to_value(&fingerprint).unwrap();
        assert_eq!(json["roomId"], "CMD LAB");
        assert_eq!(json["bssidList"][0], "00:1a:2b:3c:4d:5e");
        assert_eq!(json["stats"]["minRssi"], -74);
        assert_eq!(json["stats"]["trainedPositions"][2], "back");
        assert!(json.get("apProfile").is_none());

        let summary = serde_json::to_value(fingerprint.summary()).unwrap();
        assert_eq!(summary["numAccessPoints"], 1);
    }

    #[test]
    fn incomplete_position_message_lists_missing() {
        let err = FingerprintError::IncompletePositionSet {
            missing: vec![Position::Middle, Position::Back],
        };
        assert_eq!(err.to_string(), "Incomplete position set, missing: middle, back");
    }
}
