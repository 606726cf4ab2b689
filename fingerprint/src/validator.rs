//! Presence Validator
//!
//! Decides at attendance time whether a live reading places the device
//! inside a trained room: same network, and a signal at least as strong
//! as the room's acceptance floor.

use crate::store::FingerprintStore;
use crate::{FingerprintError, LiveScan, Result, RoomFingerprint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Why a live scan was not accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// Connected to a different SSID than the room was trained on
    WrongNetwork { expected: String, observed: String },
    /// Right network, but weaker than the trained floor
    SignalTooWeak { rssi: i32, floor: i32 },
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::WrongNetwork { .. } => "WRONG_NETWORK",
            RejectReason::SignalTooWeak { .. } => "SIGNAL_TOO_WEAK",
        }
    }

    /// Message suitable for showing to the person marking attendance
    pub fn user_message(&self) -> String {
        match self {
            RejectReason::WrongNetwork { expected, observed } => format!(
                "You are connected to '{}'. Connect to '{}' to mark attendance.",
                observed, expected
            ),
            RejectReason::SignalTooWeak { rssi, floor } => format!(
                "Signal too weak ({} dBm, need {} dBm or stronger). Move closer to the classroom.",
                rssi, floor
            ),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::WrongNetwork { expected, observed } => {
                write!(f, "wrong network: expected '{}', observed '{}'", expected, observed)
            }
            RejectReason::SignalTooWeak { rssi, floor } => {
                write!(f, "signal too weak: {} dBm below floor {} dBm", rssi, floor)
            }
        }
    }
}

/// Outcome of a presence check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceVerdict {
    Present,
    Absent(RejectReason),
}

impl PresenceVerdict {
    pub fn is_match(&self) -> bool {
        matches!(self, PresenceVerdict::Present)
    }

    pub fn reason(&self) -> Option<&RejectReason> {
        match self {
            PresenceVerdict::Present => None,
            PresenceVerdict::Absent(reason) => Some(reason),
        }
    }
}

/// Compare a live scan against a trained fingerprint
///
/// SSIDs compare exactly, case included. A network mismatch is reported
/// ahead of signal strength. The BSSID list is not consulted.
pub fn validate(live: &LiveScan, fingerprint: &RoomFingerprint) -> PresenceVerdict {
    if live.ssid != fingerprint.ssid {
        return PresenceVerdict::Absent(RejectReason::WrongNetwork {
            expected: fingerprint.ssid.clone(),
            observed: live.ssid.clone(),
        });
    }

    if live.rssi < fingerprint.stats.min_rssi {
        return PresenceVerdict::Absent(RejectReason::SignalTooWeak {
            rssi: live.rssi,
            floor: fingerprint.stats.min_rssi,
        });
    }

    PresenceVerdict::Present
}

/// Store-backed presence checks
pub struct PresenceValidator {
    store: Arc<dyn FingerprintStore>,
}

impl PresenceValidator {
    pub fn new(store: Arc<dyn FingerprintStore>) -> Self {
        Self { store }
    }

    /// Check `live` against the stored fingerprint for `room_id`
    pub fn verify(&self, room_id: &str, live: &LiveScan) -> Result<PresenceVerdict> {
        let fingerprint = self
            .store
            .get(room_id)?
            .ok_or_else(|| FingerprintError::FingerprintNotFound(room_id.to_string()))?;

        let verdict = validate(live, &fingerprint);
        match verdict.reason() {
            None => tracing::info!("{}: presence confirmed ({} dBm on {})", room_id, live.rssi, live.ssid),
            Some(reason) => tracing::info!("{}: presence rejected, {}", room_id, reason),
        }

        Ok(verdict)
    }
}
