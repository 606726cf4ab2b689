//! Statistical Aggregator
//!
//! Turns the pooled samples of a full training run into a
//! [`RoomFingerprint`]. The arithmetic mirrors what previously
//! trained rooms were computed with, so the acceptance floor of an
//! existing room does not move when it is retrained from the same data:
//!
//! 1. pool and sort every RSSI value
//! 2. drop `ceil(L * 0.10)` values from each end
//! 3. `avg = round(mean)`, population variance around `avg`
//! 4. `floor = floor(avg - 2σ - margin)`

use crate::{FingerprintError, FingerprintStats, Position, RawSample, Result, RoomFingerprint};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};

/// Fraction of pooled samples dropped from each end
pub const OUTLIER_TRIM_FRACTION: f64 = 0.10;

/// Standard deviations below the mean still accepted
pub const STD_DEV_MULTIPLIER: f64 = 2.0;

/// Flat safety margin below the statistical floor (dBm).
///
/// Policy value, not a derived statistic. Changing it moves the
/// acceptance floor of every room trained afterwards.
pub const DEFAULT_FLOOR_MARGIN_DBM: f64 = 5.0;

/// Distinct access points below which coverage is reported as thin
pub const MIN_ACCESS_POINTS: usize = 3;

/// Per-AP readings needed before the AP profile trims outliers
const AP_TRIM_MIN_READINGS: usize = 10;

/// Summary statistics of a pooled RSSI list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RssiStats {
    pub avg_rssi: i32,
    pub min_rssi: i32,
    /// Unrounded population variance
    pub variance: f64,
    /// Unrounded standard deviation
    pub std_dev: f64,
    /// Values before trimming
    pub pooled: usize,
    /// Values that survived trimming
    pub retained: usize,
}

/// Values dropped from each end of a pool of `len` values
pub fn trim_count(len: usize) -> usize {
    (len as f64 * OUTLIER_TRIM_FRACTION).ceil() as usize
}

/// Middle slice of a sorted pool left after trimming both ends
pub fn retained_slice(sorted: &[i32]) -> &[i32] {
    let drop = trim_count(sorted.len());
    if drop * 2 >= sorted.len() {
        return &[];
    }
    &sorted[drop..sorted.len() - drop]
}

/// Compute trimmed statistics and acceptance floor for a pool of RSSI values
pub fn compute_stats(rssi: &[i32], floor_margin_dbm: f64) -> Result<RssiStats> {
    let mut sorted = rssi.to_vec();
    sorted.sort_unstable();

    let valid = retained_slice(&sorted);
    if valid.is_empty() {
        return Err(FingerprintError::InsufficientSamples { pooled: rssi.len() });
    }

    let n = valid.len() as f64;
    let sum: f64 = valid.iter().map(|&x| f64::from(x)).sum();
    let avg_rssi = round_half_up(sum / n) as i32;

    let avg = f64::from(avg_rssi);
    let variance = valid
        .iter()
        .map(|&x| (f64::from(x) - avg).powi(2))
        .sum::<f64>()
        / n;
    let std_dev = variance.sqrt();

    let min_rssi = (avg - STD_DEV_MULTIPLIER * std_dev - floor_margin_dbm).floor() as i32;

    Ok(RssiStats {
        avg_rssi,
        min_rssi,
        variance,
        std_dev,
        pooled: rssi.len(),
        retained: valid.len(),
    })
}

/// Round to nearest, ties toward positive infinity (-55.5 → -55)
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

/// Round to two decimal places for storage
fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Aggregator configuration
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Flat margin subtracted below `avg - 2σ` (dBm)
    pub floor_margin_dbm: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            floor_margin_dbm: DEFAULT_FLOOR_MARGIN_DBM,
        }
    }
}

/// Who is training which room, and against what network
#[derive(Debug, Clone)]
pub struct TrainingContext {
    pub room_id: String,
    /// Network to train against; the most frequently seen SSID when unset
    pub target_ssid: Option<String>,
    pub gateway: Option<String>,
    pub trained_by: String,
}

impl TrainingContext {
    pub fn new(room_id: &str, trained_by: &str) -> Self {
        Self {
            room_id: room_id.trim().to_string(),
            target_ssid: None,
            gateway: None,
            trained_by: trained_by.to_string(),
        }
    }

    pub fn with_target_ssid(mut self, ssid: &str) -> Self {
        self.target_ssid = Some(ssid.to_string());
        self
    }

    pub fn with_gateway(mut self, gateway: &str) -> Self {
        self.gateway = Some(gateway.to_string());
        self
    }
}

/// Statistical Aggregator
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Build a fingerprint from the samples of a complete run
    pub fn aggregate(&self, context: &TrainingContext, samples: &[RawSample]) -> Result<RoomFingerprint> {
        self.aggregate_with_survey(context, samples, &[])
    }

    /// Build a fingerprint, taking the access-point profile from a survey
    ///
    /// `samples` are readings of the connected network and alone decide
    /// the acceptance statistics. `survey` holds every access point seen
    /// around each position; those on the fingerprint's network make up
    /// `apProfile` and the coverage count. Without any, the connected
    /// samples are used instead.
    pub fn aggregate_with_survey(
        &self,
        context: &TrainingContext,
        samples: &[RawSample],
        survey: &[RawSample],
    ) -> Result<RoomFingerprint> {
        if context.room_id.trim().is_empty() {
            return Err(FingerprintError::MissingRoomId);
        }

        let missing: Vec<Position> = Position::ALL
            .iter()
            .copied()
            .filter(|p| !samples.iter().any(|s| s.position == *p))
            .collect();
        if !missing.is_empty() {
            return Err(FingerprintError::IncompletePositionSet { missing });
        }

        let implausible = samples.iter().filter(|s| !s.is_plausible()).count();
        if implausible > 0 {
            tracing::warn!(
                "{}: {} of {} samples outside the plausible RSSI range",
                context.room_id,
                implausible,
                samples.len()
            );
        }

        let pooled: Vec<i32> = samples.iter().map(|s| s.rssi).collect();
        let stats = compute_stats(&pooled, self.config.floor_margin_dbm)?;

        let ssid = match &context.target_ssid {
            Some(ssid) => ssid.clone(),
            None => primary_ssid(samples).unwrap_or_default(),
        };
        let off_network = samples.iter().filter(|s| s.ssid != ssid).count();
        if off_network > 0 {
            tracing::warn!(
                "{}: {} samples were taken on a network other than {}",
                context.room_id,
                off_network,
                ssid
            );
        }

        let bssid_list = distinct_bssids(samples);

        let surveyed: Vec<RawSample> = survey.iter().filter(|s| s.ssid == ssid).cloned().collect();
        let ap_profile = if surveyed.is_empty() {
            access_point_profile(samples)
        } else {
            access_point_profile(&surveyed)
        };

        let mut coverage: Vec<&str> = bssid_list.iter().map(String::as_str).collect();
        for bssid in ap_profile.keys() {
            if !coverage.contains(&bssid.as_str()) {
                coverage.push(bssid.as_str());
            }
        }
        if coverage.len() < MIN_ACCESS_POINTS {
            tracing::warn!(
                "{}: only {} access point(s) seen on {}, {} recommended for reliable coverage",
                context.room_id,
                coverage.len(),
                ssid,
                MIN_ACCESS_POINTS
            );
        }

        tracing::debug!(
            "{}: retained {}/{} samples, avg {} dBm, σ {:.2}, floor {} dBm",
            context.room_id,
            stats.retained,
            stats.pooled,
            stats.avg_rssi,
            stats.std_dev,
            stats.min_rssi
        );

        Ok(RoomFingerprint {
            room_id: context.room_id.clone(),
            ssid,
            gateway: context.gateway.clone(),
            bssid_list,
            stats: FingerprintStats {
                avg_rssi: stats.avg_rssi,
                min_rssi: stats.min_rssi,
                variance: round2(stats.variance),
                std_dev: round2(stats.std_dev),
                sample_count: stats.pooled,
                trained_positions: Position::ALL.to_vec(),
            },
            ap_profile,
            trained_at: Utc::now(),
            trained_by: context.trained_by.clone(),
        })
    }
}

/// Distinct BSSIDs in first-seen order
pub fn distinct_bssids(samples: &[RawSample]) -> Vec<String> {
    let mut seen = Vec::new();
    for sample in samples {
        if !seen.contains(&sample.bssid) {
            seen.push(sample.bssid.clone());
        }
    }
    seen
}

/// Most frequently observed SSID, ties going to the first seen
pub fn primary_ssid(samples: &[RawSample]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for sample in samples {
        match counts.iter_mut().find(|(ssid, _)| *ssid == sample.ssid) {
            Some((_, count)) => *count += 1,
            None => counts.push((sample.ssid.as_str(), 1)),
        }
    }

    let best = counts.iter().map(|(_, c)| *c).max()?;
    counts
        .into_iter()
        .find(|(_, c)| *c == best)
        .map(|(ssid, _)| ssid.to_string())
}

/// Mean RSSI per access point, rounded to 0.1 dBm
///
/// Access points with at least ten readings drop `max(1, n / 10)`
/// readings from each end first.
pub fn access_point_profile(samples: &[RawSample]) -> BTreeMap<String, f64> {
    let mut per_ap: HashMap<&str, Vec<i32>> = HashMap::new();
    for sample in samples {
        per_ap.entry(&sample.bssid).or_default().push(sample.rssi);
    }

    per_ap
        .into_iter()
        .map(|(bssid, mut values)| {
            values.sort_unstable();
            let mut kept: &[i32] = &values;
            if values.len() >= AP_TRIM_MIN_READINGS {
                let trim = (values.len() / 10).max(1);
                if trim < values.len() - trim {
                    kept = &values[trim..values.len() - trim];
                }
            }
            let mean = kept.iter().map(|&x| f64::from(x)).sum::<f64>() / kept.len() as f64;
            (bssid.to_string(), (mean * 10.0).round() / 10.0)
        })
        .collect()
}
