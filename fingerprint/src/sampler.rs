//! Sampler
//!
//! Captures a fixed number of readings at one position, pausing
//! between reads so consecutive samples see independent fluctuation
//! instead of the same instant of channel noise.

use crate::{FingerprintError, Position, RawSample, Result};
use roomprint_hal::ScanPrimitive;
use std::time::Duration;

/// Readings per position when not configured
pub const DEFAULT_SAMPLES_PER_POSITION: usize = 7;

/// Pause between consecutive readings when not configured
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(800);

/// Upper bound on readings per position
pub const MAX_SAMPLES_PER_POSITION: usize = 50;

/// Sampler configuration
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Readings taken at each position
    pub samples_per_position: usize,
    /// Pause between consecutive readings
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            samples_per_position: DEFAULT_SAMPLES_PER_POSITION,
            interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.samples_per_position == 0 || self.samples_per_position > MAX_SAMPLES_PER_POSITION {
            return Err(FingerprintError::InvalidConfig(format!(
                "samples per position must be between 1 and {}",
                MAX_SAMPLES_PER_POSITION
            )));
        }
        if self.interval.is_zero() {
            return Err(FingerprintError::InvalidConfig(
                "sample interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Paced reading capture for one position
#[derive(Debug, Clone)]
pub struct Sampler {
    config: SamplerConfig,
}

impl Sampler {
    pub fn new(config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Capture readings for `position`
    pub async fn sample(&self, scanner: &dyn ScanPrimitive, position: Position) -> Result<Vec<RawSample>> {
        self.sample_with(scanner, position, |_, _| {}).await
    }

    /// Capture readings for `position`, reporting each one as it arrives
    ///
    /// The callback receives the 1-based index and the sample. Any scan
    /// failure aborts the batch and nothing captured so far is returned.
    pub async fn sample_with<F>(
        &self,
        scanner: &dyn ScanPrimitive,
        position: Position,
        mut on_sample: F,
    ) -> Result<Vec<RawSample>>
    where
        F: FnMut(usize, &RawSample),
    {
        let total = self.config.samples_per_position;
        let mut batch = Vec::with_capacity(total);

        for index in 1..=total {
            if index > 1 {
                tokio::time::sleep(self.config.interval).await;
            }

            let reading = scanner.scan().await.map_err(|e| {
                tracing::warn!(
                    "{} failed at {} sample {}/{}: {}",
                    scanner.name(),
                    position,
                    index,
                    total,
                    e
                );
                FingerprintError::ScanUnavailable(e)
            })?;

            let sample = RawSample::from_reading(reading, position);
            if !sample.is_plausible() {
                tracing::warn!("Implausible RSSI {} dBm at {}, keeping it for trimming", sample.rssi, position);
            }

            on_sample(index, &sample);
            batch.push(sample);
        }

        Ok(batch)
    }

    /// Every access point in range at `position`
    ///
    /// A survey only informs the access-point profile, so a failure is
    /// logged and yields an empty list.
    pub async fn survey(&self, scanner: &dyn ScanPrimitive, position: Position) -> Vec<RawSample> {
        match scanner.survey().await {
            Ok(readings) => {
                tracing::debug!("{} access point(s) in range at {}", readings.len(), position);
                readings
                    .into_iter()
                    .map(|reading| RawSample::from_reading(reading, position))
                    .collect()
            }
            Err(e) => {
                tracing::warn!("{} survey failed at {}: {}", scanner.name(), position, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomprint_hal::{HalError, ReplayScanner, ScanFuture, ScannerBackend, SurveyFuture, WifiReading};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn readings(values: &[i32]) -> Vec<WifiReading> {
        values
            .iter()
            .map(|&rssi| WifiReading::now("College-WiFi", "aa:bb:cc:dd:ee:01", rssi))
            .collect()
    }

    struct Unavailable {
        calls: AtomicUsize,
    }

    impl ScanPrimitive for Unavailable {
        fn name(&self) -> &str {
            "unavailable"
        }

        fn backend(&self) -> ScannerBackend {
            ScannerBackend::Auto
        }

        fn scan(&self) -> ScanFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err::<WifiReading, _>(HalError::ScanUnavailable("no adapter".to_string())) })
        }

        fn survey(&self) -> SurveyFuture<'_> {
            Box::pin(async { Err::<Vec<WifiReading>, _>(HalError::Timeout) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn captures_in_order_with_paced_reads() {
        let sampler = Sampler::new(SamplerConfig {
            samples_per_position: 5,
            interval: Duration::from_millis(800),
        })
        .unwrap();
        let scanner = ReplayScanner::new("test", readings(&[-45, -47, -44, -50, -46]));

        let start = Instant::now();
        let batch = sampler.sample(&scanner, Position::Middle).await.unwrap();

        assert_eq!(
            batch.iter().map(|s| s.rssi).collect::<Vec<_>>(),
            vec![-45, -47, -44, -50, -46]
        );
        assert!(batch.iter().all(|s| s.position == Position::Middle));
        // four pauses between five reads
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(4000), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn reports_each_sample() {
        let sampler = Sampler::new(SamplerConfig::default()).unwrap();
        let scanner = ReplayScanner::new("test", readings(&[-50; 7]));

        let mut seen = Vec::new();
        sampler
            .sample_with(&scanner, Position::Front, |index, sample| seen.push((index, sample.rssi)))
            .await
            .unwrap();

        assert_eq!(seen.len(), 7);
        assert_eq!(seen.first(), Some(&(1, -50)));
        assert_eq!(seen.last(), Some(&(7, -50)));
    }

    #[tokio::test]
    async fn unavailable_scanner_yields_no_samples() {
        let sampler = Sampler::new(SamplerConfig::default()).unwrap();
        let scanner = Unavailable {
            calls: AtomicUsize::new(0),
        };

        let err = sampler.sample(&scanner, Position::Front).await.unwrap_err();
        assert!(matches!(err, FingerprintError::ScanUnavailable(_)));
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn survey_tags_position_and_tolerates_failure() {
        let sampler = Sampler::new(SamplerConfig::default()).unwrap();
        let scanner = ReplayScanner::new("test", Vec::new()).with_survey(vec![
            WifiReading::now("College-WiFi", "aa:bb:cc:dd:ee:01", -48),
            WifiReading::now("College-WiFi", "aa:bb:cc:dd:ee:02", -71),
        ]);

        let survey = sampler.survey(&scanner, Position::Back).await;
        assert_eq!(survey.len(), 2);
        assert!(survey.iter().all(|s| s.position == Position::Back));

        let offline = Unavailable {
            calls: AtomicUsize::new(0),
        };
        assert!(sampler.survey(&offline, Position::Back).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_mid_batch_discards_the_batch() {
        let sampler = Sampler::new(SamplerConfig::default()).unwrap();
        let scanner = ReplayScanner::new("short", readings(&[-50, -51, -52]));

        let err = sampler.sample(&scanner, Position::Back).await.unwrap_err();
        assert!(matches!(err, FingerprintError::ScanUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn implausible_readings_are_kept() {
        let sampler = Sampler::new(SamplerConfig {
            samples_per_position: 2,
            interval: Duration::from_millis(10),
        })
        .unwrap();
        let scanner = ReplayScanner::new("test", readings(&[-127, -50]));

        let batch = sampler.sample(&scanner, Position::Front).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(!batch[0].is_plausible());
    }

    #[test]
    fn instantaneous_cadence_is_rejected() {
        let config = SamplerConfig {
            samples_per_position: 5,
            interval: Duration::ZERO,
        };
        assert!(matches!(Sampler::new(config), Err(FingerprintError::InvalidConfig(_))));
    }

    #[test]
    fn sample_count_is_bounded() {
        for samples_per_position in [0, MAX_SAMPLES_PER_POSITION + 1] {
            let config = SamplerConfig {
                samples_per_position,
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }
    }
}
