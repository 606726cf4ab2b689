//! Replay scanner
//!
//! Plays back readings captured earlier (for example with
//! `roomprint-cli scan --count 20 > readings.json`), one per scan.
//! An optional fixed survey can be attached for the access-point view.

use crate::{HalError, ScanFuture, ScanPrimitive, ScannerBackend, SurveyFuture, WifiReading};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

/// Scanner that returns recorded readings in order
pub struct ReplayScanner {
    name: String,
    readings: Mutex<VecDeque<WifiReading>>,
    survey: Vec<WifiReading>,
}

impl ReplayScanner {
    pub fn new(name: &str, readings: Vec<WifiReading>) -> Self {
        Self {
            name: name.to_string(),
            readings: Mutex::new(readings.into()),
            survey: Vec::new(),
        }
    }

    /// Access points returned by every survey
    pub fn with_survey(mut self, survey: Vec<WifiReading>) -> Self {
        self.survey = survey;
        self
    }

    /// Load a JSON array of readings
    pub fn from_json_file(path: &Path) -> Result<Self, HalError> {
        let content = std::fs::read_to_string(path)?;
        let readings: Vec<WifiReading> = serde_json::from_str(&content)
            .map_err(|e| HalError::ParseError(format!("{}: {}", path.display(), e)))?;

        tracing::info!("Loaded {} recorded readings from {:?}", readings.len(), path);

        Ok(Self::new(&format!("replay ({})", path.display()), readings))
    }

    /// Readings not yet played back
    pub fn remaining(&self) -> usize {
        self.readings.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl ScanPrimitive for ReplayScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> ScannerBackend {
        ScannerBackend::Replay
    }

    fn scan(&self) -> ScanFuture<'_> {
        let next = self
            .readings
            .lock()
            .map_err(|_| HalError::ScanUnavailable("replay buffer poisoned".to_string()))
            .and_then(|mut readings| {
                readings
                    .pop_front()
                    .ok_or_else(|| HalError::ScanUnavailable("replay exhausted".to_string()))
            })
            .map(|mut reading| {
                if reading.timestamp == 0 {
                    reading.timestamp = chrono::Utc::now().timestamp_millis();
                }
                reading
            });

        Box::pin(std::future::ready(next))
    }

    fn survey(&self) -> SurveyFuture<'_> {
        let now = chrono::Utc::now().timestamp_millis();
        let survey = self
            .survey
            .iter()
            .cloned()
            .map(|mut reading| {
                reading.timestamp = now;
                reading
            })
            .collect();
        Box::pin(std::future::ready(Ok::<_, HalError>(survey)))
    }
}
