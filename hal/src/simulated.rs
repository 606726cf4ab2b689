//! Simulated scanner for demo builds
//!
//! Produces readings around a base signal with uniform jitter, for
//! demos on machines without a wireless adapter. Only compiled with
//! the `simulated` feature.

use crate::{ScanFuture, ScanPrimitive, ScannerBackend, SurveyFuture, WifiReading};
use rand::Rng;
use std::sync::atomic::{AtomicI32, Ordering};

/// Synthetic signal source
pub struct SimulatedScanner {
    ssid: String,
    bssids: Vec<String>,
    base_rssi: AtomicI32,
    jitter: i32,
}

impl SimulatedScanner {
    pub fn new(ssid: &str) -> Self {
        Self {
            ssid: ssid.to_string(),
            bssids: (1..=3).map(|i| format!("aa:bb:cc:dd:ee:{:02x}", i)).collect(),
            base_rssi: AtomicI32::new(-52),
            jitter: 5,
        }
    }

    /// Set the signal level readings fluctuate around
    pub fn set_base_rssi(&self, rssi: i32) {
        self.base_rssi.store(rssi, Ordering::Relaxed);
    }

    /// Set the maximum deviation from the base level (dB)
    pub fn with_jitter(mut self, jitter: i32) -> Self {
        self.jitter = jitter.abs();
        self
    }
}

impl ScanPrimitive for SimulatedScanner {
    fn name(&self) -> &str {
        "simulated"
    }

    fn backend(&self) -> ScannerBackend {
        ScannerBackend::Simulated
    }

    fn scan(&self) -> ScanFuture<'_> {
        let reading = {
            let mut rng = rand::thread_rng();
            let noise = rng.gen_range(-self.jitter..=self.jitter);
            let bssid = &self.bssids[rng.gen_range(0..self.bssids.len())];
            WifiReading::now(&self.ssid, bssid, self.base_rssi.load(Ordering::Relaxed) + noise)
        };

        Box::pin(std::future::ready(Ok::<_, crate::HalError>(reading)))
    }

    fn survey(&self) -> SurveyFuture<'_> {
        let base = self.base_rssi.load(Ordering::Relaxed);
        let mut rng = rand::thread_rng();
        // each further access point sits 8 dB below the previous one
        let readings = self
            .bssids
            .iter()
            .enumerate()
            .map(|(i, bssid)| {
                let noise = rng.gen_range(-self.jitter..=self.jitter);
                WifiReading::now(&self.ssid, bssid, base - 8 * i as i32 + noise)
            })
            .collect();

        Box::pin(std::future::ready(Ok::<_, crate::HalError>(readings)))
    }
}
