//! Linux scanner backed by `iw dev <iface> link`
//!
//! `iw` reports the associated BSS and its signal directly in dBm,
//! and reading link state does not need elevated privileges. Surveys
//! use `iw dev <iface> scan dump`, which returns the kernel's cached
//! scan results without triggering a new scan.

use crate::{
    normalize_bssid, run_command, HalError, ScanFuture, ScanPrimitive, ScannerBackend, SurveyFuture,
    WifiReading,
};
use std::time::Duration;

/// Connected-network scanner using `iw`
pub struct IwLinkScanner {
    name: String,
    interface: String,
    timeout: Duration,
}

impl IwLinkScanner {
    pub fn new(interface: &str, timeout: Duration) -> Self {
        Self {
            name: format!("iw ({})", interface),
            interface: interface.to_string(),
            timeout,
        }
    }
}

impl ScanPrimitive for IwLinkScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> ScannerBackend {
        ScannerBackend::Iw
    }

    fn scan(&self) -> ScanFuture<'_> {
        Box::pin(async move {
            let output = run_command("iw", &["dev", &self.interface, "link"], self.timeout).await?;
            parse_link(&output)
        })
    }

    fn survey(&self) -> SurveyFuture<'_> {
        Box::pin(async move {
            let output = run_command("iw", &["dev", &self.interface, "scan", "dump"], self.timeout).await?;
            Ok(parse_scan_dump(&output))
        })
    }
}

/// Parse `iw dev <iface> link` output into a reading
pub fn parse_link(output: &str) -> Result<WifiReading, HalError> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());

    let header = lines
        .next()
        .ok_or_else(|| HalError::ScanUnavailable("empty link report".to_string()))?;

    // "Connected to 00:1a:2b:3c:4d:5e (on wlan0)"
    let bssid = header
        .strip_prefix("Connected to ")
        .and_then(|rest| rest.split_whitespace().next())
        .map(normalize_bssid)
        .ok_or_else(|| HalError::ScanUnavailable(header.trim_end_matches('.').to_string()))?;

    let mut ssid = None;
    let mut rssi = None;

    for line in lines {
        if let Some(value) = line.strip_prefix("SSID:") {
            ssid = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("signal:") {
            let dbm = value
                .trim()
                .trim_end_matches("dBm")
                .trim()
                .parse::<i32>()
                .map_err(|_| HalError::ParseError(format!("bad signal value '{}'", value.trim())))?;
            rssi = Some(dbm);
        }
    }

    let ssid = ssid.ok_or_else(|| HalError::ParseError("missing SSID".to_string()))?;
    let rssi = rssi.ok_or_else(|| HalError::ParseError("missing signal".to_string()))?;

    Ok(WifiReading::now(&ssid, &bssid, rssi))
}

/// Parse `iw dev <iface> scan dump` output, one reading per BSS block
///
/// Blocks without a signal line are skipped; a missing SSID is reported
/// as an empty name (hidden network).
pub fn parse_scan_dump(output: &str) -> Vec<WifiReading> {
    fn flush(readings: &mut Vec<WifiReading>, bssid: Option<String>, ssid: &str, rssi: Option<i32>) {
        if let (Some(bssid), Some(rssi)) = (bssid, rssi) {
            readings.push(WifiReading::now(ssid, &bssid, rssi));
        }
    }

    let mut readings = Vec::new();
    let mut bssid: Option<String> = None;
    let mut ssid = String::new();
    let mut rssi: Option<i32> = None;

    for line in output.lines() {
        // block headers are the only unindented lines
        if let Some(rest) = line.strip_prefix("BSS ") {
            flush(&mut readings, bssid.take(), &ssid, rssi.take());
            ssid.clear();
            // "00:1a:2b:3c:4d:5e(on wlan0) -- associated"
            let mac: String = rest.chars().take_while(|c| c.is_ascii_hexdigit() || *c == ':').collect();
            bssid = Some(normalize_bssid(&mac));
            continue;
        }

        let line = line.trim();
        if let Some(value) = line.strip_prefix("SSID:") {
            ssid = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("signal:") {
            rssi = value
                .trim()
                .trim_end_matches("dBm")
                .trim()
                .parse::<f64>()
                .ok()
                .map(|dbm| dbm.round() as i32);
        }
    }
    flush(&mut readings, bssid, &ssid, rssi);

    readings
}
