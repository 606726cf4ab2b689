//! Windows scanner backed by `netsh wlan`
//!
//! `show interfaces` reports the access point the adapter is currently
//! associated with; `show networks mode=bssid` lists every access point
//! in range. `netsh` only exposes signal quality as a percentage, which
//! is converted to dBm with [`percent_to_dbm`](crate::percent_to_dbm).

use crate::{
    normalize_bssid, percent_to_dbm, run_command, HalError, ScanFuture, ScanPrimitive,
    ScannerBackend, SurveyFuture, WifiReading,
};
use std::time::Duration;

/// Connected-network scanner using `netsh`
pub struct NetshScanner {
    timeout: Duration,
}

impl NetshScanner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ScanPrimitive for NetshScanner {
    fn name(&self) -> &str {
        "netsh"
    }

    fn backend(&self) -> ScannerBackend {
        ScannerBackend::Netsh
    }

    fn scan(&self) -> ScanFuture<'_> {
        Box::pin(async move {
            let output = run_command("netsh", &["wlan", "show", "interfaces"], self.timeout).await?;
            parse_interfaces(&output)
        })
    }

    fn survey(&self) -> SurveyFuture<'_> {
        Box::pin(async move {
            let output = run_command("netsh", &["wlan", "show", "networks", "mode=bssid"], self.timeout).await?;
            Ok(parse_networks(&output))
        })
    }
}

fn parse_percent(value: &str) -> Result<u8, HalError> {
    value
        .trim_end_matches('%')
        .trim()
        .parse::<u8>()
        .map_err(|_| HalError::ParseError(format!("bad signal value '{}'", value)))
}

/// Parse `netsh wlan show interfaces` output into a reading
///
/// Only the first interface block is considered. A disconnected
/// adapter yields [`HalError::ScanUnavailable`].
pub fn parse_interfaces(output: &str) -> Result<WifiReading, HalError> {
    let mut state = None;
    let mut ssid = None;
    let mut bssid = None;
    let mut signal = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            // a second "Name" starts the next interface
            "Name" if state.is_some() || ssid.is_some() => break,
            "State" => state = Some(value.to_ascii_lowercase()),
            "SSID" => ssid = Some(value.to_string()),
            // newer builds print "AP BSSID"
            k if k == "BSSID" || k.ends_with(" BSSID") => bssid = Some(normalize_bssid(value)),
            "Signal" => signal = Some(parse_percent(value)?),
            _ => {}
        }
    }

    if let Some(state) = &state {
        if state != "connected" {
            return Err(HalError::ScanUnavailable(format!("adapter is {}", state)));
        }
    }

    let ssid = ssid.ok_or_else(|| HalError::ScanUnavailable("no connected network".to_string()))?;
    let bssid = bssid.ok_or_else(|| HalError::ParseError("missing BSSID".to_string()))?;
    let pct = signal.ok_or_else(|| HalError::ParseError("missing signal".to_string()))?;

    Ok(WifiReading::now(&ssid, &bssid, percent_to_dbm(pct)))
}

/// Parse `netsh wlan show networks mode=bssid` output
///
/// Each `BSSID n` entry is paired with the `Signal` line that follows
/// it and the `SSID n` heading above it. Entries with an unreadable
/// signal are skipped.
pub fn parse_networks(output: &str) -> Vec<WifiReading> {
    let mut readings = Vec::new();
    let mut ssid = String::new();
    let mut bssid: Option<String> = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if key.starts_with("SSID") {
            ssid = value.to_string();
            bssid = None;
        } else if key.starts_with("BSSID") {
            bssid = Some(normalize_bssid(value));
        } else if key == "Signal" {
            if let (Some(mac), Ok(pct)) = (bssid.take(), parse_percent(value)) {
                readings.push(WifiReading::now(&ssid, &mac, percent_to_dbm(pct)));
            }
        }
    }

    readings
}
