//! One decoded `powermetrics` sample.
//!
//! A frame is an XML property list. Only the parts siltop reads are modelled;
//! unknown keys are ignored. `processor`, `gpu`, `thermal_pressure` and
//! `timestamp` are required: a frame missing any of them fails to decode, so
//! a partially written or truncated frame can never yield a record.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Why a single frame could not be decoded.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("frame is empty")]
    Empty,

    #[error("frame is not a complete telemetry plist: {0}")]
    Plist(#[from] plist::Error),
}

/// Raw sample as written by the sampler, before normalization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTelemetryRecord {
    pub processor: ProcessorSample,
    pub gpu: GpuSample,
    pub thermal_pressure: ThermalPressure,
    #[serde(deserialize_with = "deserialize_date")]
    pub timestamp: SystemTime,
    /// Length of the sampling window in nanoseconds.
    #[serde(default)]
    pub elapsed_ns: Option<u64>,
    /// DCS traffic counters; only present with the `bandwidth` sampler.
    #[serde(default)]
    pub bandwidth_counters: Vec<BandwidthCounter>,
}

/// CPU section. Energies are in milliwatts over the sample window.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProcessorSample {
    #[serde(default)]
    pub clusters: Vec<ClusterSample>,
    #[serde(default)]
    pub cpu_energy: Option<f64>,
    #[serde(default)]
    pub gpu_energy: Option<f64>,
    #[serde(default)]
    pub ane_energy: Option<f64>,
    #[serde(default)]
    pub combined_power: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClusterSample {
    pub name: String,
    #[serde(default)]
    pub freq_hz: f64,
    #[serde(default)]
    pub idle_ratio: Option<f64>,
    #[serde(default)]
    pub cpus: Vec<CoreSample>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CoreSample {
    pub cpu: u32,
    #[serde(default)]
    pub freq_hz: f64,
    #[serde(default)]
    pub idle_ratio: Option<f64>,
}

/// GPU section. `freq_hz` is reported in MHz by the sampler despite its name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GpuSample {
    #[serde(default)]
    pub freq_hz: f64,
    #[serde(default)]
    pub idle_ratio: Option<f64>,
    #[serde(default)]
    pub gpu_energy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BandwidthCounter {
    pub name: String,
    #[serde(default)]
    pub value: f64,
}

/// System thermal pressure level, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum ThermalPressure {
    Nominal,
    Moderate,
    Heavy,
    Trapping,
    Critical,
    Sleeping,
    Other(String),
}

impl ThermalPressure {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Nominal => "Nominal",
            Self::Moderate => "Moderate",
            Self::Heavy => "Heavy",
            Self::Trapping => "Trapping",
            Self::Critical => "Critical",
            Self::Sleeping => "Sleeping",
            Self::Other(s) => s,
        }
    }

    pub fn is_nominal(&self) -> bool {
        matches!(self, Self::Nominal)
    }
}

impl From<String> for ThermalPressure {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Nominal" => Self::Nominal,
            "Moderate" => Self::Moderate,
            "Heavy" => Self::Heavy,
            "Trapping" => Self::Trapping,
            "Critical" => Self::Critical,
            "Sleeping" => Self::Sleeping,
            _ => Self::Other(s),
        }
    }
}

impl From<ThermalPressure> for String {
    fn from(p: ThermalPressure) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for ThermalPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
where
    D: Deserializer<'de>,
{
    plist::Date::deserialize(deserializer).map(SystemTime::from)
}

/// Decode one NUL-delimited chunk of sampler output.
///
/// Surrounding ASCII whitespace is ignored; the sampler emits a newline
/// between the delimiter and the next document.
pub fn decode_frame(chunk: &[u8]) -> Result<RawTelemetryRecord, DecodeError> {
    let body = chunk.trim_ascii();
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(plist::from_bytes(body)?)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Synthetic sampler frames shared by unit tests.

    /// A complete frame with two clusters, matching real sampler output shape.
    pub fn frame(thermal: &str, cpu_mw: f64, e_idle: f64, p_idle: f64) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>is_delta</key><true/>
  <key>elapsed_ns</key><integer>1000000000</integer>
  <key>timestamp</key><date>2024-05-01T12:00:00Z</date>
  <key>thermal_pressure</key><string>{thermal}</string>
  <key>processor</key>
  <dict>
    <key>clusters</key>
    <array>
      <dict>
        <key>name</key><string>E-Cluster</string>
        <key>freq_hz</key><real>1020000000</real>
        <key>idle_ratio</key><real>{e_idle}</real>
        <key>cpus</key>
        <array>
          <dict><key>cpu</key><integer>0</integer><key>freq_hz</key><real>1020000000</real><key>idle_ratio</key><real>{e_idle}</real></dict>
          <dict><key>cpu</key><integer>1</integer><key>freq_hz</key><real>972000000</real><key>idle_ratio</key><real>0.9</real></dict>
        </array>
      </dict>
      <dict>
        <key>name</key><string>P-Cluster</string>
        <key>freq_hz</key><real>3204000000</real>
        <key>idle_ratio</key><real>{p_idle}</real>
        <key>cpus</key>
        <array>
          <dict><key>cpu</key><integer>2</integer><key>freq_hz</key><real>3204000000</real><key>idle_ratio</key><real>{p_idle}</real></dict>
        </array>
      </dict>
    </array>
    <key>cpu_energy</key><integer>{cpu_mw}</integer>
    <key>gpu_energy</key><integer>4500</integer>
    <key>ane_energy</key><integer>0</integer>
    <key>combined_power</key><integer>22500</integer>
  </dict>
  <key>gpu</key>
  <dict>
    <key>freq_hz</key><real>1398</real>
    <key>idle_ratio</key><real>0.75</real>
  </dict>
</dict>
</plist>
"#
        )
    }

    pub fn nominal() -> String {
        frame("Nominal", 18000.0, 0.4, 0.8)
    }
}
