//! Raw sample + chip ceilings → display-ready metrics.
//!
//! Pure functions, no I/O. Missing optional fields in a record read as zero
//! or are omitted from the snapshot; nothing here can fail.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

use crate::capability::CapabilityEntry;
use crate::record::{BandwidthCounter, ClusterSample, RawTelemetryRecord, ThermalPressure};

/// Rated ANE power; the sampler does not expose a per-chip figure.
pub const ANE_MAX_POWER_W: f64 = 8.0;

/// A power figure with its share of the rated ceiling, when one is known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerReading {
    pub watts: f64,
    pub percent_of_ceiling: Option<u8>,
}

impl PowerReading {
    fn new(watts: f64, ceiling_w: f64) -> Self {
        Self {
            watts,
            percent_of_ceiling: percent_of_ceiling(watts, ceiling_w),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    Efficiency,
    Performance,
    Other,
}

impl ClusterKind {
    pub fn from_name(name: &str) -> Self {
        match name.as_bytes().first() {
            Some(b'E') => Self::Efficiency,
            Some(b'P') => Self::Performance,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreUsage {
    pub cpu: u32,
    pub active_percent: u8,
    pub freq_mhz: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterUsage {
    pub name: String,
    pub kind: ClusterKind,
    pub active_percent: u8,
    pub freq_mhz: u32,
    pub cores: Vec<CoreUsage>,
}

/// All clusters of one kind folded together (e.g. `E0` + `E1` on Ultra parts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClusterSummary {
    /// Mean utilization of the member clusters.
    pub active_percent: u8,
    /// Highest member cluster frequency.
    pub freq_mhz: u32,
    pub core_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuMetrics {
    pub clusters: Vec<ClusterUsage>,
    pub e_cluster: Option<ClusterSummary>,
    pub p_cluster: Option<ClusterSummary>,
    pub power: PowerReading,
    pub ane_power: PowerReading,
    pub package_power_w: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuMetrics {
    pub active_percent: u8,
    pub freq_mhz: u32,
    pub power: PowerReading,
}

/// Memory traffic in GB/s.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandwidthMetrics {
    pub cpu_gbs: f64,
    pub gpu_gbs: f64,
    pub cpu_percent_of_ceiling: Option<u8>,
    pub gpu_percent_of_ceiling: Option<u8>,
}

/// Derived metrics for one poll cycle. Built fresh each cycle, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub cpu: CpuMetrics,
    pub gpu: GpuMetrics,
    pub bandwidth: Option<BandwidthMetrics>,
    pub thermal_pressure: ThermalPressure,
    #[serde(serialize_with = "serialize_unix_ms")]
    pub timestamp: SystemTime,
    /// Ceilings came from the fallback table entry.
    pub approximate_ceilings: bool,
}

fn serialize_unix_ms<S: Serializer>(ts: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    let ms = ts
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    s.serialize_u64(ms)
}

/// Utilization from an idle-residency ratio, rounded into `0..=100`.
pub fn active_percent(idle_ratio: Option<f64>) -> u8 {
    let Some(idle) = idle_ratio.filter(|v| v.is_finite()) else {
        return 0;
    };
    ((1.0 - idle) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// `min(100, round(value / ceiling * 100))`, or `None` without a usable ceiling.
pub fn percent_of_ceiling(value: f64, ceiling: f64) -> Option<u8> {
    if !ceiling.is_finite() || ceiling <= 0.0 {
        return None;
    }
    let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
    Some((value / ceiling * 100.0).round().min(100.0) as u8)
}

fn milliwatts_to_watts(mw: Option<f64>) -> f64 {
    mw.filter(|v| v.is_finite()).map_or(0.0, |v| v / 1000.0)
}

fn hz_to_mhz(hz: f64) -> u32 {
    if hz.is_finite() && hz > 0.0 {
        (hz / 1e6) as u32
    } else {
        0
    }
}

fn cluster_usage(cluster: &ClusterSample) -> ClusterUsage {
    ClusterUsage {
        name: cluster.name.clone(),
        kind: ClusterKind::from_name(&cluster.name),
        active_percent: active_percent(cluster.idle_ratio),
        freq_mhz: hz_to_mhz(cluster.freq_hz),
        cores: cluster
            .cpus
            .iter()
            .map(|c| CoreUsage {
                cpu: c.cpu,
                active_percent: active_percent(c.idle_ratio),
                freq_mhz: hz_to_mhz(c.freq_hz),
            })
            .collect(),
    }
}

fn summarize(clusters: &[ClusterUsage], kind: ClusterKind) -> Option<ClusterSummary> {
    let members: Vec<&ClusterUsage> = clusters.iter().filter(|c| c.kind == kind).collect();
    if members.is_empty() {
        return None;
    }
    let total: u32 = members.iter().map(|c| u32::from(c.active_percent)).sum();
    Some(ClusterSummary {
        active_percent: (total / members.len() as u32) as u8,
        freq_mhz: members.iter().map(|c| c.freq_mhz).max().unwrap_or(0),
        core_count: members.iter().map(|c| c.cores.len()).sum(),
    })
}

fn is_dcs_traffic(name: &str) -> bool {
    name.contains("DCS RD") || name.contains("DCS WR")
}

fn bandwidth(
    counters: &[BandwidthCounter],
    elapsed_ns: Option<u64>,
    capability: &CapabilityEntry,
) -> Option<BandwidthMetrics> {
    if counters.is_empty() {
        return None;
    }
    let secs = elapsed_ns.filter(|&ns| ns > 0)? as f64 / 1e9;

    let mut cpu_bytes = 0.0;
    let mut gpu_bytes = 0.0;
    for c in counters.iter().filter(|c| is_dcs_traffic(&c.name)) {
        let value = if c.value.is_finite() { c.value.max(0.0) } else { 0.0 };
        if c.name.starts_with("ECPU") || c.name.starts_with("PCPU") {
            cpu_bytes += value;
        } else if c.name.starts_with("GFX") {
            gpu_bytes += value;
        }
    }

    let cpu_gbs = cpu_bytes / secs / 1e9;
    let gpu_gbs = gpu_bytes / secs / 1e9;
    Some(BandwidthMetrics {
        cpu_gbs,
        gpu_gbs,
        cpu_percent_of_ceiling: percent_of_ceiling(cpu_gbs, capability.cpu_max_bw_gbs),
        gpu_percent_of_ceiling: percent_of_ceiling(gpu_gbs, capability.gpu_max_bw_gbs),
    })
}

/// Combine a decoded record with the chip's ceilings.
pub fn normalize(record: &RawTelemetryRecord, capability: &CapabilityEntry) -> MetricsSnapshot {
    let processor = &record.processor;
    let clusters: Vec<ClusterUsage> = processor.clusters.iter().map(cluster_usage).collect();

    let cpu_w = milliwatts_to_watts(processor.cpu_energy);
    let gpu_w = milliwatts_to_watts(processor.gpu_energy.or(record.gpu.gpu_energy));
    let ane_w = milliwatts_to_watts(processor.ane_energy);

    let cpu = CpuMetrics {
        e_cluster: summarize(&clusters, ClusterKind::Efficiency),
        p_cluster: summarize(&clusters, ClusterKind::Performance),
        clusters,
        power: PowerReading::new(cpu_w, capability.cpu_max_power_w),
        ane_power: PowerReading::new(ane_w, ANE_MAX_POWER_W),
        package_power_w: processor
            .combined_power
            .filter(|v| v.is_finite())
            .map(|mw| mw / 1000.0),
    };

    let gpu = GpuMetrics {
        active_percent: active_percent(record.gpu.idle_ratio),
        freq_mhz: if record.gpu.freq_hz.is_finite() && record.gpu.freq_hz > 0.0 {
            record.gpu.freq_hz as u32
        } else {
            0
        },
        power: PowerReading::new(gpu_w, capability.gpu_max_power_w),
    };

    MetricsSnapshot {
        cpu,
        gpu,
        bandwidth: bandwidth(&record.bandwidth_counters, record.elapsed_ns, capability),
        thermal_pressure: record.thermal_pressure.clone(),
        timestamp: record.timestamp,
        approximate_ceilings: capability.is_default(),
    }
}
