//! Per-chip power and memory-bandwidth ceilings.
//!
//! The table maps the exact `machdep.cpu.brand_string` of an Apple Silicon
//! part to its rated package limits. Lookups never fail: unknown chips get
//! [`DEFAULT_CAPABILITY`], whose ceilings are deliberately low so derived
//! percentages saturate rather than under-report.

use serde::Serialize;

/// Rated ceilings for one chip model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CapabilityEntry {
    pub chip_name: &'static str,
    pub cpu_max_power_w: f64,
    pub gpu_max_power_w: f64,
    pub cpu_max_bw_gbs: f64,
    pub gpu_max_bw_gbs: f64,
}

impl CapabilityEntry {
    const fn new(chip_name: &'static str, cpu_w: f64, gpu_w: f64, cpu_bw: f64, gpu_bw: f64) -> Self {
        Self {
            chip_name,
            cpu_max_power_w: cpu_w,
            gpu_max_power_w: gpu_w,
            cpu_max_bw_gbs: cpu_bw,
            gpu_max_bw_gbs: gpu_bw,
        }
    }

    /// True when this entry is the fallback for an unrecognised chip.
    ///
    /// Ratios computed against a default entry are best-effort only.
    pub fn is_default(&self) -> bool {
        self.chip_name == DEFAULT_CAPABILITY.chip_name
    }
}

/// Entry returned for chips missing from [`CAPABILITY_TABLE`].
pub const DEFAULT_CAPABILITY: CapabilityEntry =
    CapabilityEntry::new("Unknown", 20.0, 20.0, 70.0, 70.0);

/// Known chips. Order is irrelevant; matching is by exact name.
pub const CAPABILITY_TABLE: &[CapabilityEntry] = &[
    // M1 series
    CapabilityEntry::new("Apple M1", 20.0, 20.0, 70.0, 70.0),
    CapabilityEntry::new("Apple M1 Pro", 30.0, 30.0, 200.0, 200.0),
    CapabilityEntry::new("Apple M1 Max", 30.0, 60.0, 250.0, 400.0),
    CapabilityEntry::new("Apple M1 Ultra", 60.0, 120.0, 500.0, 800.0),
    // M2 series
    CapabilityEntry::new("Apple M2", 25.0, 15.0, 100.0, 100.0),
    CapabilityEntry::new("Apple M2 Pro", 30.0, 30.0, 200.0, 200.0),
    CapabilityEntry::new("Apple M2 Max", 30.0, 60.0, 250.0, 400.0),
    CapabilityEntry::new("Apple M2 Ultra", 60.0, 120.0, 400.0, 800.0),
    // M3 series
    CapabilityEntry::new("Apple M3", 25.0, 15.0, 100.0, 100.0),
    CapabilityEntry::new("Apple M3 Pro", 30.0, 30.0, 150.0, 150.0),
    CapabilityEntry::new("Apple M3 Max", 30.0, 60.0, 300.0, 400.0),
    // M4 series
    CapabilityEntry::new("Apple M4", 25.0, 15.0, 120.0, 120.0),
    CapabilityEntry::new("Apple M4 Pro", 30.0, 30.0, 273.0, 273.0),
    CapabilityEntry::new("Apple M4 Max", 30.0, 60.0, 410.0, 546.0),
];

/// Look up a chip by exact name, falling back to [`DEFAULT_CAPABILITY`].
pub fn lookup(chip_name: &str) -> CapabilityEntry {
    CAPABILITY_TABLE
        .iter()
        .find(|entry| entry.chip_name == chip_name)
        .copied()
        .unwrap_or(DEFAULT_CAPABILITY)
}

/// Like [`lookup`], but refines M4 Max bandwidth by CPU core count.
///
/// The 14-core binned part has a narrower memory bus than the 16-core one,
/// and both share the same brand string.
pub fn lookup_for_cores(chip_name: &str, core_count: Option<usize>) -> CapabilityEntry {
    let mut entry = lookup(chip_name);
    if chip_name.contains("M4 Max") {
        entry.cpu_max_power_w = 30.0;
        entry.gpu_max_power_w = 60.0;
        match core_count {
            Some(14) => {
                entry.cpu_max_bw_gbs = 410.0;
                entry.gpu_max_bw_gbs = 410.0;
            }
            Some(16) => {
                entry.cpu_max_bw_gbs = 546.0;
                entry.gpu_max_bw_gbs = 546.0;
            }
            _ => {}
        }
    }
    entry
}
