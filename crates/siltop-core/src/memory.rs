//! RAM and swap readout.

use serde::Serialize;
use sysinfo::System;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Memory occupancy in GiB, each figure rounded to one decimal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryMetrics {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub used_percent: u8,
    pub swap_total_gb: f64,
    pub swap_used_gb: f64,
    pub swap_free_gb: f64,
    /// `None` when no swap is configured.
    pub swap_used_percent: Option<u8>,
}

impl MemoryMetrics {
    /// Read current occupancy from the OS.
    pub fn collect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self::from_bytes(
            sys.total_memory(),
            sys.available_memory(),
            sys.total_swap(),
            sys.used_swap(),
        )
    }

    /// Build from raw byte counts. "Used" RAM is everything not available.
    pub fn from_bytes(total: u64, available: u64, swap_total: u64, swap_used: u64) -> Self {
        let available = available.min(total);
        let swap_used = swap_used.min(swap_total);
        let used = total - available;
        Self {
            total_gb: bytes_to_gb(total),
            used_gb: bytes_to_gb(used),
            free_gb: bytes_to_gb(available),
            used_percent: ratio_percent(used, total).unwrap_or(0),
            swap_total_gb: bytes_to_gb(swap_total),
            swap_used_gb: bytes_to_gb(swap_used),
            swap_free_gb: bytes_to_gb(swap_total - swap_used),
            swap_used_percent: ratio_percent(swap_used, swap_total),
        }
    }
}

/// Bytes to GiB, rounded to one decimal place.
pub fn bytes_to_gb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_GB * 10.0).round() / 10.0
}

fn ratio_percent(part: u64, whole: u64) -> Option<u8> {
    if whole == 0 {
        return None;
    }
    Some((part as f64 / whole as f64 * 100.0).round().min(100.0) as u8)
}
