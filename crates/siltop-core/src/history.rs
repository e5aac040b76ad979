//! Rolling power history for "avg" and "peak" readouts.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

/// Power readings for one domain (CPU, GPU, ...) over a sliding time window.
///
/// Only readings within `window` of the newest one are kept. The peak covers
/// every reading since creation, not just the window.
#[derive(Debug, Clone)]
pub struct PowerHistory {
    window: Duration,
    samples: VecDeque<(SystemTime, f64)>,
    peak: Option<f64>,
}

impl PowerHistory {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            peak: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Record a reading. Non-finite values are dropped.
    pub fn push(&mut self, at: SystemTime, watts: f64) {
        if !watts.is_finite() {
            return;
        }
        self.samples.push_back((at, watts));
        self.peak = Some(self.peak.map_or(watts, |p| p.max(watts)));

        while let Some(&(oldest, _)) = self.samples.front() {
            match at.duration_since(oldest) {
                Ok(age) if age > self.window => {
                    self.samples.pop_front();
                }
                _ => break,
            }
        }
    }

    /// Mean of the readings inside the window.
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|(_, w)| w).sum();
        Some(sum / self.samples.len() as f64)
    }

    /// Highest reading ever recorded.
    pub fn peak(&self) -> Option<f64> {
        self.peak
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().map(|&(_, w)| w)
    }
}
