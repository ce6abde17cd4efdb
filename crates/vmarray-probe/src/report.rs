//! Probe results.

use serde::Serialize;

/// Measurements for one fill/reset cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Zero-based cycle number.
    pub cycle: u32,
    /// Elements live after the fill.
    pub len: usize,
    /// Fewest pages that could hold the live elements.
    pub live_pages: usize,
    /// Resident pages of the reservation after the fill.
    pub resident_pages: usize,
    /// Resident pages of the reservation after the reset.
    pub resident_pages_after_reset: usize,
    /// Base address after the reset, to show the reservation did not move.
    pub base_after_reset: usize,
    /// Process resident set size after the fill, when available.
    pub process_rss_bytes: Option<u64>,
}

/// Full probe report.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Commit strategy of the compiled backend.
    pub strategy: &'static str,
    /// OS page size in bytes.
    pub page_size: usize,
    /// Element capacity of the array.
    pub capacity: usize,
    /// Size of each element in bytes.
    pub element_bytes: usize,
    /// Size of the reservation in bytes.
    pub reserved_bytes: usize,
    /// Pages spanned by the reservation.
    pub reserved_pages: usize,
    /// Base address of the reservation.
    pub base: usize,
    /// Elements appended per cycle.
    pub appends: usize,
    /// Per-cycle measurements.
    pub cycles: Vec<CycleReport>,
    /// Whether every cycle stayed within the lazy-commit bound.
    pub lazy: bool,
}

impl ProbeReport {
    /// Highest resident page count over all cycles.
    #[must_use]
    pub fn peak_resident_pages(&self) -> usize {
        self.cycles
            .iter()
            .map(|c| c.resident_pages)
            .max()
            .unwrap_or(0)
    }

    /// Whether the reservation stayed at the same base through every reset.
    #[must_use]
    pub fn base_stable(&self) -> bool {
        self.cycles.iter().all(|c| c.base_after_reset == self.base)
    }
}
