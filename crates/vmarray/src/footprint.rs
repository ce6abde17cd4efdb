//! Reserved vs. resident memory accounting.

/// Memory footprint of a [`VirtualArray`](crate::VirtualArray).
///
/// `reserved_bytes` is address space only. `resident_bytes` is what the OS
/// currently backs with physical memory (committed pages on Windows,
/// `mincore`-resident pages on Unix), always a multiple of `page_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    /// OS page size in bytes.
    pub page_size: usize,
    /// Size of the address-space reservation in bytes.
    pub reserved_bytes: usize,
    /// Bytes of the reservation backed by physical memory.
    pub resident_bytes: usize,
    /// Bytes occupied by live elements.
    pub live_bytes: usize,
}

impl Footprint {
    /// Number of pages spanned by the reservation.
    #[must_use]
    pub fn reserved_pages(&self) -> usize {
        self.reserved_bytes.div_ceil(self.page_size)
    }

    /// Number of physically backed pages.
    #[must_use]
    pub fn resident_pages(&self) -> usize {
        self.resident_bytes / self.page_size
    }

    /// Fewest pages that could hold the live elements.
    #[must_use]
    pub fn live_pages(&self) -> usize {
        self.live_bytes.div_ceil(self.page_size)
    }

    /// Resident fraction of the reservation in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn resident_ratio(&self) -> f64 {
        if self.reserved_bytes == 0 {
            return 0.0;
        }
        self.resident_bytes as f64 / self.reserved_bytes as f64
    }

    /// Whether residency stays within `slack_pages` of what the live
    /// elements need, i.e. the reservation was not committed eagerly.
    #[must_use]
    pub fn is_lazy(&self, slack_pages: usize) -> bool {
        self.resident_pages() <= self.live_pages() + slack_pages
    }
}
