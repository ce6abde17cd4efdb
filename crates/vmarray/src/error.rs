//! Error taxonomy for reservation-backed arrays.

use std::io;

/// Errors raised by [`VirtualArray`](crate::VirtualArray) and the
/// virtual-memory backend.
///
/// The infallible operations escalate every variant through
/// [`fatal::raise`](crate::fatal::raise); the `try_*` mirrors return them.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Append attempted while `len == capacity`.
    #[error("capacity exhausted: array holds {capacity} elements and never grows")]
    CapacityExhausted {
        /// Fixed capacity of the array.
        capacity: usize,
    },

    /// Index access outside the live range `[0, len)`.
    #[error("index {index} out of live range (len {len})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of live elements.
        len: usize,
    },

    /// The OS refused the address-space reservation.
    #[error("failed to reserve {bytes} bytes of address space: {source}")]
    Reserve {
        /// Size of the requested reservation.
        bytes: usize,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The OS refused to release the reservation.
    #[error("failed to release {bytes} byte reservation: {source}")]
    Release {
        /// Size of the reservation.
        bytes: usize,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Decommit (or remap) of the reservation failed.
    #[error("failed to discard {bytes} bytes of physical backing: {source}")]
    Discard {
        /// Size of the reservation.
        bytes: usize,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Committing a page for a new element failed.
    #[error("failed to commit page at {address:#x}: {source}")]
    Commit {
        /// Address the commit was requested for.
        address: usize,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Querying residency of the reservation failed.
    #[error("failed to query resident pages: {source}")]
    Query {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// `capacity * size_of::<T>()` does not fit in `isize`.
    #[error("reservation of {capacity} elements of {elem_size} bytes overflows the address space")]
    LayoutOverflow {
        /// Requested capacity.
        capacity: usize,
        /// Size of one element in bytes.
        elem_size: usize,
    },

    /// The element type is aligned more strictly than a page.
    #[error("element alignment {align} exceeds page size {page_size}")]
    Alignment {
        /// Required alignment of the element type.
        align: usize,
        /// OS page size.
        page_size: usize,
    },
}

impl VmError {
    /// Whether this error reports a caller contract violation rather than
    /// an OS failure.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::CapacityExhausted { .. } | Self::IndexOutOfRange { .. }
        )
    }
}
