//! Error handling and exit codes.

use vmarray::VmError;

/// Exit code for a successful probe.
pub const EXIT_OK: u8 = 0;
/// Exit code for a failed reservation, commit, or discard.
pub const EXIT_VM: u8 = 1;
/// Exit code when residency grew beyond what the live elements need.
pub const EXIT_EAGER: u8 = 3;
/// Exit code for invalid configuration.
pub const EXIT_CONFIG: u8 = 4;

/// Errors surfaced by the probe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The array or its backend failed.
    #[error(transparent)]
    Vm(#[from] VmError),

    /// Read-back after a fill did not match what was written.
    #[error("element {index} read back {found}, expected {expected}")]
    Corrupted {
        /// Index of the mismatching element.
        index: usize,
        /// Byte pattern written.
        expected: u8,
        /// Byte pattern read.
        found: u8,
    },

    /// The reservation was committed eagerly.
    #[error("resident memory ({resident_pages} pages) exceeds the {limit_pages} pages the live elements need")]
    EagerCommit {
        /// Pages backed by physical memory.
        resident_pages: usize,
        /// Upper bound allowed for the live elements.
        limit_pages: usize,
    },
}

/// Map an error to the process exit code.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ProbeError>() {
        Some(ProbeError::Config(_)) => EXIT_CONFIG,
        Some(ProbeError::EagerCommit { .. }) => EXIT_EAGER,
        Some(ProbeError::Vm(_) | ProbeError::Corrupted { .. }) | None => EXIT_VM,
    }
}
