//! Probe configuration from CLI flags and environment.

use clap::{Parser, ValueEnum};

use crate::errors::ProbeError;

/// vmarray-probe: reserve a large `VirtualArray`, fill part of it, and report
/// how much of the reservation the OS actually backs with memory.
#[derive(Parser, Debug)]
#[command(name = "vmarray-probe", version, about)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProbeConfig {
    /// Number of elements to reserve address space for (K/M/G suffixes allowed).
    #[arg(long, default_value = "100000", env = "VMARRAY_CAPACITY", value_parser = parse_count)]
    pub capacity: usize,

    /// Number of elements to append per cycle (K/M/G suffixes allowed).
    #[arg(short = 'n', long, default_value = "5", env = "VMARRAY_APPENDS", value_parser = parse_count)]
    pub appends: usize,

    /// Size of each element in bytes.
    #[arg(long, value_enum, default_value = "64")]
    pub element_bytes: ElementSize,

    /// Number of fill/reset cycles to run on the same reservation.
    #[arg(long, default_value = "1")]
    pub cycles: u32,

    /// Emit the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Verbose output (debug logging, per-cycle details).
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (only print whether commit stayed lazy).
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate shell completion.
    #[arg(long, value_enum)]
    pub completion: Option<clap_complete::Shell>,
}

/// Supported element sizes.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSize {
    /// 8-byte elements.
    #[value(name = "8")]
    B8,
    /// 64-byte elements.
    #[value(name = "64")]
    B64,
    /// 512-byte elements.
    #[value(name = "512")]
    B512,
    /// Page-sized (4 KiB) elements.
    #[value(name = "4096")]
    B4096,
}

impl ElementSize {
    /// Size in bytes.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            Self::B8 => 8,
            Self::B64 => 64,
            Self::B512 => 512,
            Self::B4096 => 4096,
        }
    }
}

impl ProbeConfig {
    /// Parse CLI arguments.
    #[must_use]
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Reject combinations that can only fail after reserving memory.
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.appends > self.capacity {
            return Err(ProbeError::Config(format!(
                "cannot append {} elements to a capacity of {}",
                self.appends, self.capacity
            )));
        }
        if self.cycles == 0 {
            return Err(ProbeError::Config("cycles must be at least 1".into()));
        }
        if self.capacity.checked_mul(self.element_bytes.bytes()).is_none() {
            return Err(ProbeError::Config(format!(
                "capacity {} overflows the address space",
                self.capacity
            )));
        }
        Ok(())
    }
}

/// Parse an element count like "100000", "64K" or "1M" (binary multipliers).
pub fn parse_count(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let (num_str, multiplier) = if let Some(n) = s.strip_suffix(&['G', 'g'][..]) {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix(&['M', 'm'][..]) {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix(&['K', 'k'][..]) {
        (n, 1024)
    } else {
        (s, 1)
    };

    let value: usize = num_str
        .trim()
        .parse()
        .map_err(|e| format!("invalid count {s:?}: {e}"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("count {s:?} is too large"))
}
