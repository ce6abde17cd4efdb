//! Probe entry point and dispatch.

use anyhow::{Context, Result};

use vmarray::{vm, VirtualArray};

use crate::config::{ElementSize, ProbeConfig};
use crate::errors::ProbeError;
use crate::metrics::ProcessMemory;
use crate::output::{render_json, render_text};
use crate::report::{CycleReport, ProbeReport};

/// Resident pages tolerated beyond the pages the live elements span.
pub const SLACK_PAGES: usize = 1;

/// Run the probe.
pub fn run(config: &ProbeConfig) -> Result<()> {
    // Handle shell completion
    if let Some(shell) = config.completion {
        let mut cmd = <ProbeConfig as clap::CommandFactory>::command();
        crate::completion::generate_completion(&mut cmd, shell, &mut std::io::stdout());
        return Ok(());
    }

    config.validate()?;
    let report = probe(config)?;

    if config.json {
        println!("{}", render_json(&report)?);
    } else {
        print!("{}", render_text(&report, config.verbose, config.quiet));
    }

    if !report.lazy {
        let limit_pages = report
            .cycles
            .iter()
            .map(|c| c.live_pages + SLACK_PAGES)
            .max()
            .unwrap_or(SLACK_PAGES);
        return Err(ProbeError::EagerCommit {
            resident_pages: report.peak_resident_pages(),
            limit_pages,
        }
        .into());
    }
    Ok(())
}

/// Reserve, fill, and reset an array as configured, measuring each cycle.
pub fn probe(config: &ProbeConfig) -> Result<ProbeReport> {
    match config.element_bytes {
        ElementSize::B8 => probe_with::<8>(config),
        ElementSize::B64 => probe_with::<64>(config),
        ElementSize::B512 => probe_with::<512>(config),
        ElementSize::B4096 => probe_with::<4096>(config),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn pattern(index: usize) -> u8 {
    (index % 251) as u8 + 1
}

fn probe_with<const N: usize>(config: &ProbeConfig) -> Result<ProbeReport> {
    let mut sampler = ProcessMemory::new();
    let mut array = VirtualArray::<[u8; N]>::try_with_capacity(config.capacity)
        .with_context(|| format!("reserving {} elements of {N} bytes", config.capacity))?;
    let initial = array.footprint()?;
    let base = array.as_ptr() as usize;
    tracing::info!(
        capacity = config.capacity,
        element_bytes = N,
        reserved_bytes = initial.reserved_bytes,
        resident_bytes = initial.resident_bytes,
        "reservation ready"
    );

    let mut cycles = Vec::new();
    let mut lazy = true;
    for cycle in 0..config.cycles {
        for i in 0..config.appends {
            array.try_push([pattern(i); N])?;
        }
        verify(&array)?;

        let filled = array.footprint()?;
        lazy &= filled.is_lazy(SLACK_PAGES);
        let process_rss_bytes = sampler.resident_bytes();
        tracing::debug!(
            cycle,
            len = array.len(),
            resident_pages = filled.resident_pages(),
            "filled"
        );

        array.try_reset()?;
        let after = array.footprint()?;
        cycles.push(CycleReport {
            cycle,
            len: config.appends,
            live_pages: filled.live_pages(),
            resident_pages: filled.resident_pages(),
            resident_pages_after_reset: after.resident_pages(),
            base_after_reset: array.as_ptr() as usize,
            process_rss_bytes,
        });
    }

    Ok(ProbeReport {
        strategy: vm::strategy().as_str(),
        page_size: initial.page_size,
        capacity: config.capacity,
        element_bytes: N,
        reserved_bytes: initial.reserved_bytes,
        reserved_pages: initial.reserved_pages(),
        base,
        appends: config.appends,
        cycles,
        lazy,
    })
}

fn verify<const N: usize>(array: &VirtualArray<[u8; N]>) -> Result<(), ProbeError> {
    for (index, element) in array.iter().enumerate() {
        let expected = pattern(index);
        if let Some(&found) = element.iter().find(|&&b| b != expected) {
            return Err(ProbeError::Corrupted {
                index,
                expected,
                found,
            });
        }
    }
    Ok(())
}
