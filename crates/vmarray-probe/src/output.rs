//! Report formatting.

use std::fmt::Write as _;

use crate::report::ProbeReport;

/// Format a byte count with binary units.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Render an element or page count with `,` between digit groups.
#[must_use]
pub fn group_digits(count: usize) -> String {
    let digits = count.to_string();
    let lead = match digits.len() % 3 {
        0 => 3,
        n => n,
    };
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    grouped.push_str(&digits[..lead]);
    for group in digits.as_bytes()[lead..].chunks(3) {
        grouped.push(',');
        grouped.extend(group.iter().map(|&b| char::from(b)));
    }
    grouped
}

fn verdict(report: &ProbeReport) -> &'static str {
    if report.lazy {
        "lazy: resident memory tracks appended elements"
    } else {
        "EAGER: resident memory exceeds appended elements"
    }
}

/// Render the human-readable report.
#[must_use]
pub fn render_text(report: &ProbeReport, verbose: bool, quiet: bool) -> String {
    if quiet {
        return format!("{}\n", verdict(report));
    }

    let mut out = String::new();
    let _ = writeln!(out, "Strategy: {}", report.strategy);
    let _ = writeln!(out, "Page size: {}", format_bytes(report.page_size as u64));
    let _ = writeln!(
        out,
        "Capacity: {} x {} B",
        group_digits(report.capacity),
        report.element_bytes
    );
    let _ = writeln!(
        out,
        "Reserved: {} ({} pages)",
        format_bytes(report.reserved_bytes as u64),
        group_digits(report.reserved_pages)
    );
    let _ = writeln!(out, "Appends per cycle: {}", group_digits(report.appends));

    for cycle in &report.cycles {
        if !verbose && cycle.cycle > 0 {
            continue;
        }
        let _ = writeln!(
            out,
            "Cycle {}: len {}, resident {} pages (live {}), after reset {} pages",
            cycle.cycle,
            cycle.len,
            cycle.resident_pages,
            cycle.live_pages,
            cycle.resident_pages_after_reset,
        );
        if verbose {
            if let Some(rss) = cycle.process_rss_bytes {
                let _ = writeln!(out, "  process RSS: {}", format_bytes(rss));
            }
            let _ = writeln!(out, "  base after reset: {:#x}", cycle.base_after_reset);
        }
    }
    if !verbose && report.cycles.len() > 1 {
        let _ = writeln!(
            out,
            "Peak resident over {} cycles: {} pages",
            report.cycles.len(),
            report.peak_resident_pages()
        );
    }
    let _ = writeln!(out, "{}", verdict(report));
    out
}

/// Render the JSON report.
pub fn render_json(report: &ProbeReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}
