//! Utility functions

use std::time::Instant;

/// Derive the output file name for a conversion
///
/// Strips the input's final extension (if any) and appends the output format:
/// `report.md` + `pdf` -> `report.pdf`. Dotfiles keep their leading dot.
pub fn output_file_name(input_name: &str, output_format: &str) -> String {
    let stem = match input_name.rfind('.') {
        // rfind == 0 means a dotfile like ".profile", keep the whole name
        Some(pos) if pos > 0 => &input_name[..pos],
        _ => input_name,
    };
    format!("{stem}.{output_format}")
}

/// Samples process memory and CPU usage across a conversion
///
/// Reads `/proc/self/statm` and `/proc/self/stat` on Linux; on other
/// platforms all measurements are zero. Intended for per-task resource
/// accounting in history records, not precise profiling.
#[derive(Debug)]
pub struct ResourceTracker {
    started: Instant,
    start_rss_bytes: u64,
    start_cpu_ticks: u64,
}

impl ResourceTracker {
    /// Snapshot the current resource usage as the baseline
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            start_rss_bytes: read_rss_bytes(),
            start_cpu_ticks: read_cpu_ticks(),
        }
    }

    /// Resident memory growth since [`start`](Self::start), in MB
    ///
    /// Clamped at zero: freed memory reports as 0.0 rather than negative.
    pub fn memory_delta_mb(&self) -> f64 {
        let now = read_rss_bytes();
        now.saturating_sub(self.start_rss_bytes) as f64 / (1024.0 * 1024.0)
    }

    /// Average CPU usage since [`start`](Self::start), in percent
    pub fn cpu_percent(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        let ticks = read_cpu_ticks().saturating_sub(self.start_cpu_ticks);
        let cpu_secs = ticks as f64 / clock_ticks_per_sec();
        (cpu_secs / elapsed) * 100.0
    }
}

#[cfg(target_os = "linux")]
fn read_rss_bytes() -> u64 {
    // /proc/self/statm: size resident shared text lib data dt (in pages)
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return 0;
    };
    let resident_pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    resident_pages * page_size()
}

#[cfg(target_os = "linux")]
fn read_cpu_ticks() -> u64 {
    // /proc/self/stat: fields 14 (utime) and 15 (stime), counted after the
    // parenthesized comm field which may itself contain spaces
    let Ok(stat) = std::fs::read_to_string("/proc/self/stat") else {
        return 0;
    };
    let Some(after_comm) = stat.rsplit(')').next() else {
        return 0;
    };
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // after_comm starts at field 3 (state), so utime/stime are at index 11/12
    let utime: u64 = fields.get(11).and_then(|s| s.parse().ok()).unwrap_or(0);
    let stime: u64 = fields.get(12).and_then(|s| s.parse().ok()).unwrap_or(0);
    utime + stime
}

#[cfg(target_os = "linux")]
fn page_size() -> u64 {
    4096
}

#[cfg(target_os = "linux")]
fn clock_ticks_per_sec() -> f64 {
    100.0
}

#[cfg(not(target_os = "linux"))]
fn read_rss_bytes() -> u64 {
    0
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_ticks() -> u64 {
    0
}

#[cfg(not(target_os = "linux"))]
fn clock_ticks_per_sec() -> f64 {
    100.0
}
