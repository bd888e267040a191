//! Memory accounting for Lanczos runs.
//!
//! The dominant allocation of a run is its Krylov basis, `order * n` doubles. Callers bound
//! `order` from the memory they can spare per concurrent run with [`max_order_for_budget`],
//! and the experiment binaries report the observed process peak with [`get_peak_rss_kb`].

use std::mem::size_of;

/// Bytes held by the basis of one run.
pub fn basis_memory_bytes(n: usize, order: usize) -> usize {
    n.saturating_mul(order).saturating_mul(size_of::<f64>())
}

/// Largest order whose bases fit in `budget_bytes` when `concurrent_runs` execute at once.
pub fn max_order_for_budget(n: usize, concurrent_runs: usize, budget_bytes: usize) -> usize {
    let per_step = basis_memory_bytes(n, 1).saturating_mul(concurrent_runs.max(1));
    if per_step == 0 {
        return 0;
    }
    (budget_bytes / per_step).min(n)
}

/// Reads the peak virtual memory size (VmPeak) from /proc/self/status on Linux.
///
/// # Returns
/// The peak memory usage in kilobytes (KB), or 0 if the value cannot be read.
#[cfg(target_os = "linux")]
pub fn get_peak_rss_kb() -> u64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };
    status
        .lines()
        .find(|line| line.starts_with("VmPeak:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Peak memory is only read on Linux; other platforms report 0.
#[cfg(not(target_os = "linux"))]
pub fn get_peak_rss_kb() -> u64 {
    use std::sync::Once;
    static WARN_ONCE: Once = Once::new();
    WARN_ONCE.call_once(|| {
        log::warn!("Peak RSS measurement is only supported on Linux; returning 0.");
    });
    0
}
