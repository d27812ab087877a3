//! Logger setup and formatting helpers for run summaries.

use std::time::Duration;

/// Install `env_logger` with an `info` default, overridable through `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .try_init();
}

/// Formats a duration in human-readable form ("45s", "2m 15s", "1h 30m").
///
/// Sub-second durations are shown in milliseconds.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let remaining_secs = secs % 60;
        if remaining_secs == 0 { format!("{mins}m") } else { format!("{mins}m {remaining_secs}s") }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 { format!("{hours}h") } else { format!("{hours}h {mins}m") }
    }
}

/// Formats a processing rate, e.g. "1.25M halos/s".
#[must_use]
pub fn format_rate(count: usize, duration: Duration, unit: &str) -> String {
    let secs = duration.as_secs_f64();
    if secs <= 0.0 {
        return format!("- {unit}/s");
    }
    let rate = count as f64 / secs;
    if rate >= 1_000_000.0 {
        format!("{:.2}M {unit}/s", rate / 1_000_000.0)
    } else if rate >= 1_000.0 {
        format!("{:.1}K {unit}/s", rate / 1_000.0)
    } else {
        format!("{rate:.0} {unit}/s")
    }
}
