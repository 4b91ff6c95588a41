//! Shared helper utilities for the buffer store and control loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Granularity of interruptible sleeps in the control loops.
const SLEEP_SLICE: Duration = Duration::from_millis(500);

/// Current wall-clock time as fractional seconds since the Unix epoch.
///
/// Ledger timestamps use this representation so the persisted JSON stays
/// human-inspectable and comparable across processes.
pub fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// File modification time as fractional seconds since the Unix epoch.
///
/// Returns 0.0 when the filesystem cannot provide a timestamp, keeping
/// age-ordered eviction deterministic for reconciled entries.
pub fn mtime_epoch_secs(path: &std::path::Path) -> f64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Sleep for `duration`, waking early if `stop` is raised.
///
/// Returns `true` if the full duration elapsed, `false` if the stop flag
/// cut the sleep short. The loops use this so termination never has to wait
/// out a multi-minute backpressure delay.
pub fn sleep_with_stop(stop: &AtomicBool, duration: Duration) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let slice = remaining.min(SLEEP_SLICE);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    !stop.load(Ordering::Relaxed)
}
