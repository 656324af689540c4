//! # Utility Functions
//!
//! Small helpers shared by the harness and the result output: unique ids for
//! mutation markers, wall-clock timestamps and human-readable durations.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a unique identifier
///
/// Used to make every mutation marker distinct from the original file and
/// from the marker of any earlier run, even when two runs share a timestamp.
pub fn generate_test_id() -> String {
    Uuid::new_v4().to_string()
}

/// Milliseconds since the Unix epoch
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Format a duration in a human-readable way
///
/// - **Milliseconds**: < 1 s (e.g., "820ms")
/// - **Seconds**: < 60 s (e.g., "5.25s")
/// - **Minutes and Hours**: compound format (e.g., "1m 30s")
///
/// ```rust
/// # use devserver_bench::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_millis(820)), "820ms");
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();

    if total_ms < 1_000 {
        format!("{}ms", total_ms)
    } else if total_ms < 60_000 {
        format!("{:.2}s", total_ms as f64 / 1_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}
