//! Reduces worker-reported job counters into a snapshot that is always safe
//! to render.

use crate::models::job::JobStatus;
use crate::models::snapshot::DisplaySnapshot;

/// Derive the display snapshot for one status. Pure and deterministic.
///
/// - percent is clamped to 0..=100; NaN and infinities read as 0
/// - a running job's percent is floored so it only reads 100 once terminal
/// - a missing percent is derived from `completed / total`
/// - missing counters read as 0
/// - counters are clamped so `completed <= total` and
///   `successful + failed <= completed` whenever `total > 0`
pub fn summarize(status: &JobStatus) -> DisplaySnapshot {
    let total = status.total_count.unwrap_or(0);
    let mut completed = status.completed_count.unwrap_or(0);
    let mut successful = status.successful_count.unwrap_or(0);
    let mut failed = status.failed_count.unwrap_or(0);

    if total > 0 {
        completed = completed.min(total);
        successful = successful.min(completed);
        failed = failed.min(completed - successful);
    }

    let raw_percent = match status.progress_percent {
        Some(p) => p,
        None if total > 0 => completed as f64 * 100.0 / total as f64,
        None => 0.0,
    };

    let is_terminal = status.state.is_terminal();

    DisplaySnapshot {
        state: status.state,
        percent: clamp_percent(raw_percent, is_terminal),
        completed,
        total,
        successful,
        failed,
        current_item: non_blank(status.current_item_label.as_deref()),
        message: non_blank(status.message.as_deref()),
        is_terminal,
        results: status.results.clone(),
    }
}

fn clamp_percent(value: f64, is_terminal: bool) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    let value = if is_terminal { value.round() } else { value.floor() };
    value.clamp(0.0, 100.0) as u8
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
