//! Per-resource activity metrics for the adaptive rate limiter.
//!
//! Two bounded, ordered sequences of request timestamps (user and
//! background) plus a trend tag. The sequences live in process memory and
//! are pruned in place on each admission.

use serde::{Deserialize, Serialize};

/// Hard cap on retained samples per sequence; the monitoring window prune
/// keeps the working set far smaller in practice.
const MAX_SAMPLES: usize = 256;

/// Direction of recent user activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// No samples to judge.
    #[default]
    None,
    /// Activity is accelerating.
    Increasing,
    /// Activity is roughly even across the window.
    Stable,
    /// Activity is tailing off.
    Decreasing,
}

/// Activity samples for a single resource.
#[derive(Clone, Debug, Default)]
pub struct ActivityMetrics {
    user: Vec<i64>,
    background: Vec<i64>,
    /// The most recent user request ever seen. Survives pruning so
    /// sustained-inactivity detection can look past the window.
    last_user_ms: Option<i64>,
    /// Trend over the in-window user samples, refreshed by
    /// [`ActivityMetrics::prune`].
    pub trend: Trend,
}

impl ActivityMetrics {
    /// Fresh, empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a user request at `now_ms`.
    pub fn record_user(&mut self, now_ms: i64) {
        push_bounded(&mut self.user, now_ms);
        self.last_user_ms = Some(self.last_user_ms.map_or(now_ms, |last| last.max(now_ms)));
    }

    /// Records a background request at `now_ms`.
    pub fn record_background(&mut self, now_ms: i64) {
        push_bounded(&mut self.background, now_ms);
    }

    /// Drops samples older than the monitoring window and refreshes the
    /// trend tag.
    pub fn prune(&mut self, window_ms: i64, now_ms: i64) {
        let cutoff = now_ms - window_ms;
        self.user.retain(|&ts| ts >= cutoff);
        self.background.retain(|&ts| ts >= cutoff);
        self.trend = detect_trend(&self.user);
    }

    /// Count of user samples within the window ending at `now_ms`.
    pub fn recent_user_count(&self, window_ms: i64, now_ms: i64) -> u32 {
        count_in_window(&self.user, window_ms, now_ms)
    }

    /// Count of background samples within the window ending at `now_ms`.
    pub fn recent_background_count(&self, window_ms: i64, now_ms: i64) -> u32 {
        count_in_window(&self.background, window_ms, now_ms)
    }

    /// The most recent user request ever recorded, regardless of window
    /// and pruning.
    pub fn last_user_ms(&self) -> Option<i64> {
        self.last_user_ms
    }

    /// Whether any user sample is retained.
    pub fn has_user_activity(&self) -> bool {
        !self.user.is_empty()
    }

    /// Whether any background sample is retained.
    pub fn has_background_activity(&self) -> bool {
        !self.background.is_empty()
    }

    /// The retained user samples, oldest first.
    pub fn user_samples(&self) -> &[i64] {
        &self.user
    }

    /// The retained background samples, oldest first.
    pub fn background_samples(&self) -> &[i64] {
        &self.background
    }
}

fn push_bounded(samples: &mut Vec<i64>, now_ms: i64) {
    if samples.len() == MAX_SAMPLES {
        samples.remove(0);
    }
    samples.push(now_ms);
}

fn count_in_window(samples: &[i64], window_ms: i64, now_ms: i64) -> u32 {
    let cutoff = now_ms - window_ms;
    samples.iter().filter(|&&ts| ts >= cutoff).count() as u32
}

/// Detects the activity trend over an ordered timestamp sequence.
///
/// The sequence's time span is split at its midpoint and the sample counts
/// of the two halves compared: the second half exceeding the first by more
/// than 25% is `Increasing`, falling short by more than 25% is
/// `Decreasing`. Empty input is `None`.
pub fn detect_trend(samples: &[i64]) -> Trend {
    if samples.is_empty() {
        return Trend::None;
    }
    if samples.len() < 2 {
        return Trend::Stable;
    }
    let first_ts = samples[0];
    let last_ts = samples[samples.len() - 1];
    let midpoint = first_ts + (last_ts - first_ts) / 2;

    let first_half = samples.iter().filter(|&&ts| ts < midpoint).count() as f64;
    let second_half = samples.iter().filter(|&&ts| ts >= midpoint).count() as f64;

    if second_half > first_half * 1.25 {
        Trend::Increasing
    } else if second_half < first_half * 0.75 {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}
