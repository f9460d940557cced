//! Adaptive capacity allocation.
//!
//! A stateless calculator that splits a resource's total sliding-window
//! limit between user and background traffic based on recent activity.
//! Strategies are evaluated first-match-wins; every branch documents itself
//! through the allocation's `reason`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity::{detect_trend, ActivityMetrics, Trend};

/// Configuration for the adaptive allocator, validated once at store
/// construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Window over which activity is judged.
    #[serde(with = "humantime_serde")]
    pub monitoring_window: Duration,
    /// Minimum interval between capacity recomputations per resource.
    #[serde(with = "humantime_serde")]
    pub recalculation_interval: Duration,
    /// In-window user requests at or above which activity is "high".
    pub high_activity_threshold: u32,
    /// In-window user requests at or above which activity is "moderate".
    pub moderate_activity_threshold: u32,
    /// User idle time after which all capacity shifts to background.
    #[serde(with = "humantime_serde")]
    pub sustained_inactivity_threshold: Duration,
    /// Pause background entirely while user activity is high and rising.
    pub background_pause_on_increasing_trend: bool,
    /// User reservation scaling factor under high activity, ≥ 1.0.
    pub max_user_scaling: f64,
    /// Floor on the user reservation whenever users are quiet but not gone.
    pub min_user_reserved: u32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        AdaptiveConfig {
            monitoring_window: Duration::from_secs(60),
            recalculation_interval: Duration::from_secs(5),
            high_activity_threshold: 10,
            moderate_activity_threshold: 3,
            sustained_inactivity_threshold: Duration::from_secs(300),
            background_pause_on_increasing_trend: true,
            max_user_scaling: 1.5,
            min_user_reserved: 1,
        }
    }
}

/// Configuration rejected by [`AdaptiveConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdaptiveConfigError {
    #[error("high_activity_threshold must be strictly greater than moderate_activity_threshold")]
    ThresholdOrder,
    #[error("max_user_scaling must be at least 1.0")]
    UserScaling,
}

impl AdaptiveConfig {
    /// Enforces `high > moderate ≥ 0` and `max_user_scaling ≥ 1.0`.
    pub fn validate(&self) -> Result<(), AdaptiveConfigError> {
        if self.high_activity_threshold <= self.moderate_activity_threshold {
            return Err(AdaptiveConfigError::ThresholdOrder);
        }
        if self.max_user_scaling < 1.0 {
            return Err(AdaptiveConfigError::UserScaling);
        }
        Ok(())
    }
}

/// A capacity split for one resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityAllocation {
    /// Slots reserved for user-priority requests.
    pub user_reserved: u32,
    /// Slots available to background-priority requests.
    pub background_max: u32,
    /// Background requests are refused outright while set.
    pub background_paused: bool,
    /// Which strategy produced this allocation.
    pub reason: String,
}

impl CapacityAllocation {
    fn new(user_reserved: u32, total_limit: u32, background_paused: bool, reason: &str) -> Self {
        CapacityAllocation {
            user_reserved,
            background_max: total_limit.saturating_sub(user_reserved),
            background_paused,
            reason: reason.to_owned(),
        }
    }
}

/// Computes the capacity split for a resource.
///
/// Pure over its inputs; callers cache the result and recompute at most
/// once per [`AdaptiveConfig::recalculation_interval`].
pub fn calculate(
    total_limit: u32,
    metrics: &ActivityMetrics,
    cfg: &AdaptiveConfig,
    now_ms: i64,
) -> CapacityAllocation {
    let window_ms = cfg.monitoring_window.as_millis() as i64;
    let recent_user = metrics.recent_user_count(window_ms, now_ms);
    let min_user = cfg.min_user_reserved.min(total_limit);

    if recent_user == 0 {
        if let Some(last_user) = metrics.last_user_ms() {
            let idle_ms = now_ms - last_user;
            if idle_ms >= cfg.sustained_inactivity_threshold.as_millis() as i64 {
                return CapacityAllocation::new(
                    0,
                    total_limit,
                    false,
                    "sustained user inactivity: full capacity to background",
                );
            }
            return CapacityAllocation::new(
                min_user,
                total_limit,
                false,
                "no recent user activity: minimum user reservation held",
            );
        }
        if metrics.has_background_activity() {
            return CapacityAllocation::new(
                min_user,
                total_limit,
                false,
                "background-only workload: minimum user reservation held",
            );
        }
        let user_reserved = (total_limit as f64 * 0.3).floor() as u32;
        return CapacityAllocation::new(
            user_reserved,
            total_limit,
            false,
            "initial state: default 30% user reservation",
        );
    }

    let trend = trend_in_window(metrics, window_ms, now_ms);

    if recent_user >= cfg.high_activity_threshold {
        let scaled = (total_limit as f64 * cfg.max_user_scaling * 0.7).floor() as u32;
        let user_reserved = scaled.min(total_limit);
        let background_paused =
            cfg.background_pause_on_increasing_trend && trend == Trend::Increasing;
        return CapacityAllocation::new(
            user_reserved,
            total_limit,
            background_paused,
            "high user activity: scaled user reservation",
        );
    }

    if recent_user >= cfg.moderate_activity_threshold {
        let span = (cfg.high_activity_threshold - cfg.moderate_activity_threshold).max(1) as f64;
        let progress = (recent_user - cfg.moderate_activity_threshold) as f64 / span;
        let mut fraction = (0.4 + 0.3 * progress).min(0.7);
        if trend == Trend::Decreasing {
            fraction *= 0.8;
        }
        let user_reserved = ((total_limit as f64 * fraction).floor() as u32)
            .clamp(min_user, total_limit);
        return CapacityAllocation::new(
            user_reserved,
            total_limit,
            false,
            "moderate user activity: proportional user reservation",
        );
    }

    CapacityAllocation::new(
        min_user,
        total_limit,
        false,
        "low user activity: minimum user reservation",
    )
}

/// Trend over only the in-window user samples.
fn trend_in_window(metrics: &ActivityMetrics, window_ms: i64, now_ms: i64) -> Trend {
    let cutoff = now_ms - window_ms;
    let samples = metrics.user_samples();
    let start = samples.partition_point(|&ts| ts < cutoff);
    detect_trend(&samples[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AdaptiveConfig {
        AdaptiveConfig {
            high_activity_threshold: 5,
            moderate_activity_threshold: 2,
            ..AdaptiveConfig::default()
        }
    }

    fn user_metrics(timestamps: &[i64]) -> ActivityMetrics {
        let mut metrics = ActivityMetrics::new();
        for &ts in timestamps {
            metrics.record_user(ts);
        }
        metrics
    }

    #[test]
    fn validation_enforces_threshold_order() {
        let mut bad = cfg();
        bad.moderate_activity_threshold = 5;
        assert_eq!(bad.validate(), Err(AdaptiveConfigError::ThresholdOrder));
        let mut bad = cfg();
        bad.max_user_scaling = 0.5;
        assert_eq!(bad.validate(), Err(AdaptiveConfigError::UserScaling));
        assert!(cfg().validate().is_ok());
    }

    #[test]
    fn sustained_inactivity_gives_everything_to_background() {
        let now = 10_000_000;
        let metrics = user_metrics(&[now - 600_000]);
        let allocation = calculate(10, &metrics, &cfg(), now);
        assert_eq!(allocation.user_reserved, 0);
        assert_eq!(allocation.background_max, 10);
        assert!(!allocation.background_paused);
    }

    #[test]
    fn recent_zero_but_not_sustained_keeps_minimum() {
        let now = 10_000_000;
        let metrics = user_metrics(&[now - 120_000]);
        let allocation = calculate(10, &metrics, &cfg(), now);
        assert_eq!(allocation.user_reserved, 1);
        assert_eq!(allocation.background_max, 9);
    }

    #[test]
    fn background_only_workload_keeps_minimum_reservation() {
        let mut metrics = ActivityMetrics::new();
        metrics.record_background(9_000);
        let allocation = calculate(10, &metrics, &cfg(), 10_000);
        assert_eq!(allocation.user_reserved, 1);
        assert_eq!(allocation.background_max, 9);
    }

    #[test]
    fn initial_state_reserves_thirty_percent() {
        let allocation = calculate(10, &ActivityMetrics::new(), &cfg(), 10_000);
        assert_eq!(allocation.user_reserved, 3);
        assert_eq!(allocation.background_max, 7);
    }

    #[test]
    fn high_activity_scales_and_caps_user_reservation() {
        let now = 10_000_000;
        let mut config = cfg();
        config.max_user_scaling = 2.0;
        // Six recent requests, accelerating.
        let metrics = user_metrics(&[
            now - 50_000,
            now - 4_000,
            now - 3_000,
            now - 2_000,
            now - 1_000,
            now - 500,
        ]);
        let allocation = calculate(10, &metrics, &config, now);
        // floor(10 * 2.0 * 0.7) = 14, capped at the total limit.
        assert_eq!(allocation.user_reserved, 10);
        assert_eq!(allocation.background_max, 0);
        assert!(allocation.background_paused);
    }

    #[test]
    fn high_activity_without_increasing_trend_keeps_background() {
        let now = 10_000_000;
        let mut config = cfg();
        config.max_user_scaling = 1.0;
        // Evenly spread: stable trend.
        let metrics = user_metrics(&[
            now - 50_000,
            now - 40_000,
            now - 30_000,
            now - 20_000,
            now - 10_000,
            now - 100,
        ]);
        let allocation = calculate(10, &metrics, &config, now);
        assert_eq!(allocation.user_reserved, 7);
        assert_eq!(allocation.background_max, 3);
        assert!(!allocation.background_paused);
    }

    #[test]
    fn moderate_activity_scales_between_forty_and_seventy_percent() {
        let now = 10_000_000;
        // Three in-window requests with moderate=2, high=5.
        let metrics = user_metrics(&[now - 30_000, now - 20_000, now - 10_000]);
        let allocation = calculate(100, &metrics, &cfg(), now);
        // fraction = 0.4 + 0.3 * (3-2)/3 = 0.5
        assert_eq!(allocation.user_reserved, 50);
        assert_eq!(allocation.background_max, 50);
        assert!(!allocation.background_paused);
    }

    #[test]
    fn moderate_activity_with_decreasing_trend_reduces_reservation() {
        let now = 10_000_000;
        // Burst long ago, single recent request: decreasing.
        let metrics = user_metrics(&[
            now - 50_000,
            now - 49_000,
            now - 48_000,
            now - 1_000,
        ]);
        let allocation = calculate(100, &metrics, &cfg(), now);
        // fraction = (0.4 + 0.3 * 2/3) * 0.8 = 0.48
        assert_eq!(allocation.user_reserved, 48);
    }

    #[test]
    fn low_activity_keeps_minimum_reservation() {
        let now = 10_000_000;
        let metrics = user_metrics(&[now - 1_000]);
        let allocation = calculate(10, &metrics, &cfg(), now);
        assert_eq!(allocation.user_reserved, 1);
        assert_eq!(allocation.background_max, 9);
    }

    #[test]
    fn split_never_exceeds_total_limit() {
        let now = 10_000_000;
        let scenarios: Vec<ActivityMetrics> = vec![
            ActivityMetrics::new(),
            user_metrics(&[now - 600_000]),
            user_metrics(&[now - 120_000]),
            user_metrics(&[now - 1_000]),
            user_metrics(&[now - 3_000, now - 2_000, now - 1_000]),
            user_metrics(&[
                now - 5_000,
                now - 4_000,
                now - 3_000,
                now - 2_000,
                now - 1_000,
                now - 500,
            ]),
        ];
        for total in [0u32, 1, 3, 10, 100] {
            for metrics in &scenarios {
                let allocation = calculate(total, metrics, &cfg(), now);
                assert!(
                    allocation.user_reserved + allocation.background_max <= total,
                    "user={} background={} total={} reason={}",
                    allocation.user_reserved,
                    allocation.background_max,
                    total,
                    allocation.reason
                );
                assert!(allocation.background_max <= total);
            }
        }
    }
}
