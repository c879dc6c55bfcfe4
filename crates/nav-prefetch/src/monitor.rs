//! Prefetch Performance Monitor
//!
//! Counters for prefetch attempts and navigation interception, plus an
//! optional tuner that moves the prediction confidence floor.

use crate::clock::Millis;
use crate::config::MonitorConfig;
use serde::Serialize;
use tracing::info;

/// Point-in-time metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub total_prefetches: u64,
    pub successful_prefetches: u64,
    pub failed_prefetches: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// `cache_hits / (cache_hits + cache_misses)`, 0 with no navigations
    pub hit_rate: f64,
    /// `successful_prefetches / total_prefetches`, 0 with no attempts
    pub success_rate: f64,
    /// Mean latency of successful prefetches
    pub avg_load_time_ms: f64,
    pub cache_size: usize,
    pub resource_usage_bytes: usize,
}

impl Metrics {
    /// Navigations observed at interception
    pub fn navigations(&self) -> u64 {
        self.cache_hits + self.cache_misses
    }

    /// Share of stored prefetches that were later used
    pub fn precision(&self) -> f64 {
        ratio(self.cache_hits, self.successful_prefetches).min(1.0)
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Performance monitor
#[derive(Debug)]
pub struct PerformanceMonitor {
    config: MonitorConfig,
    total: u64,
    successful: u64,
    failed: u64,
    hits: u64,
    misses: u64,
    avg_load_time_ms: f64,
    last_report_ms: Option<Millis>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            total: 0,
            successful: 0,
            failed: 0,
            hits: 0,
            misses: 0,
            avg_load_time_ms: 0.0,
            last_report_ms: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn record_attempt(&mut self) {
        self.total += 1;
    }

    /// Successful prefetch; folds the latency into the running mean
    pub fn record_success(&mut self, load_time_ms: u64) {
        self.successful += 1;
        let n = self.successful as f64;
        self.avg_load_time_ms += (load_time_ms as f64 - self.avg_load_time_ms) / n;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn record_cache_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_cache_miss(&mut self) {
        self.misses += 1;
    }

    /// Metrics with the current cache figures filled in
    pub fn snapshot(&self, cache_size: usize, resource_usage_bytes: usize) -> Metrics {
        Metrics {
            total_prefetches: self.total,
            successful_prefetches: self.successful,
            failed_prefetches: self.failed,
            cache_hits: self.hits,
            cache_misses: self.misses,
            hit_rate: ratio(self.hits, self.hits + self.misses),
            success_rate: ratio(self.successful, self.total),
            avg_load_time_ms: self.avg_load_time_ms,
            cache_size,
            resource_usage_bytes,
        }
    }

    /// Log `metrics` if a report interval has elapsed. Returns whether it did.
    pub fn maybe_report(&mut self, metrics: &Metrics, now: Millis) -> bool {
        let due = match self.last_report_ms {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.config.report_interval_ms,
        };
        if !due {
            return false;
        }
        self.last_report_ms = Some(now);
        info!(
            total = metrics.total_prefetches,
            successful = metrics.successful_prefetches,
            hits = metrics.cache_hits,
            misses = metrics.cache_misses,
            hit_rate = format_args!("{:.2}", metrics.hit_rate),
            avg_load_ms = format_args!("{:.1}", metrics.avg_load_time_ms),
            cache_entries = metrics.cache_size,
            usage_bytes = metrics.resource_usage_bytes,
            "prefetch metrics"
        );
        true
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

/// Counters at the start of a tuning window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Window {
    hits: u64,
    misses: u64,
    successful: u64,
}

impl Window {
    fn of(metrics: &Metrics) -> Self {
        Self {
            hits: metrics.cache_hits,
            misses: metrics.cache_misses,
            successful: metrics.successful_prefetches,
        }
    }
}

/// Moves the prediction confidence floor from observed prefetch precision.
///
/// Each decision looks only at what happened since the previous one, so a
/// floor moves at most once per `min_samples` navigations.
#[derive(Debug, Clone)]
pub struct AdaptiveTuner {
    config: MonitorConfig,
    floor: f64,
    ceiling: f64,
    window: Window,
}

impl AdaptiveTuner {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            floor: 0.1,
            ceiling: 0.9,
            window: Window::default(),
        }
    }

    /// New confidence floor, or `None` when it should stay put.
    ///
    /// Wasted prefetches raise the floor, well-used ones lower it. A window
    /// closes once it holds `min_samples` navigations and at least one
    /// stored prefetch; the next one starts from the counters seen here.
    pub fn adjust(&mut self, current: f64, metrics: &Metrics) -> Option<f64> {
        if !self.config.adaptive_tuning {
            return None;
        }

        let start = self.window;
        let hits = metrics.cache_hits.saturating_sub(start.hits);
        let misses = metrics.cache_misses.saturating_sub(start.misses);
        let successful = metrics.successful_prefetches.saturating_sub(start.successful);
        if hits + misses < self.config.min_samples || successful == 0 {
            return None;
        }
        self.window = Window::of(metrics);

        let precision = ratio(hits, successful).min(1.0);
        let target = if precision < self.config.low_precision {
            current + self.config.tuning_step
        } else if precision > self.config.high_precision {
            current - self.config.tuning_step
        } else {
            return None;
        };

        let next = target.clamp(self.floor, self.ceiling);
        ((next - current).abs() > f64::EPSILON).then_some(next)
    }
}
