//! Engine Configuration
//!
//! Every threshold, delay and budget the engine uses. All sections
//! deserialize with defaults for missing fields, so a config file only
//! needs to name what it overrides.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Behavior tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Navigation events kept in the rolling history
    pub history_size: usize,
    /// Page types per sequence pattern window
    pub sequence_length: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_size: 100,
            sequence_length: 5,
        }
    }
}

/// Prediction thresholds and profile heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Times a window must have been seen before its pattern is trusted
    pub min_occurrences: u32,
    /// Predictions below this confidence are dropped
    pub min_confidence: f64,
    /// Idle cycles only prefetch predictions at or above this confidence
    pub high_confidence: f64,
    /// Profile entries used per predicted page type
    pub top_n: usize,
    /// Category confidence is `min(count / divisor, cap)`
    pub category_divisor: f64,
    pub category_cap: f64,
    /// Search confidence is `min(count / divisor, cap)`
    pub search_divisor: f64,
    pub search_cap: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 3,
            min_confidence: 0.3,
            high_confidence: 0.7,
            top_n: 3,
            category_divisor: 10.0,
            category_cap: 0.8,
            search_divisor: 5.0,
            search_cap: 0.6,
        }
    }
}

/// Per-trigger delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub hover_delay_ms: u64,
    pub touch_delay_ms: u64,
    pub focus_delay_ms: u64,
    /// Prefetch links as soon as they become visible
    pub viewport_enabled: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            hover_delay_ms: 65,
            touch_delay_ms: 90,
            focus_delay_ms: 100,
            viewport_enabled: true,
        }
    }
}

/// Fetch execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Hard cap on prefetches in flight
    pub max_concurrent: usize,
    /// Timeout for speculative fetches
    pub fetch_timeout_ms: u64,
    /// Timeout for the foreground fetch after a cache miss
    pub navigation_timeout_ms: u64,
    /// Secondary resources hinted per prefetched document
    pub max_secondary_hints: usize,
    /// Images among those hints
    pub max_secondary_images: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            fetch_timeout_ms: 8_000,
            navigation_timeout_ms: 10_000,
            max_secondary_hints: 8,
            max_secondary_images: 3,
        }
    }
}

/// Cache budget and expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Ceiling on cached bytes
    pub memory_budget_bytes: usize,
    /// Entries older than this are swept
    pub max_age_ms: u64,
    /// How often maintenance sweeps expired entries
    pub cleanup_interval_ms: u64,
    /// Share of usage an aggressive cleanup reclaims at minimum
    pub eviction_target_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 50 * 1024 * 1024,
            max_age_ms: 10 * 60 * 1000,
            cleanup_interval_ms: 30_000,
            eviction_target_fraction: 0.5,
        }
    }
}

/// Metrics reporting and adaptive tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub report_interval_ms: u64,
    pub adaptive_tuning: bool,
    /// Navigations observed before tuning kicks in
    pub min_samples: u64,
    pub tuning_step: f64,
    /// Raise the confidence floor when prefetch precision drops below this
    pub low_precision: f64,
    /// Lower the confidence floor when prefetch precision exceeds this
    pub high_precision: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: 60_000,
            adaptive_tuning: true,
            min_samples: 20,
            tuning_step: 0.05,
            low_precision: 0.3,
            high_precision: 0.7,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Origin relative links are resolved against
    pub site_origin: String,
    pub tracker: TrackerConfig,
    pub prediction: PredictionConfig,
    pub trigger: TriggerConfig,
    pub executor: ExecutorConfig,
    pub cache: CacheConfig,
    pub monitor: MonitorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            site_origin: "http://localhost/".into(),
            tracker: TrackerConfig::default(),
            prediction: PredictionConfig::default(),
            trigger: TriggerConfig::default(),
            executor: ExecutorConfig::default(),
            cache: CacheConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_site_origin(mut self, origin: &str) -> Self {
        self.site_origin = origin.to_string();
        self
    }

    pub fn with_history_size(mut self, size: usize) -> Self {
        self.tracker.history_size = size;
        self
    }

    pub fn with_sequence_length(mut self, length: usize) -> Self {
        self.tracker.sequence_length = length;
        self
    }

    pub fn with_min_occurrences(mut self, count: u32) -> Self {
        self.prediction.min_occurrences = count;
        self
    }

    pub fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.prediction.min_confidence = confidence;
        self
    }

    pub fn with_high_confidence(mut self, confidence: f64) -> Self {
        self.prediction.high_confidence = confidence;
        self
    }

    pub fn with_hover_delay(mut self, ms: u64) -> Self {
        self.trigger.hover_delay_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.executor.max_concurrent = max;
        self
    }

    pub fn with_fetch_timeout(mut self, ms: u64) -> Self {
        self.executor.fetch_timeout_ms = ms;
        self
    }

    pub fn with_navigation_timeout(mut self, ms: u64) -> Self {
        self.executor.navigation_timeout_ms = ms;
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.cache.memory_budget_bytes = bytes;
        self
    }

    pub fn with_cache_ttl(mut self, ms: u64) -> Self {
        self.cache.max_age_ms = ms;
        self
    }

    pub fn with_cleanup_interval(mut self, ms: u64) -> Self {
        self.cache.cleanup_interval_ms = ms;
        self
    }

    /// Reject settings the engine cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if url::Url::parse(&self.site_origin).is_err() {
            return invalid("site_origin must be an absolute URL");
        }
        if self.tracker.history_size == 0 {
            return invalid("history_size must be at least 1");
        }
        if self.tracker.sequence_length == 0 {
            return invalid("sequence_length must be at least 1");
        }
        if self.tracker.sequence_length >= self.tracker.history_size {
            return invalid("sequence_length must be smaller than history_size");
        }
        for (name, value) in [
            ("min_confidence", self.prediction.min_confidence),
            ("high_confidence", self.prediction.high_confidence),
            ("category_cap", self.prediction.category_cap),
            ("search_cap", self.prediction.search_cap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must lie in [0, 1]")));
            }
        }
        if self.prediction.category_divisor <= 0.0 || self.prediction.search_divisor <= 0.0 {
            return invalid("profile divisors must be positive");
        }
        if self.executor.max_concurrent == 0 {
            return invalid("max_concurrent must be at least 1");
        }
        if self.executor.fetch_timeout_ms == 0 || self.executor.navigation_timeout_ms == 0 {
            return invalid("timeouts must be non-zero");
        }
        if self.cache.memory_budget_bytes == 0 {
            return invalid("memory_budget_bytes must be non-zero");
        }
        if !(self.cache.eviction_target_fraction > 0.0 && self.cache.eviction_target_fraction <= 1.0) {
            return invalid("eviction_target_fraction must lie in (0, 1]");
        }
        if self.monitor.low_precision > self.monitor.high_precision {
            return invalid("low_precision must not exceed high_precision");
        }
        Ok(())
    }
}
