//! Error types for the prefetch engine
//!
//! None of these reach the foreground navigation flow. Prefetch failures
//! are logged and dropped, consistency errors are repaired in place, and an
//! unavailable prediction falls back to profile heuristics.

use crate::fetch::FetchError;
use thiserror::Error;

/// A speculative fetch that did not produce a cache entry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PrefetchError {
    /// Non-2xx status or a rejected request
    #[error("Network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: FetchError,
    },

    /// The request outlived its timeout and was abandoned
    #[error("Prefetch of {url} timed out after {after_ms}ms")]
    Timeout { url: String, after_ms: u64 },
}

impl PrefetchError {
    pub fn url(&self) -> &str {
        match self {
            PrefetchError::Network { url, .. } | PrefetchError::Timeout { url, .. } => url,
        }
    }
}

/// The cache usage counter disagreed with the stored entries
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Cache usage counter {tracked} bytes diverged from stored total {actual} bytes")]
pub struct CacheConsistencyError {
    pub tracked: usize,
    pub actual: usize,
}

/// Why no trusted sequence prediction exists right now
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionUnavailable {
    #[error("History holds {have} page views, {need} needed")]
    InsufficientHistory { have: usize, need: usize },

    #[error("No pattern recorded for {key}")]
    UnknownPattern { key: String },

    #[error("Pattern {key} seen {seen} times, {need} needed")]
    TooFewOccurrences { key: String, seen: u32, need: u32 },

    #[error("No successor of {key} reached the confidence threshold")]
    BelowThreshold { key: String },
}

/// Invalid or unreadable engine configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
