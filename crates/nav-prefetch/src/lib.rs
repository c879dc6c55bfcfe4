//! Predictive Navigation Prefetch
//!
//! Observes browsing behavior on the directory site, predicts the next page,
//! and speculatively fetches it under concurrency and memory budgets so that
//! navigation can be served instantly from memory.
//!
//! # Architecture
//!
//! ```text
//! DOM signals ──> TriggerScheduler ──> PrefetchExecutor ──> ResourceCache
//!                                           ^                     │
//!   BehaviorTracker ──> PredictionEngine ───┘                     v
//!                                                     NavigationRenderer
//! ```
//!
//! Everything runs on one thread. Prefetches are tasks on the engine's
//! [`Background`] executor, so starting one never blocks a navigation.
//! Shared state is borrowed only between `.await` points, so no locking is
//! involved.

pub mod background;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod hints;
pub mod monitor;
pub mod navigation;
pub mod page;
pub mod prediction;
pub mod tracker;
pub mod trigger;

pub use background::Background;
pub use cache::{CacheEntry, CacheStats, EvictionReport, ResourceCache};
pub use clock::{Clock, ManualClock, Millis, Sleep, SystemClock};
pub use config::{
    CacheConfig, EngineConfig, ExecutorConfig, MonitorConfig, PredictionConfig, TrackerConfig,
    TriggerConfig,
};
pub use engine::{MaintenanceReport, PrefetchEngine};
pub use error::{CacheConsistencyError, ConfigError, PredictionUnavailable, PrefetchError};
pub use executor::{PrefetchExecutor, PrefetchOutcome, SkipReason};
pub use fetch::{FetchError, FetchRequest, FetchResponse, Fetcher, Method};
pub use hints::{ResourceHint, ResourceKind, SecondaryScanner};
pub use monitor::{AdaptiveTuner, Metrics, PerformanceMonitor};
pub use navigation::{
    NavigationOutcome, NavigationRenderer, NavigationReport, NavigationState, Navigator,
    RenderSource, RenderedView,
};
pub use page::PageType;
pub use prediction::{Prediction, PredictionEngine, PredictionSource};
pub use tracker::{
    Affinity, BehaviorTracker, InteractionData, InteractionEvent, InteractionKind,
    NavigationEvent, NavigationMetadata, SearchEvent, SequenceKey, SequencePattern, UserProfile,
};
pub use trigger::{
    DomSignal, EventSource, PrefetchTask, SignalEffect, SignalQueue, TaskState, Trigger,
    TriggerKey, TriggerScheduler,
};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        Background, Clock, DomSignal, EngineConfig, Fetcher, ManualClock, NavigationMetadata, Navigator,
        PageType, PrefetchEngine, PrefetchOutcome, SystemClock,
    };
}
