//! Prefetch Engine
//!
//! Owns one instance of every component and wires them together. Hosts
//! create one engine per page session and feed it navigations, DOM signals
//! and timer ticks.
//!
//! Prefetches started by signals, ticks and idle cycles run on the
//! engine's background executor. Hosts drive it with `poll_background`
//! from their event loop, or await `run_until_idle`.

use crate::background::Background;
use crate::cache::EvictionReport;
use crate::clock::{Clock, Millis};
use crate::config::EngineConfig;
use crate::error::{CacheConsistencyError, ConfigError};
use crate::executor::{PrefetchExecutor, PrefetchOutcome};
use crate::fetch::Fetcher;
use crate::monitor::{AdaptiveTuner, Metrics};
use crate::navigation::{NavigationRenderer, NavigationReport, Navigator};
use crate::page::PageType;
use crate::prediction::{Prediction, PredictionEngine};
use crate::tracker::{BehaviorTracker, InteractionData, InteractionKind, NavigationMetadata};
use crate::trigger::{DomSignal, EventSource, PrefetchTask, SignalEffect, Trigger, TriggerScheduler};
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// What one maintenance pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    /// Expired entries removed; `None` when the sweep interval had not elapsed
    pub swept: Option<usize>,
    pub eviction: Option<EvictionReport>,
    /// Usage counter drift found and repaired
    pub repaired: Option<CacheConsistencyError>,
    pub reported: bool,
    /// New prediction confidence floor, if tuning moved it
    pub min_confidence: Option<f64>,
}

/// Predictive prefetch engine
pub struct PrefetchEngine<F> {
    config: EngineConfig,
    clock: Rc<dyn Clock>,
    tracker: BehaviorTracker,
    predictor: PredictionEngine,
    scheduler: TriggerScheduler,
    executor: PrefetchExecutor<F>,
    background: Rc<Background>,
    renderer: NavigationRenderer<F>,
    tuner: AdaptiveTuner,
    /// Tasks fired by signals, waiting for the next tick
    ready: Vec<PrefetchTask>,
    last_sweep_ms: Millis,
}

impl<F: Fetcher + 'static> PrefetchEngine<F> {
    pub fn new(
        config: EngineConfig,
        clock: Rc<dyn Clock>,
        fetcher: F,
        navigator: Rc<dyn Navigator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let now = clock.now_ms();
        let executor = PrefetchExecutor::new(&config, fetcher, Rc::clone(&clock))?;
        executor.set_current_url(&navigator.current_url());
        let background = Rc::new(Background::new());
        let renderer = NavigationRenderer::new(
            executor.clone(),
            Rc::clone(&background),
            navigator,
            Rc::clone(&clock),
        );
        let scheduler = TriggerScheduler::new(config.trigger.clone()).with_base(executor.base().clone());

        debug!(origin = %config.site_origin, "prefetch engine created");
        Ok(Self {
            tracker: BehaviorTracker::new(config.tracker.clone(), now),
            predictor: PredictionEngine::new(config.prediction.clone()),
            scheduler,
            tuner: AdaptiveTuner::new(config.monitor.clone()),
            executor,
            background,
            renderer,
            ready: Vec::new(),
            last_sweep_ms: now,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &BehaviorTracker {
        &self.tracker
    }

    pub fn scheduler(&self) -> &TriggerScheduler {
        &self.scheduler
    }

    pub fn executor(&self) -> &PrefetchExecutor<F> {
        &self.executor
    }

    pub fn background(&self) -> &Rc<Background> {
        &self.background
    }

    /// Current prediction confidence floor
    pub fn min_confidence(&self) -> f64 {
        self.predictor.min_confidence()
    }

    fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    // ---- Tracking ----

    /// Record a page view that happened outside `navigate`
    pub fn track_navigation(&mut self, url: &str, metadata: &NavigationMetadata) -> PageType {
        let now = self.now();
        self.executor.set_current_url(url);
        self.tracker.track_navigation(url, metadata, now)
    }

    pub fn track_search(
        &mut self,
        query: &str,
        results_count: usize,
        filters: BTreeMap<String, String>,
    ) -> Option<String> {
        let now = self.now();
        self.tracker.track_search(query, results_count, filters, now)
    }

    pub fn track_interaction(&mut self, target_id: &str, data: &InteractionData, kind: InteractionKind) {
        let now = self.now();
        self.tracker.track_interaction(target_id, data, kind, now);
    }

    pub fn end_session(&mut self) {
        let now = self.now();
        self.tracker.end_session(now);
        self.scheduler.clear();
        self.ready.clear();
    }

    // ---- Prefetching ----

    pub fn should_prefetch(&self, url: &str) -> bool {
        self.executor.should_prefetch(url)
    }

    pub async fn prefetch(&self, url: &str, confidence: f64, trigger: Trigger) -> PrefetchOutcome {
        self.executor.prefetch(url, confidence, trigger).await
    }

    /// Ranked predictions for the user's next page
    pub fn predictions(&self) -> Vec<Prediction> {
        self.predictor.predictions(&self.tracker)
    }

    pub fn metrics(&self) -> Metrics {
        self.executor.metrics()
    }

    /// Feed one DOM signal. Immediate fires are queued for the next `tick`.
    pub fn handle_signal(&mut self, signal: &DomSignal) -> SignalEffect {
        let effect = self.scheduler.handle(signal, self.now());
        if let SignalEffect::Fired(task) = &effect {
            self.ready.push(task.clone());
        }
        effect
    }

    /// Feed one signal and start whatever is due
    pub fn on_signal(&mut self, signal: &DomSignal) -> Vec<PrefetchOutcome> {
        self.handle_signal(signal);
        self.tick()
    }

    /// Drain an event source. Returns how many signals were handled.
    pub fn pump_events(&mut self, source: &mut dyn EventSource) -> usize {
        let mut handled = 0;
        while let Some(signal) = source.next_signal() {
            self.handle_signal(&signal);
            handled += 1;
        }
        handled
    }

    /// Start every fired or due task in the background. Returns `Started`
    /// or `Skipped` per task; final outcomes come from `poll_background` or
    /// `run_until_idle`.
    pub fn tick(&mut self) -> Vec<PrefetchOutcome> {
        let mut tasks = std::mem::take(&mut self.ready);
        tasks.extend(self.scheduler.poll_due(self.now()));
        if tasks.is_empty() {
            return Vec::new();
        }
        self.executor.dispatch_all(tasks, &self.background)
    }

    /// Run background prefetches that can progress without waiting and
    /// return the outcomes of those that finished
    pub fn poll_background(&self) -> Vec<PrefetchOutcome> {
        self.background.poll()
    }

    /// Drive every background prefetch to completion
    pub async fn run_until_idle(&self) -> Vec<PrefetchOutcome> {
        self.background.run_until_idle().await
    }

    /// Prefetch predicted destinations at or above the high confidence mark
    pub fn run_idle_cycle(&mut self) -> Vec<PrefetchOutcome> {
        let threshold = self.config.prediction.high_confidence;
        let mut seen = HashSet::new();
        let tasks: Vec<PrefetchTask> = self
            .predictions()
            .into_iter()
            .filter(|p| p.confidence >= threshold)
            .flat_map(|p| {
                let confidence = p.confidence;
                p.urls
                    .into_iter()
                    .map(move |url| PrefetchTask::new(&url, Trigger::Prediction, confidence))
            })
            .filter(|task| seen.insert(task.url.clone()))
            .filter(|task| self.executor.should_prefetch(&task.url))
            .collect();

        if tasks.is_empty() {
            return Vec::new();
        }
        debug!(count = tasks.len(), threshold, "idle prefetch of predictions");
        self.executor.dispatch_all(tasks, &self.background)
    }

    // ---- Navigation ----

    /// Record the page view, then render it from cache or network.
    /// Timers armed on the previous page are dropped; prefetches already
    /// running keep going.
    pub async fn navigate(&mut self, url: &str, metadata: &NavigationMetadata) -> NavigationReport {
        let now = self.now();
        self.tracker.track_navigation(url, metadata, now);
        self.scheduler.clear();
        self.ready.clear();
        self.renderer.navigate(url).await
    }

    // ---- Maintenance ----

    /// Periodic upkeep: TTL sweep, budget enforcement, consistency check,
    /// metrics report and confidence tuning
    pub fn maintain(&mut self) -> MaintenanceReport {
        let now = self.now();
        let mut report = MaintenanceReport::default();

        if now.saturating_sub(self.last_sweep_ms) >= self.config.cache.cleanup_interval_ms {
            report.swept = Some(self.executor.sweep_expired());
            self.last_sweep_ms = now;
        }

        report.eviction = self.executor.enforce_budget();
        if let Err(err) = self.executor.verify_cache() {
            warn!(%err, "repaired cache usage counter");
            report.repaired = Some(err);
        }

        report.reported = self.executor.maybe_report();

        let metrics = self.executor.metrics();
        let current = self.predictor.min_confidence();
        if let Some(next) = self.tuner.adjust(current, &metrics) {
            info!(from = current, to = next, precision = metrics.precision(), "confidence floor tuned");
            self.predictor.set_min_confidence(next);
            report.min_confidence = Some(next);
        }

        report
    }

    /// Change the cache budget; lowering it evicts immediately
    pub fn set_memory_budget(&mut self, bytes: usize) -> Option<EvictionReport> {
        self.config.cache.memory_budget_bytes = bytes;
        self.executor.set_memory_budget(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fetch::{FetchError, FetchRequest, FetchResponse};
    use crate::navigation::RenderedView;
    use crate::trigger::SignalQueue;
    use std::cell::RefCell;

    struct EchoFetcher {
        requests: RefCell<Vec<String>>,
    }

    impl Fetcher for EchoFetcher {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
            self.requests.borrow_mut().push(request.url.clone());
            Ok(FetchResponse::html(&format!("<p>{}</p>", request.url)))
        }
    }

    struct NullNavigator;

    impl Navigator for NullNavigator {
        fn current_url(&self) -> String {
            "/".into()
        }
        fn render(&self, _view: &RenderedView) {}
        fn push_state(&self, _url: &str) {}
        fn full_reload(&self, _url: &str) {}
    }

    fn engine(config: EngineConfig) -> (PrefetchEngine<EchoFetcher>, ManualClock) {
        let clock = ManualClock::new(0);
        let engine = PrefetchEngine::new(
            config.with_site_origin("https://dir.example.com/"),
            Rc::new(clock.clone()),
            EchoFetcher {
                requests: RefCell::new(Vec::new()),
            },
            Rc::new(NullNavigator),
        )
        .unwrap();
        (engine, clock)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = PrefetchEngine::new(
            EngineConfig::default().with_max_concurrent(0),
            Rc::new(ManualClock::new(0)),
            EchoFetcher {
                requests: RefCell::new(Vec::new()),
            },
            Rc::new(NullNavigator),
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_home_is_current_location() {
        let (engine, _) = engine(EngineConfig::default());
        assert!(!engine.should_prefetch("/"));
        assert!(engine.should_prefetch("/explore"));
    }

    #[test]
    fn test_hover_prefetch_through_tick() {
        let (mut engine, clock) = engine(EngineConfig::default());
        engine.handle_signal(&DomSignal::MouseOver { url: "/business/7".into() });

        clock.advance(30);
        assert!(engine.tick().is_empty());

        clock.advance(40);
        let outcomes = engine.tick();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_started());
        assert!(engine.executor().is_in_flight("/business/7"));

        let finished = engine.poll_background();
        assert_eq!(finished.len(), 1);
        assert!(finished[0].is_stored());
        assert!(!engine.should_prefetch("/business/7"));
    }

    #[test]
    fn test_mousedown_starts_on_signal() {
        let (mut engine, _) = engine(EngineConfig::default());
        let outcomes = engine.on_signal(&DomSignal::MouseDown { url: "/explore".into() });
        assert!(outcomes[0].is_started());

        let finished = smol::block_on(engine.run_until_idle());
        assert!(finished[0].is_stored());
        assert!(engine.background().is_idle());
    }

    #[test]
    fn test_signal_urls_normalized_for_cancel() {
        let (mut engine, clock) = engine(EngineConfig::default());
        engine.handle_signal(&DomSignal::MouseOver { url: "/business/3".into() });
        engine.handle_signal(&DomSignal::MouseOut {
            url: "https://dir.example.com/business/3".into(),
        });

        clock.advance(1_000);
        assert!(engine.tick().is_empty());
        assert!(engine.executor().fetcher().requests.borrow().is_empty());
    }

    #[test]
    fn test_pump_events() {
        let (mut engine, _) = engine(EngineConfig::default());
        let mut queue = SignalQueue::new();
        queue.push(DomSignal::MouseOver { url: "/a".into() });
        queue.push(DomSignal::MouseOut { url: "/a".into() });
        queue.push(DomSignal::Focus { url: "/b".into() });

        assert_eq!(engine.pump_events(&mut queue), 3);
        assert!(queue.is_empty());
        assert_eq!(engine.scheduler().pending_len(), 1);
    }

    #[test]
    fn test_navigate_clears_pending_timers() {
        let (mut engine, _) = engine(EngineConfig::default());
        engine.handle_signal(&DomSignal::MouseOver { url: "/a".into() });
        smol::block_on(engine.navigate("/explore", &NavigationMetadata::default()));

        assert_eq!(engine.scheduler().pending_len(), 0);
        assert_eq!(engine.tracker().history().len(), 1);
    }

    #[test]
    fn test_idle_cycle_uses_high_confidence_only() {
        let (mut engine, clock) = engine(EngineConfig::default().with_sequence_length(1));
        for _ in 0..4 {
            for url in ["/", "/explore"] {
                engine.track_navigation(url, &NavigationMetadata::default());
                clock.advance(1_000);
            }
        }
        engine.track_navigation("/", &NavigationMetadata::default());

        let outcomes = engine.run_idle_cycle();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].url(), "https://dir.example.com/explore");

        // in flight, then cached: nothing left to do either way
        assert!(engine.run_idle_cycle().is_empty());
        smol::block_on(engine.run_until_idle());
        assert!(engine.run_idle_cycle().is_empty());
    }

    #[test]
    fn test_maintain_sweeps_on_interval() {
        let (mut engine, clock) = engine(EngineConfig::default().with_cache_ttl(1_000).with_cleanup_interval(5_000));
        smol::block_on(engine.prefetch("/explore", 0.9, Trigger::Mousedown));

        clock.advance(2_000);
        assert_eq!(engine.maintain().swept, None);

        clock.advance(3_000);
        let report = engine.maintain();
        assert_eq!(report.swept, Some(1));
        assert_eq!(engine.metrics().cache_size, 0);
    }

    #[test]
    fn test_end_session_resets_tracking() {
        let (mut engine, clock) = engine(EngineConfig::default());
        engine.track_search("pho", 3, BTreeMap::new());
        engine.handle_signal(&DomSignal::Focus { url: "/x".into() });
        clock.advance(60_000);
        engine.end_session();

        assert!(engine.tracker().profile().search_patterns.is_empty());
        assert_eq!(engine.tracker().profile().sessions_completed, 1);
        assert_eq!(engine.scheduler().pending_len(), 0);
    }
}
