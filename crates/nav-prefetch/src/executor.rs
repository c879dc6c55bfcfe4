//! Prefetch Executor
//!
//! Runs fired prefetch tasks against the host `Fetcher` under a hard
//! concurrency cap and a memory budget, and stores successful documents in
//! the resource cache.
//!
//! A task reserves its URL synchronously when it is dispatched, so two
//! tasks for the same URL can never both be in flight and the cap holds
//! across every batch still running. The reservation is released by a drop
//! guard on every exit path.

use crate::background::Background;
use crate::cache::{CacheEntry, EvictionReport, ResourceCache};
use crate::clock::{Clock, Millis, Sleep};
use crate::config::{EngineConfig, ExecutorConfig};
use crate::error::{CacheConsistencyError, ConfigError, PrefetchError};
use crate::fetch::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::hints::{ResourceHint, SecondaryScanner};
use crate::monitor::{Metrics, PerformanceMonitor};
use crate::page;
use crate::trigger::{PrefetchTask, Trigger};
use smol::channel::{Receiver, Sender};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use tracing::{debug, info, warn};
use url::Url;

/// Why a prefetch was not attempted or not kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InvalidUrl,
    AlreadyCached,
    InFlight,
    OverBudget,
    CurrentLocation,
    ConcurrencyLimit,
    /// Response larger than the whole cache budget
    TooLarge,
    /// Evicted again by the cleanup its own insert triggered
    Evicted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InvalidUrl => "invalid url",
            SkipReason::AlreadyCached => "already cached",
            SkipReason::InFlight => "in flight",
            SkipReason::OverBudget => "over memory budget",
            SkipReason::CurrentLocation => "current location",
            SkipReason::ConcurrencyLimit => "concurrency limit",
            SkipReason::TooLarge => "too large",
            SkipReason::Evicted => "evicted",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one prefetch
#[derive(Debug, Clone, PartialEq)]
pub enum PrefetchOutcome {
    /// Reserved and running in the background
    Started { url: String },
    Stored { url: String, size: usize, load_time_ms: u64 },
    Skipped { url: String, reason: SkipReason },
    Failed(PrefetchError),
}

impl PrefetchOutcome {
    pub fn url(&self) -> &str {
        match self {
            PrefetchOutcome::Started { url }
            | PrefetchOutcome::Stored { url, .. }
            | PrefetchOutcome::Skipped { url, .. } => url,
            PrefetchOutcome::Failed(err) => err.url(),
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, PrefetchOutcome::Stored { .. })
    }

    pub fn is_started(&self) -> bool {
        matches!(self, PrefetchOutcome::Started { .. })
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            PrefetchOutcome::Skipped { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Mutable state shared by all running tasks
#[derive(Debug)]
struct PrefetchState {
    cache: ResourceCache,
    in_flight: HashSet<String>,
    /// Closed when the matching in-flight fetch ends
    waiters: HashMap<String, Receiver<()>>,
    monitor: PerformanceMonitor,
    current_url: Option<String>,
    /// Secondary resources already hinted
    hinted: HashSet<String>,
}

struct Inner<F> {
    config: ExecutorConfig,
    base: Url,
    fetcher: F,
    clock: Rc<dyn Clock>,
    scanner: SecondaryScanner,
}

/// Clears an in-flight reservation when dropped
struct InFlightGuard {
    state: Rc<RefCell<PrefetchState>>,
    url: String,
    _done: Sender<()>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.in_flight.remove(&self.url);
            state.waiters.remove(&self.url);
        }
    }
}

/// Prefetch executor. Clones share state.
pub struct PrefetchExecutor<F> {
    inner: Rc<Inner<F>>,
    state: Rc<RefCell<PrefetchState>>,
}

impl<F> Clone for PrefetchExecutor<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            state: Rc::clone(&self.state),
        }
    }
}

impl<F: Fetcher> PrefetchExecutor<F> {
    pub fn new(config: &EngineConfig, fetcher: F, clock: Rc<dyn Clock>) -> Result<Self, ConfigError> {
        let base = Url::parse(&config.site_origin)
            .map_err(|e| ConfigError::Invalid(format!("site_origin: {e}")))?;
        let scanner = SecondaryScanner::new(
            config.executor.max_secondary_hints,
            config.executor.max_secondary_images,
        );

        Ok(Self {
            inner: Rc::new(Inner {
                config: config.executor.clone(),
                base,
                fetcher,
                clock,
                scanner,
            }),
            state: Rc::new(RefCell::new(PrefetchState {
                cache: ResourceCache::new(config.cache.clone()),
                in_flight: HashSet::new(),
                waiters: HashMap::new(),
                monitor: PerformanceMonitor::new(config.monitor.clone()),
                current_url: None,
                hinted: HashSet::new(),
            })),
        })
    }

    pub fn fetcher(&self) -> &F {
        &self.inner.fetcher
    }

    pub fn base(&self) -> &Url {
        &self.inner.base
    }

    fn now(&self) -> Millis {
        self.inner.clock.now_ms()
    }

    /// Cache key for `url`
    pub fn normalize(&self, url: &str) -> Option<String> {
        page::normalize_url(&self.inner.base, url)
    }

    /// Record where the user is, so it is never prefetched
    pub fn set_current_url(&self, url: &str) {
        self.state.borrow_mut().current_url = self.normalize(url);
    }

    pub fn current_url(&self) -> Option<String> {
        self.state.borrow().current_url.clone()
    }

    fn skip_reason(&self, key: &str) -> Option<SkipReason> {
        let state = self.state.borrow();
        if state.cache.contains(key, self.now()) {
            Some(SkipReason::AlreadyCached)
        } else if state.in_flight.contains(key) {
            Some(SkipReason::InFlight)
        } else if state.cache.over_budget() {
            Some(SkipReason::OverBudget)
        } else if state.current_url.as_deref() == Some(key) {
            Some(SkipReason::CurrentLocation)
        } else {
            None
        }
    }

    /// Whether `url` is worth fetching right now. Does not consider the
    /// concurrency cap.
    pub fn should_prefetch(&self, url: &str) -> bool {
        self.normalize(url)
            .is_some_and(|key| self.skip_reason(&key).is_none())
    }

    fn reserve(&self, key: &str) -> Result<InFlightGuard, SkipReason> {
        if let Some(reason) = self.skip_reason(key) {
            return Err(reason);
        }
        let mut state = self.state.borrow_mut();
        if state.in_flight.len() >= self.inner.config.max_concurrent {
            return Err(SkipReason::ConcurrencyLimit);
        }
        let (done, waiter) = smol::channel::bounded(1);
        state.in_flight.insert(key.to_string());
        state.waiters.insert(key.to_string(), waiter);
        Ok(InFlightGuard {
            state: Rc::clone(&self.state),
            url: key.to_string(),
            _done: done,
        })
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.borrow().in_flight.len()
    }

    pub fn is_in_flight(&self, url: &str) -> bool {
        self.normalize(url)
            .is_some_and(|key| self.state.borrow().in_flight.contains(&key))
    }

    /// Receiver that closes when the in-flight fetch of `url` ends
    pub fn in_flight_waiter(&self, url: &str) -> Option<Receiver<()>> {
        let key = self.normalize(url)?;
        self.state.borrow().waiters.get(&key).cloned()
    }

    fn begin(&self, url: &str, trigger: Trigger) -> Result<(String, InFlightGuard), PrefetchOutcome> {
        let Some(key) = self.normalize(url) else {
            return Err(PrefetchOutcome::Skipped {
                url: url.to_string(),
                reason: SkipReason::InvalidUrl,
            });
        };
        match self.reserve(&key) {
            Ok(guard) => Ok((key, guard)),
            Err(reason) => {
                debug!(url = %key, %trigger, %reason, "prefetch skipped");
                Err(PrefetchOutcome::Skipped { url: key, reason })
            }
        }
    }

    /// Fetch `url` speculatively and cache it on success
    pub async fn prefetch(&self, url: &str, confidence: f64, trigger: Trigger) -> PrefetchOutcome {
        match self.begin(url, trigger) {
            Ok((key, guard)) => self.run_reserved(key, guard, confidence, trigger).await,
            Err(outcome) => outcome,
        }
    }

    /// Reserve the task's URL now and fetch it on `background`. Returns
    /// `Started`, or `Skipped` when the URL could not be reserved.
    pub fn dispatch(&self, task: PrefetchTask, background: &Background) -> PrefetchOutcome
    where
        F: 'static,
    {
        match self.begin(&task.url, task.trigger) {
            Ok((key, guard)) => {
                let this = self.clone();
                let url = key.clone();
                background.spawn(async move { this.run_reserved(key, guard, task.confidence, task.trigger).await });
                PrefetchOutcome::Started { url }
            }
            Err(outcome) => outcome,
        }
    }

    /// Dispatch several tasks in order. Tasks beyond the cap are dropped.
    pub fn dispatch_all(&self, tasks: Vec<PrefetchTask>, background: &Background) -> Vec<PrefetchOutcome>
    where
        F: 'static,
    {
        tasks
            .into_iter()
            .map(|task| self.dispatch(task, background))
            .collect()
    }

    async fn run_reserved(
        &self,
        key: String,
        _guard: InFlightGuard,
        confidence: f64,
        trigger: Trigger,
    ) -> PrefetchOutcome {
        let timeout_ms = self.inner.config.fetch_timeout_ms;
        let started = self.now();
        self.state.borrow_mut().monitor.record_attempt();
        debug!(url = %key, %trigger, confidence, "prefetch started");

        let request = FetchRequest::get(&key)
            .with_header("Purpose", "prefetch")
            .with_header("X-Prefetch-Trigger", trigger.as_str())
            .with_timeout(timeout_ms);

        let response = match self.fetch_with_timeout(request, timeout_ms).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, %trigger, "prefetch failed");
                self.state.borrow_mut().monitor.record_failure();
                return PrefetchOutcome::Failed(err);
            }
        };

        let load_time_ms = self.now().saturating_sub(started);
        self.store(key, response, confidence, trigger, load_time_ms)
    }

    fn store(
        &self,
        key: String,
        response: FetchResponse,
        confidence: f64,
        trigger: Trigger,
        load_time_ms: u64,
    ) -> PrefetchOutcome {
        let hints = if response.is_html() {
            match Url::parse(&key) {
                Ok(page_url) => self
                    .inner
                    .scanner
                    .scan(&String::from_utf8_lossy(&response.body), &page_url),
                Err(_) => Vec::new(),
            }
        } else {
            Vec::new()
        };

        let content_type = response.content_type().to_string();
        let entry = CacheEntry::new(&key, response.body, &content_type, confidence, trigger)
            .stored_at(self.now())
            .with_load_time(load_time_ms);
        let size = entry.size;

        let outcome = {
            let mut state = self.state.borrow_mut();
            if size > state.cache.memory_budget() {
                state.monitor.record_failure();
                PrefetchOutcome::Skipped { url: key, reason: SkipReason::TooLarge }
            } else if state.cache.put(entry) {
                state.monitor.record_success(load_time_ms);
                PrefetchOutcome::Stored { url: key, size, load_time_ms }
            } else {
                state.monitor.record_failure();
                PrefetchOutcome::Skipped { url: key, reason: SkipReason::Evicted }
            }
        };

        match &outcome {
            PrefetchOutcome::Stored { url, size, load_time_ms } => {
                info!(url = %url, size, load_ms = load_time_ms, %trigger, "prefetch stored");
                self.emit_hints(hints);
            }
            PrefetchOutcome::Skipped { url, reason } => {
                debug!(url = %url, %reason, size, "prefetched document not cached");
            }
            PrefetchOutcome::Started { .. } | PrefetchOutcome::Failed(_) => {}
        }
        outcome
    }

    fn emit_hints(&self, hints: Vec<ResourceHint>) {
        let fresh: Vec<ResourceHint> = {
            let mut state = self.state.borrow_mut();
            hints
                .into_iter()
                .filter(|h| state.hinted.insert(h.url.clone()))
                .collect()
        };
        for hint in &fresh {
            debug!(url = %hint.url, kind = hint.kind.as_str(), "secondary resource hint");
            self.inner.fetcher.hint(hint);
        }
    }

    async fn fetch_with_timeout(&self, request: FetchRequest, timeout_ms: u64) -> Result<FetchResponse, PrefetchError> {
        let url = request.url.clone();
        let deadline = self.now().saturating_add(timeout_ms);
        let result = with_deadline(self.inner.fetcher.fetch(request), self.inner.clock.sleep_until(deadline)).await;
        // an answer that arrives after the deadline is as late as no answer
        let late = self.now() > deadline;
        match result {
            None => Err(PrefetchError::Timeout { url, after_ms: timeout_ms }),
            Some(_) if late => Err(PrefetchError::Timeout { url, after_ms: timeout_ms }),
            Some(Err(source)) => Err(PrefetchError::Network { url, source }),
            Some(Ok(response)) if !response.ok() => Err(PrefetchError::Network {
                url,
                source: FetchError::HttpError { status: response.status },
            }),
            Some(Ok(response)) => Ok(response),
        }
    }

    /// Foreground fetch for a navigation the cache could not serve
    pub async fn fetch_document(&self, url: &str) -> Result<FetchResponse, PrefetchError> {
        let key = self.normalize(url).ok_or_else(|| PrefetchError::Network {
            url: url.to_string(),
            source: FetchError::InvalidUrl(url.to_string()),
        })?;
        let timeout_ms = self.inner.config.navigation_timeout_ms;
        let request = FetchRequest::get(&key).with_timeout(timeout_ms);
        self.fetch_with_timeout(request, timeout_ms).await
    }

    /// Fresh cached entry for a navigation, counted as a hit or a miss
    pub fn lookup_for_navigation(&self, url: &str) -> Option<CacheEntry> {
        let key = self.normalize(url)?;
        let now = self.now();
        let mut state = self.state.borrow_mut();
        let entry = state.cache.get(&key, now).cloned();
        if entry.is_some() {
            state.monitor.record_cache_hit();
        } else {
            state.monitor.record_cache_miss();
        }
        entry
    }

    /// Fresh cached entry, without counting a navigation
    pub fn cached_entry(&self, url: &str) -> Option<CacheEntry> {
        let key = self.normalize(url)?;
        let now = self.now();
        self.state.borrow_mut().cache.get(&key, now).cloned()
    }

    /// Clock deadline `ms` from now
    pub fn sleep_for(&self, ms: u64) -> Sleep {
        self.inner.clock.sleep_until(self.now().saturating_add(ms))
    }

    pub fn navigation_timeout_ms(&self) -> u64 {
        self.inner.config.navigation_timeout_ms
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.normalize(url)
            .is_some_and(|key| self.state.borrow().cache.contains(&key, self.now()))
    }

    pub fn cache_usage(&self) -> usize {
        self.state.borrow().cache.usage()
    }

    pub fn cache_len(&self) -> usize {
        self.state.borrow().cache.len()
    }

    pub fn sweep_expired(&self) -> usize {
        let now = self.now();
        self.state.borrow_mut().cache.sweep_expired(now)
    }

    /// Aggressive cleanup when usage is above the budget
    pub fn enforce_budget(&self) -> Option<EvictionReport> {
        let mut state = self.state.borrow_mut();
        state.cache.over_budget().then(|| state.cache.aggressive_cleanup())
    }

    pub fn verify_cache(&self) -> Result<(), CacheConsistencyError> {
        self.state.borrow_mut().cache.verify_usage()
    }

    pub fn set_memory_budget(&self, bytes: usize) -> Option<EvictionReport> {
        self.state.borrow_mut().cache.set_memory_budget(bytes)
    }

    pub fn remove_cached(&self, url: &str) -> Option<CacheEntry> {
        let key = self.normalize(url)?;
        self.state.borrow_mut().cache.remove(&key)
    }

    pub fn clear_cache(&self) {
        self.state.borrow_mut().cache.clear();
    }

    pub fn metrics(&self) -> Metrics {
        let state = self.state.borrow();
        state.monitor.snapshot(state.cache.len(), state.cache.usage())
    }

    /// Log metrics if the report interval has elapsed
    pub fn maybe_report(&self) -> bool {
        let now = self.now();
        let metrics = self.metrics();
        self.state.borrow_mut().monitor.maybe_report(&metrics, now)
    }
}

/// Race `fut` against a clock sleep; `None` means the deadline won and
/// `fut` was dropped
pub(crate) async fn with_deadline<T>(fut: impl Future<Output = T>, deadline: Sleep) -> Option<T> {
    smol::future::or(async move { Some(fut.await) }, async move {
        deadline.await;
        None
    })
    .await
}
