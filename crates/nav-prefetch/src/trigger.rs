//! Prefetch Triggers
//!
//! Binds DOM signals to candidate URLs. Each `(trigger, url)` pair runs its
//! own small state machine:
//!
//! ```text
//! Idle ──> Scheduled ──> Fired
//!               └──────> Cancelled
//! ```
//!
//! Deadlines are plain timestamps checked by `poll_due`, so the scheduler
//! never owns a timer and can be driven headlessly. Budget checks happen
//! later, when the executor runs a fired task.

use crate::clock::Millis;
use crate::config::TriggerConfig;
use crate::page;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::debug;
use url::Url;

/// Signal that started a prefetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Mousedown,
    Hover,
    Touch,
    Focus,
    Viewport,
    /// Idle-time prefetch of a predicted destination
    Prediction,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Mousedown => "mousedown",
            Trigger::Hover => "hover",
            Trigger::Touch => "touch",
            Trigger::Focus => "focus",
            Trigger::Viewport => "viewport",
            Trigger::Prediction => "prediction",
        }
    }

    /// How strongly the signal implies a navigation
    pub fn default_confidence(&self) -> f64 {
        match self {
            Trigger::Mousedown => 0.95,
            Trigger::Touch => 0.8,
            Trigger::Hover => 0.7,
            Trigger::Focus => 0.6,
            Trigger::Viewport => 0.4,
            Trigger::Prediction => 0.5,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a pending task; displays as `trigger:url`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerKey {
    pub trigger: Trigger,
    pub url: String,
}

impl TriggerKey {
    pub fn new(trigger: Trigger, url: &str) -> Self {
        Self {
            trigger,
            url: url.to_string(),
        }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.trigger, self.url)
    }
}

/// Lifecycle of a prefetch task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Idle,
    Scheduled,
    Fired,
    Cancelled,
}

/// A candidate prefetch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrefetchTask {
    pub url: String,
    pub trigger: Trigger,
    pub confidence: f64,
    pub state: TaskState,
    pub due_at: Millis,
}

impl PrefetchTask {
    pub fn new(url: &str, trigger: Trigger, confidence: f64) -> Self {
        Self {
            url: url.to_string(),
            trigger,
            confidence,
            state: TaskState::Idle,
            due_at: 0,
        }
    }

    pub fn key(&self) -> TriggerKey {
        TriggerKey::new(self.trigger, &self.url)
    }

    fn fired(mut self) -> Self {
        self.state = TaskState::Fired;
        self
    }
}

/// DOM signals the engine reacts to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomSignal {
    MouseDown { url: String },
    MouseOver { url: String },
    MouseOut { url: String },
    TouchStart { url: String },
    Focus { url: String },
    Blur { url: String },
    /// Intersection update for a link
    Visibility { url: String, ratio: f32 },
}

/// Source of DOM signals
pub trait EventSource {
    fn next_signal(&mut self) -> Option<DomSignal>;
}

/// In-memory signal queue
#[derive(Debug, Default)]
pub struct SignalQueue {
    queue: VecDeque<DomSignal>,
}

impl SignalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, signal: DomSignal) {
        self.queue.push_back(signal);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl EventSource for SignalQueue {
    fn next_signal(&mut self) -> Option<DomSignal> {
        self.queue.pop_front()
    }
}

/// Result of feeding one signal to the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEffect {
    /// Timer started
    Scheduled(TriggerKey),
    /// Ready to execute now
    Fired(PrefetchTask),
    Cancelled(TriggerKey),
    Ignored,
}

/// Trigger scheduler
#[derive(Debug)]
pub struct TriggerScheduler {
    config: TriggerConfig,
    /// Origin that relative and absolute links are normalized against
    base: Option<Url>,
    pending: HashMap<TriggerKey, PrefetchTask>,
}

impl TriggerScheduler {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            base: None,
            pending: HashMap::new(),
        }
    }

    /// Key timers by normalized URL, so `/a` and `https://site/a#x` are
    /// the same link
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    fn key_url(&self, url: &str) -> String {
        self.base
            .as_ref()
            .and_then(|base| page::normalize_url(base, url))
            .unwrap_or_else(|| url.to_string())
    }

    /// Apply a DOM signal at time `now`
    pub fn handle(&mut self, signal: &DomSignal, now: Millis) -> SignalEffect {
        match signal {
            DomSignal::MouseDown { url } => SignalEffect::Fired(
                PrefetchTask::new(url, Trigger::Mousedown, Trigger::Mousedown.default_confidence())
                    .fired(),
            ),
            DomSignal::MouseOver { url } => {
                self.schedule(url, Trigger::Hover, self.config.hover_delay_ms, now)
            }
            DomSignal::MouseOut { url } => self.cancel(url, Trigger::Hover),
            DomSignal::TouchStart { url } => {
                self.schedule(url, Trigger::Touch, self.config.touch_delay_ms, now)
            }
            DomSignal::Focus { url } => {
                self.schedule(url, Trigger::Focus, self.config.focus_delay_ms, now)
            }
            DomSignal::Blur { url } => self.cancel(url, Trigger::Focus),
            DomSignal::Visibility { url, ratio } => {
                if self.config.viewport_enabled && *ratio > 0.0 {
                    self.schedule(url, Trigger::Viewport, 0, now)
                } else {
                    SignalEffect::Ignored
                }
            }
        }
    }

    /// Start a timer for `(trigger, url)`. A zero delay fires at once; an
    /// already scheduled pair keeps its original deadline.
    pub fn schedule(&mut self, url: &str, trigger: Trigger, delay_ms: u64, now: Millis) -> SignalEffect {
        let url = self.key_url(url);
        let key = TriggerKey::new(trigger, &url);

        if self.pending.contains_key(&key) {
            return SignalEffect::Ignored;
        }

        let mut task = PrefetchTask::new(&url, trigger, trigger.default_confidence());
        task.due_at = now.saturating_add(delay_ms);
        if delay_ms == 0 {
            return SignalEffect::Fired(task.fired());
        }

        task.state = TaskState::Scheduled;
        debug!(key = %key, due_at = task.due_at, "prefetch scheduled");
        self.pending.insert(key.clone(), task);
        SignalEffect::Scheduled(key)
    }

    /// Cancel the pending timer for exactly this trigger type
    pub fn cancel(&mut self, url: &str, trigger: Trigger) -> SignalEffect {
        let key = TriggerKey::new(trigger, &self.key_url(url));
        match self.pending.remove(&key) {
            Some(_) => {
                debug!(key = %key, "prefetch cancelled");
                SignalEffect::Cancelled(key)
            }
            None => SignalEffect::Ignored,
        }
    }

    /// Remove and return every task whose deadline has passed, earliest first
    pub fn poll_due(&mut self, now: Millis) -> Vec<PrefetchTask> {
        let mut due: Vec<TriggerKey> = self
            .pending
            .iter()
            .filter(|(_, task)| task.due_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        due.sort_by(|a, b| {
            let da = self.pending[a].due_at;
            let db = self.pending[b].due_at;
            da.cmp(&db).then_with(|| a.cmp(b))
        });

        due.into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .map(PrefetchTask::fired)
            .collect()
    }

    pub fn is_scheduled(&self, url: &str, trigger: Trigger) -> bool {
        self.pending.contains_key(&TriggerKey::new(trigger, &self.key_url(url)))
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Millis> {
        self.pending.values().map(|t| t.due_at).min()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> TriggerScheduler {
        TriggerScheduler::new(TriggerConfig::default())
    }

    fn over(url: &str) -> DomSignal {
        DomSignal::MouseOver { url: url.into() }
    }

    #[test]
    fn test_mousedown_fires_immediately() {
        let mut s = scheduler();
        match s.handle(&DomSignal::MouseDown { url: "/a".into() }, 10) {
            SignalEffect::Fired(task) => {
                assert_eq!(task.trigger, Trigger::Mousedown);
                assert_eq!(task.state, TaskState::Fired);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(s.pending_len(), 0);
    }

    #[test]
    fn test_hover_fires_after_delay() {
        let mut s = scheduler();
        assert!(matches!(s.handle(&over("/a"), 0), SignalEffect::Scheduled(_)));

        assert!(s.poll_due(64).is_empty());
        let fired = s.poll_due(65);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].trigger, Trigger::Hover);
        assert_eq!(fired[0].state, TaskState::Fired);
        assert!(s.poll_due(1_000).is_empty());
    }

    #[test]
    fn test_mouseout_cancels_hover() {
        let mut s = scheduler();
        s.handle(&over("/a"), 0);
        let effect = s.handle(&DomSignal::MouseOut { url: "/a".into() }, 40);

        match effect {
            SignalEffect::Cancelled(key) => assert_eq!(key.to_string(), "hover:/a"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(s.poll_due(1_000).is_empty());
    }

    #[test]
    fn test_cancel_only_matches_own_trigger() {
        let mut s = scheduler();
        s.handle(&DomSignal::TouchStart { url: "/a".into() }, 0);
        s.handle(&DomSignal::Focus { url: "/a".into() }, 0);

        // mouseout cannot cancel touch or focus timers
        assert_eq!(s.handle(&DomSignal::MouseOut { url: "/a".into() }, 10), SignalEffect::Ignored);
        assert!(s.is_scheduled("/a", Trigger::Touch));

        assert!(matches!(
            s.handle(&DomSignal::Blur { url: "/a".into() }, 20),
            SignalEffect::Cancelled(_)
        ));
        assert!(s.is_scheduled("/a", Trigger::Touch));
        assert!(!s.is_scheduled("/a", Trigger::Focus));

        let fired = s.poll_due(90);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].trigger, Trigger::Touch);
    }

    #[test]
    fn test_mouseout_matches_absolute_form_of_link() {
        let base = Url::parse("https://dir.example.com/").unwrap();
        let mut s = scheduler().with_base(base);
        s.handle(&over("/a"), 0);
        assert!(s.is_scheduled("https://dir.example.com/a#top", Trigger::Hover));

        let effect = s.handle(&DomSignal::MouseOut { url: "https://dir.example.com/a".into() }, 40);
        match effect {
            SignalEffect::Cancelled(key) => assert_eq!(key.to_string(), "hover:https://dir.example.com/a"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(s.poll_due(1_000).is_empty());
    }

    #[test]
    fn test_rehover_keeps_deadline() {
        let mut s = scheduler();
        s.handle(&over("/a"), 0);
        assert_eq!(s.handle(&over("/a"), 50), SignalEffect::Ignored);
        assert_eq!(s.next_deadline(), Some(65));
    }

    #[test]
    fn test_viewport_requires_visibility() {
        let mut s = scheduler();
        assert_eq!(
            s.handle(&DomSignal::Visibility { url: "/a".into(), ratio: 0.0 }, 0),
            SignalEffect::Ignored
        );
        assert!(matches!(
            s.handle(&DomSignal::Visibility { url: "/a".into(), ratio: 0.01 }, 0),
            SignalEffect::Fired(_)
        ));

        let mut disabled = TriggerScheduler::new(TriggerConfig {
            viewport_enabled: false,
            ..Default::default()
        });
        assert_eq!(
            disabled.handle(&DomSignal::Visibility { url: "/a".into(), ratio: 1.0 }, 0),
            SignalEffect::Ignored
        );
    }

    #[test]
    fn test_poll_due_orders_by_deadline() {
        let mut s = scheduler();
        s.handle(&DomSignal::Focus { url: "/c".into() }, 0);
        s.handle(&DomSignal::TouchStart { url: "/b".into() }, 0);
        s.handle(&over("/a"), 0);

        let fired: Vec<String> = s.poll_due(200).into_iter().map(|t| t.url).collect();
        assert_eq!(fired, vec!["/a", "/b", "/c"]);
    }

    #[test]
    fn test_signal_queue() {
        let mut queue = SignalQueue::new();
        queue.push(over("/a"));
        queue.push(DomSignal::MouseOut { url: "/a".into() });

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next_signal(), Some(over("/a")));
        assert_eq!(queue.next_signal(), Some(DomSignal::MouseOut { url: "/a".into() }));
        assert!(queue.next_signal().is_none());
    }

    #[test]
    fn test_signal_json_shape() {
        let signal: DomSignal =
            serde_json::from_str(r#"{ "type": "mouse_over", "url": "/business/1" }"#).unwrap();
        assert_eq!(signal, over("/business/1"));
    }
}
