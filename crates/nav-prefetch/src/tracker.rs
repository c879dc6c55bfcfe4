//! Behavior Tracking
//!
//! Records navigation, search and interaction events in bounded rolling
//! histories, keeps a per-user affinity profile, and mines the navigation
//! history for recurring page-type sequences.

use crate::clock::Millis;
use crate::config::TrackerConfig;
use crate::page::{self, PageType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use tracing::debug;

/// Extra context supplied with a navigation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationMetadata {
    pub session_id: Option<String>,
    /// Category of the business or listing being opened
    pub category: Option<String>,
    pub location: Option<String>,
}

/// A page view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationEvent {
    pub url: String,
    pub page_type: PageType,
    pub timestamp_ms: Millis,
    pub session_id: String,
}

/// A submitted search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchEvent {
    /// Normalized query
    pub query: String,
    pub results_count: usize,
    pub filters: BTreeMap<String, String>,
    pub timestamp_ms: Millis,
}

/// What the user did with a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    View,
    Click,
    Save,
    Contact,
    Share,
}

/// Listing attributes attached to an interaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionData {
    pub categories: Vec<String>,
    pub location: Option<String>,
}

/// An interaction with a listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionEvent {
    pub target_id: String,
    pub categories: Vec<String>,
    pub location: Option<String>,
    pub kind: InteractionKind,
    pub timestamp_ms: Millis,
}

/// Frequency and recency of one profile key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Affinity {
    pub count: u32,
    /// Last interaction, search or visit touching this key
    pub last_seen_ms: Millis,
}

impl Affinity {
    fn bump(&mut self, now: Millis) {
        self.count = self.count.saturating_add(1);
        self.last_seen_ms = self.last_seen_ms.max(now);
    }
}

/// Aggregated preferences for the current user
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserProfile {
    pub preferred_categories: HashMap<String, Affinity>,
    pub search_patterns: HashMap<String, Affinity>,
    pub location_preferences: HashMap<String, Affinity>,
    /// Businesses viewed or interacted with
    pub recent_businesses: HashMap<String, Affinity>,
    pub avg_session_duration_ms: f64,
    pub sessions_completed: u32,
}

impl UserProfile {
    pub fn top_categories(&self, n: usize) -> Vec<(&str, Affinity)> {
        top_entries(&self.preferred_categories, n)
    }

    pub fn top_searches(&self, n: usize) -> Vec<(&str, Affinity)> {
        top_entries(&self.search_patterns, n)
    }

    pub fn top_locations(&self, n: usize) -> Vec<(&str, Affinity)> {
        top_entries(&self.location_preferences, n)
    }

    pub fn top_businesses(&self, n: usize) -> Vec<(&str, Affinity)> {
        top_entries(&self.recent_businesses, n)
    }

    fn clear_affinities(&mut self) {
        self.preferred_categories.clear();
        self.search_patterns.clear();
        self.location_preferences.clear();
        self.recent_businesses.clear();
    }
}

/// Highest count first, then most recent, then by key
fn top_entries(map: &HashMap<String, Affinity>, n: usize) -> Vec<(&str, Affinity)> {
    let mut entries: Vec<(&str, Affinity)> = map.iter().map(|(k, a)| (k.as_str(), *a)).collect();
    entries.sort_by(|a, b| {
        b.1.count
            .cmp(&a.1.count)
            .then(b.1.last_seen_ms.cmp(&a.1.last_seen_ms))
            .then(a.0.cmp(b.0))
    });
    entries.truncate(n);
    entries
}

fn normalize_key(raw: &str) -> Option<String> {
    let key = raw.trim().to_lowercase();
    (!key.is_empty()).then_some(key)
}

/// Window of consecutive page types
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SequenceKey(pub Vec<PageType>);

impl SequenceKey {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, page) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" > ")?;
            }
            f.write_str(page.as_str())?;
        }
        Ok(())
    }
}

/// How often a page type followed a window, and when it last did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NextPageStat {
    pub count: u32,
    pub last_seen_ms: Millis,
}

/// Historical distribution of what followed one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequencePattern {
    pub key: SequenceKey,
    pub next_pages: HashMap<PageType, NextPageStat>,
    pub total_count: u32,
}

impl SequencePattern {
    fn new(key: SequenceKey) -> Self {
        Self {
            key,
            next_pages: HashMap::new(),
            total_count: 0,
        }
    }

    fn record(&mut self, next: PageType, at: Millis) {
        let stat = self.next_pages.entry(next).or_default();
        stat.count += 1;
        stat.last_seen_ms = stat.last_seen_ms.max(at);
        self.total_count += 1;
    }

    /// Share of occurrences followed by `page`
    pub fn confidence(&self, page: PageType) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        let count = self.next_pages.get(&page).map(|s| s.count).unwrap_or(0);
        count as f64 / self.total_count as f64
    }
}

/// Behavior tracker
#[derive(Debug)]
pub struct BehaviorTracker {
    config: TrackerConfig,
    history: VecDeque<NavigationEvent>,
    searches: VecDeque<SearchEvent>,
    interactions: VecDeque<InteractionEvent>,
    profile: UserProfile,
    patterns: HashMap<SequenceKey, SequencePattern>,
    session_id: String,
    session_started_ms: Millis,
}

impl BehaviorTracker {
    pub fn new(config: TrackerConfig, now: Millis) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_size),
            searches: VecDeque::with_capacity(config.history_size),
            interactions: VecDeque::with_capacity(config.history_size),
            config,
            profile: UserProfile::default(),
            patterns: HashMap::new(),
            session_id: "session-1".to_string(),
            session_started_ms: now,
        }
    }

    /// Record a page view and refresh the pattern for the new trailing window
    pub fn track_navigation(&mut self, url: &str, metadata: &NavigationMetadata, now: Millis) -> PageType {
        let page_type = PageType::classify(url);
        let session_id = metadata
            .session_id
            .clone()
            .unwrap_or_else(|| self.session_id.clone());

        push_bounded(
            &mut self.history,
            NavigationEvent {
                url: url.to_string(),
                page_type,
                timestamp_ms: now,
                session_id,
            },
            self.config.history_size,
        );

        if let Some(category) = metadata.category.as_deref().and_then(normalize_key) {
            self.profile.preferred_categories.entry(category).or_default().bump(now);
        }
        if let Some(location) = metadata.location.as_deref().and_then(normalize_key) {
            self.profile.location_preferences.entry(location).or_default().bump(now);
        }

        match page_type {
            PageType::BusinessDetail | PageType::Reviews => {
                if let Some(id) = page::business_id(url) {
                    self.profile.recent_businesses.entry(id).or_default().bump(now);
                }
            }
            PageType::Search => {
                if let Some(query) = page::search_query(url).as_deref().and_then(normalize_key) {
                    self.profile.search_patterns.entry(query).or_default().bump(now);
                }
            }
            PageType::Home | PageType::Category | PageType::Explore | PageType::Other => {}
        }

        self.analyze_navigation_patterns();
        page_type
    }

    /// Record a search. Returns the normalized query, or `None` if it was blank.
    pub fn track_search(
        &mut self,
        query: &str,
        results_count: usize,
        filters: BTreeMap<String, String>,
        now: Millis,
    ) -> Option<String> {
        let normalized = normalize_key(query)?;

        self.profile
            .search_patterns
            .entry(normalized.clone())
            .or_default()
            .bump(now);

        push_bounded(
            &mut self.searches,
            SearchEvent {
                query: normalized.clone(),
                results_count,
                filters,
                timestamp_ms: now,
            },
            self.config.history_size,
        );

        Some(normalized)
    }

    /// Record an interaction with a listing
    pub fn track_interaction(
        &mut self,
        target_id: &str,
        data: &InteractionData,
        kind: InteractionKind,
        now: Millis,
    ) {
        let categories: Vec<String> = data.categories.iter().filter_map(|c| normalize_key(c)).collect();
        let location = data.location.as_deref().and_then(normalize_key);

        for category in &categories {
            self.profile
                .preferred_categories
                .entry(category.clone())
                .or_default()
                .bump(now);
        }
        if let Some(loc) = &location {
            self.profile.location_preferences.entry(loc.clone()).or_default().bump(now);
        }
        if !target_id.trim().is_empty() {
            self.profile
                .recent_businesses
                .entry(target_id.trim().to_string())
                .or_default()
                .bump(now);
        }

        push_bounded(
            &mut self.interactions,
            InteractionEvent {
                target_id: target_id.to_string(),
                categories,
                location,
                kind,
                timestamp_ms: now,
            },
            self.config.history_size,
        );
    }

    /// Rebuild the pattern for the trailing window from the current history.
    ///
    /// Every earlier occurrence of the window contributes the page type that
    /// followed it. Returns `None` while the history is shorter than the window.
    pub fn analyze_navigation_patterns(&mut self) -> Option<&SequencePattern> {
        let key = self.current_sequence_key()?;
        let len = self.config.sequence_length;
        let types: Vec<PageType> = self.history.iter().map(|e| e.page_type).collect();
        let key_start = types.len() - len;

        let mut pattern = SequencePattern::new(key.clone());
        for start in 0..key_start {
            if types[start..start + len] == key.0[..] {
                let follower = &self.history[start + len];
                pattern.record(follower.page_type, follower.timestamp_ms);
            }
        }

        if pattern.total_count == 0 {
            self.patterns.remove(&key);
            return None;
        }

        debug!(
            key = %key,
            occurrences = pattern.total_count,
            "navigation pattern updated"
        );
        self.patterns.insert(key.clone(), pattern);
        self.patterns.get(&key)
    }

    /// Trailing window of page types, once the history is long enough
    pub fn current_sequence_key(&self) -> Option<SequenceKey> {
        let len = self.config.sequence_length;
        if len == 0 || self.history.len() < len {
            return None;
        }
        let key = self.history.iter().skip(self.history.len() - len).map(|e| e.page_type).collect();
        Some(SequenceKey(key))
    }

    pub fn pattern(&self, key: &SequenceKey) -> Option<&SequencePattern> {
        self.patterns.get(key)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &SequencePattern> {
        self.patterns.values()
    }

    pub fn history(&self) -> &VecDeque<NavigationEvent> {
        &self.history
    }

    pub fn searches(&self) -> &VecDeque<SearchEvent> {
        &self.searches
    }

    pub fn interactions(&self) -> &VecDeque<InteractionEvent> {
        &self.interactions
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn sequence_length(&self) -> usize {
        self.config.sequence_length
    }

    /// Close the session: fold its duration into the running average and
    /// forget everything learned during it.
    pub fn end_session(&mut self, now: Millis) {
        let duration = now.saturating_sub(self.session_started_ms) as f64;
        let completed = self.profile.sessions_completed as f64;
        self.profile.avg_session_duration_ms =
            (self.profile.avg_session_duration_ms * completed + duration) / (completed + 1.0);
        self.profile.sessions_completed += 1;
        self.profile.clear_affinities();

        self.history.clear();
        self.searches.clear();
        self.interactions.clear();
        self.patterns.clear();

        self.session_id = format!("session-{}", self.profile.sessions_completed + 1);
        self.session_started_ms = now;
        debug!(duration_ms = duration, "session ended");
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    queue.push_back(item);
    while queue.len() > cap {
        queue.pop_front();
    }
}
