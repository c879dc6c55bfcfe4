//! Prefetch Resource Cache
//!
//! Holds prefetched documents keyed by normalized URL, with a fixed TTL and
//! a byte budget. Under pressure the least confident entries go first.

use crate::clock::Millis;
use crate::config::CacheConfig;
use crate::error::CacheConsistencyError;
use crate::trigger::Trigger;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Cached prefetch result
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub url: String,
    pub content: Vec<u8>,
    pub content_type: String,
    /// Bytes charged against the budget
    pub size: usize,
    /// When the entry was stored
    pub timestamp_ms: Millis,
    pub confidence: f64,
    pub trigger: Trigger,
    pub load_time_ms: u64,
}

impl CacheEntry {
    pub fn new(url: &str, content: Vec<u8>, content_type: &str, confidence: f64, trigger: Trigger) -> Self {
        Self {
            url: url.to_string(),
            size: content.len(),
            content,
            content_type: content_type.to_string(),
            timestamp_ms: 0,
            confidence: confidence.clamp(0.0, 1.0),
            trigger,
            load_time_ms: 0,
        }
    }

    pub fn stored_at(mut self, now: Millis) -> Self {
        self.timestamp_ms = now;
        self
    }

    pub fn with_load_time(mut self, ms: u64) -> Self {
        self.load_time_ms = ms;
        self
    }

    pub fn age(&self, now: Millis) -> Millis {
        now.saturating_sub(self.timestamp_ms)
    }

    /// Expiry is measured from storage time only; reads never extend it
    pub fn is_expired(&self, now: Millis, max_age_ms: u64) -> bool {
        self.age(now) > max_age_ms
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Outcome of an aggressive cleanup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    /// Evicted URLs, lowest confidence first
    pub evicted: Vec<String>,
    pub reclaimed_bytes: usize,
    pub usage_before: usize,
    pub usage_after: usize,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub usage_bytes: usize,
    pub budget_bytes: usize,
    pub insertions: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub rejections: u64,
    pub repairs: u64,
}

impl CacheStats {
    pub fn utilization(&self) -> f64 {
        if self.budget_bytes == 0 {
            0.0
        } else {
            self.usage_bytes as f64 / self.budget_bytes as f64
        }
    }
}

/// Resource cache
#[derive(Debug)]
pub struct ResourceCache {
    entries: HashMap<String, CacheEntry>,
    config: CacheConfig,
    usage: usize,
    stats: CacheStats,
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            usage: 0,
            stats: CacheStats::default(),
        }
    }

    /// Fresh entry for `url`
    pub fn get(&self, url: &str, now: Millis) -> Option<&CacheEntry> {
        self.entries
            .get(url)
            .filter(|e| !e.is_expired(now, self.config.max_age_ms))
    }

    pub fn contains(&self, url: &str, now: Millis) -> bool {
        self.get(url, now).is_some()
    }

    /// Store an entry, replacing any previous one for the same URL.
    ///
    /// Entries larger than the whole budget are rejected. If the insert
    /// pushes usage over budget an aggressive cleanup runs, which may evict
    /// the new entry itself. Returns whether the entry is cached afterwards.
    pub fn put(&mut self, entry: CacheEntry) -> bool {
        if entry.size > self.config.memory_budget_bytes {
            self.stats.rejections += 1;
            debug!(url = %entry.url, size = entry.size, "entry larger than cache budget");
            return false;
        }

        let url = entry.url.clone();
        self.remove(&url);
        self.usage += entry.size;
        self.entries.insert(url.clone(), entry);
        self.stats.insertions += 1;

        if self.usage > self.config.memory_budget_bytes {
            self.aggressive_cleanup();
        }
        self.entries.contains_key(&url)
    }

    /// Explicit removal
    pub fn remove(&mut self, url: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(url)?;
        self.usage = self.usage.saturating_sub(entry.size);
        Some(entry)
    }

    /// Drop entries older than the max age. Returns how many were removed.
    pub fn sweep_expired(&mut self, now: Millis) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now, self.config.max_age_ms))
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self.remove(&key).is_some() {
                removed += 1;
            }
        }
        self.stats.expirations += removed as u64;
        if removed > 0 {
            debug!(removed, usage = self.usage, "expired cache entries swept");
        }
        removed
    }

    /// Evict lowest-confidence entries (oldest first among equals) until at
    /// least the target fraction of usage is reclaimed and usage fits the
    /// budget. The usage counter is re-derived from the entries first.
    pub fn aggressive_cleanup(&mut self) -> EvictionReport {
        if let Err(err) = self.verify_usage() {
            warn!(%err, "repaired cache usage counter");
        }

        let usage_before = self.usage;
        let target = (usage_before as f64 * self.config.eviction_target_fraction).ceil() as usize;

        let mut candidates: Vec<(String, f64, Millis)> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.confidence, e.timestamp_ms))
            .collect();
        candidates.sort_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then(a.2.cmp(&b.2))
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut report = EvictionReport {
            usage_before,
            ..Default::default()
        };
        for (key, _, _) in candidates {
            if report.reclaimed_bytes >= target && self.usage <= self.config.memory_budget_bytes {
                break;
            }
            if let Some(entry) = self.remove(&key) {
                report.reclaimed_bytes += entry.size;
                report.evicted.push(key);
            }
        }

        self.stats.evictions += report.evicted.len() as u64;
        report.usage_after = self.usage;
        debug!(
            evicted = report.evicted.len(),
            reclaimed = report.reclaimed_bytes,
            usage = self.usage,
            "aggressive cache cleanup"
        );
        report
    }

    /// Recompute usage from stored entries, correcting the counter if it drifted
    pub fn verify_usage(&mut self) -> Result<(), CacheConsistencyError> {
        let actual: usize = self.entries.values().map(|e| e.size).sum();
        if actual == self.usage {
            return Ok(());
        }
        let err = CacheConsistencyError {
            tracked: self.usage,
            actual,
        };
        self.usage = actual;
        self.stats.repairs += 1;
        Err(err)
    }

    /// Change the budget; lowering it below current usage evicts at once
    pub fn set_memory_budget(&mut self, bytes: usize) -> Option<EvictionReport> {
        self.config.memory_budget_bytes = bytes;
        (self.usage > bytes).then(|| self.aggressive_cleanup())
    }

    pub fn memory_budget(&self) -> usize {
        self.config.memory_budget_bytes
    }

    pub fn over_budget(&self) -> bool {
        self.usage > self.config.memory_budget_bytes
    }

    pub fn usage(&self) -> usize {
        self.usage
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.usage = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            usage_bytes: self.usage,
            budget_bytes: self.config.memory_budget_bytes,
            ..self.stats
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_usage(&mut self, usage: usize) {
        self.usage = usage;
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    fn cache(budget: usize) -> ResourceCache {
        ResourceCache::new(CacheConfig {
            memory_budget_bytes: budget,
            max_age_ms: 1_000,
            ..Default::default()
        })
    }

    fn entry(url: &str, size: usize, confidence: f64, at: Millis) -> CacheEntry {
        CacheEntry::new(url, vec![b'x'; size], "text/html", confidence, Trigger::Hover).stored_at(at)
    }

    fn actual_usage(cache: &ResourceCache) -> usize {
        cache.urls().map(|u| cache.entries[u].size).sum()
    }

    #[test]
    fn test_put_get() {
        let mut c = cache(1024);
        assert!(c.put(entry("/a", 10, 0.5, 0)));

        assert_eq!(c.get("/a", 5).unwrap().size, 10);
        assert_eq!(c.usage(), 10);
        assert!(c.get("/missing", 5).is_none());
    }

    #[test]
    fn test_replace_adjusts_usage() {
        let mut c = cache(1024);
        c.put(entry("/a", 10, 0.5, 0));
        c.put(entry("/a", 30, 0.5, 1));

        assert_eq!(c.len(), 1);
        assert_eq!(c.usage(), 30);
    }

    #[test]
    fn test_get_does_not_extend_ttl() {
        let mut c = cache(1024);
        c.put(entry("/a", 10, 0.5, 0));

        assert!(c.get("/a", 900).is_some());
        assert!(c.get("/a", 1_000).is_some());
        assert!(c.get("/a", 1_001).is_none());
    }

    #[test]
    fn test_sweep_expired_updates_usage() {
        let mut c = cache(1024);
        c.put(entry("/old", 10, 0.5, 0));
        c.put(entry("/new", 20, 0.5, 900));

        assert_eq!(c.sweep_expired(1_500), 1);
        assert_eq!(c.usage(), 20);
        assert!(c.contains("/new", 1_500));
        assert_eq!(c.stats().expirations, 1);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let mut c = cache(100);
        assert!(!c.put(entry("/huge", 101, 0.9, 0)));
        assert_eq!(c.usage(), 0);
        assert_eq!(c.stats().rejections, 1);
    }

    #[test]
    fn test_put_over_budget_evicts_lowest_confidence() {
        let mut c = cache(100);
        c.put(entry("/low", 40, 0.2, 0));
        c.put(entry("/mid", 40, 0.5, 0));
        assert!(c.put(entry("/high", 40, 0.9, 0)));

        assert!(!c.contains("/low", 0));
        assert!(c.contains("/high", 0));
        assert!(c.usage() <= 100);
        assert_eq!(c.usage(), actual_usage(&c));
    }

    #[test]
    fn test_forced_eviction_reclaims_target_fraction() {
        let mut c = cache(10 * MB);
        for i in 0..10 {
            let confidence = (i + 1) as f64 / 10.0;
            c.put(entry(&format!("/page/{i}"), MB, confidence, 0));
        }
        assert_eq!(c.usage(), 10 * MB);

        let report = c.set_memory_budget(5 * MB).unwrap();
        assert_eq!(
            report.evicted,
            vec!["/page/0", "/page/1", "/page/2", "/page/3", "/page/4"]
        );
        assert!(report.reclaimed_bytes >= report.usage_before / 2);
        assert!(c.usage() <= 5 * MB);
        assert!(c.urls().all(|u| c.entries[u].confidence > 0.5));
    }

    #[test]
    fn test_eviction_ties_oldest_first() {
        let mut c = cache(1_000);
        c.put(entry("/newer", 100, 0.5, 50));
        c.put(entry("/older", 100, 0.5, 10));

        let report = c.set_memory_budget(150).unwrap();
        assert_eq!(report.evicted, vec!["/older"]);
    }

    #[test]
    fn test_consistency_repair() {
        let mut c = cache(1_000);
        c.put(entry("/a", 100, 0.5, 0));
        c.corrupt_usage(900);

        let err = c.verify_usage().unwrap_err();
        assert_eq!(err, CacheConsistencyError { tracked: 900, actual: 100 });
        assert_eq!(c.usage(), 100);
        assert!(c.verify_usage().is_ok());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut c = cache(1_000);
        c.put(entry("/a", 100, 0.5, 0));
        c.put(entry("/b", 50, 0.5, 0));

        assert_eq!(c.remove("/a").unwrap().size, 100);
        assert_eq!(c.usage(), 50);
        assert!(c.remove("/a").is_none());

        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.usage(), 0);
    }
}
