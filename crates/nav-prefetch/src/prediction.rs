//! Navigation Prediction
//!
//! Turns the tracker's sequence patterns and profile into ranked,
//! confidence-scored destinations with concrete URLs.

use crate::clock::Millis;
use crate::config::PredictionConfig;
use crate::error::PredictionUnavailable;
use crate::page::{self, PageType};
use crate::tracker::BehaviorTracker;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

/// Where a prediction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    /// A trusted sequence pattern
    Sequence,
    /// Profile heuristics
    Profile,
}

/// A predicted destination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub page_type: PageType,
    /// Estimated probability of the visit, in `[0, 1]`
    pub confidence: f64,
    pub urls: Vec<String>,
    pub source: PredictionSource,
    /// Used to break confidence ties
    pub last_seen_ms: Millis,
}

/// Prediction engine
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    config: PredictionConfig,
}

impl PredictionEngine {
    pub fn new(config: PredictionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    pub fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }

    pub fn set_min_confidence(&mut self, confidence: f64) {
        self.config.min_confidence = confidence.clamp(0.0, 1.0);
    }

    /// Predictions from the trusted pattern for the trailing window
    pub fn navigation_predictions(
        &self,
        tracker: &BehaviorTracker,
    ) -> Result<Vec<Prediction>, PredictionUnavailable> {
        let key = tracker
            .current_sequence_key()
            .ok_or(PredictionUnavailable::InsufficientHistory {
                have: tracker.history().len(),
                need: tracker.sequence_length(),
            })?;

        let pattern = tracker
            .pattern(&key)
            .ok_or_else(|| PredictionUnavailable::UnknownPattern { key: key.to_string() })?;

        if pattern.total_count < self.config.min_occurrences {
            return Err(PredictionUnavailable::TooFewOccurrences {
                key: key.to_string(),
                seen: pattern.total_count,
                need: self.config.min_occurrences,
            });
        }

        let mut predictions: Vec<Prediction> = pattern
            .next_pages
            .iter()
            .map(|(page_type, stat)| Prediction {
                page_type: *page_type,
                confidence: stat.count as f64 / pattern.total_count as f64,
                urls: Vec::new(),
                source: PredictionSource::Sequence,
                last_seen_ms: stat.last_seen_ms,
            })
            .filter(|p| p.confidence >= self.config.min_confidence)
            .collect();

        if predictions.is_empty() {
            return Err(PredictionUnavailable::BelowThreshold { key: key.to_string() });
        }

        sort_predictions(&mut predictions);
        Ok(predictions)
    }

    /// Heuristic predictions from the profile's top categories and searches
    pub fn default_predictions(&self, tracker: &BehaviorTracker) -> Vec<Prediction> {
        let profile = tracker.profile();
        let mut predictions = Vec::new();

        for (category, affinity) in profile.top_categories(self.config.top_n) {
            predictions.push(Prediction {
                page_type: PageType::Category,
                confidence: (affinity.count as f64 / self.config.category_divisor)
                    .min(self.config.category_cap),
                urls: vec![page::category_url(category)],
                source: PredictionSource::Profile,
                last_seen_ms: affinity.last_seen_ms,
            });
        }

        for (query, affinity) in profile.top_searches(self.config.top_n) {
            predictions.push(Prediction {
                page_type: PageType::Search,
                confidence: (affinity.count as f64 / self.config.search_divisor)
                    .min(self.config.search_cap),
                urls: vec![page::search_url(query)],
                source: PredictionSource::Profile,
                last_seen_ms: affinity.last_seen_ms,
            });
        }

        sort_predictions(&mut predictions);
        predictions
    }

    /// Concrete URLs for a predicted page type, from the top profile entries
    pub fn generate_predicted_urls(&self, page_type: PageType, tracker: &BehaviorTracker) -> Vec<String> {
        let n = self.config.top_n;
        let profile = tracker.profile();

        match page_type {
            PageType::Home => vec!["/".to_string()],
            PageType::Search => profile
                .top_searches(n)
                .into_iter()
                .map(|(q, _)| page::search_url(q))
                .collect(),
            PageType::Category => profile
                .top_categories(n)
                .into_iter()
                .map(|(c, _)| page::category_url(c))
                .collect(),
            PageType::BusinessDetail => profile
                .top_businesses(n)
                .into_iter()
                .map(|(id, _)| page::business_url(id))
                .collect(),
            PageType::Reviews => profile
                .top_businesses(n)
                .into_iter()
                .map(|(id, _)| page::reviews_url(id))
                .collect(),
            PageType::Explore => std::iter::once(page::explore_url(None))
                .chain(
                    profile
                        .top_locations(n)
                        .into_iter()
                        .map(|(loc, _)| page::explore_url(Some(loc))),
                )
                .take(n.max(1))
                .collect(),
            PageType::Other => Vec::new(),
        }
    }

    /// Sequence predictions with URLs, or profile defaults when no pattern
    /// can be trusted yet
    pub fn predictions(&self, tracker: &BehaviorTracker) -> Vec<Prediction> {
        match self.navigation_predictions(tracker) {
            Ok(mut predictions) => {
                for prediction in &mut predictions {
                    prediction.urls = self.generate_predicted_urls(prediction.page_type, tracker);
                }
                predictions
            }
            Err(reason) => {
                debug!(%reason, "falling back to profile predictions");
                self.default_predictions(tracker)
            }
        }
    }
}

/// Confidence descending, then most recent, then page type order
fn sort_predictions(predictions: &mut [Prediction]) {
    predictions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then(b.last_seen_ms.cmp(&a.last_seen_ms))
            .then(a.page_type.cmp(&b.page_type))
            .then(a.urls.cmp(&b.urls))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::tracker::NavigationMetadata;
    use std::collections::BTreeMap;

    fn tracker(seq: usize) -> BehaviorTracker {
        BehaviorTracker::new(
            TrackerConfig {
                history_size: 100,
                sequence_length: seq,
            },
            0,
        )
    }

    fn engine(min_occurrences: u32) -> PredictionEngine {
        PredictionEngine::new(PredictionConfig {
            min_occurrences,
            ..Default::default()
        })
    }

    fn visit(t: &mut BehaviorTracker, urls: &[&str], now: &mut Millis) {
        for url in urls {
            t.track_navigation(url, &NavigationMetadata::default(), *now);
            *now += 500;
        }
    }

    #[test]
    fn test_repeated_sequence_predicts_reviews() {
        let mut t = tracker(3);
        let mut now = 0;
        for _ in 0..4 {
            visit(&mut t, &["/", "/search?q=tacos", "/business/5", "/business/5/reviews"], &mut now);
        }
        visit(&mut t, &["/", "/search?q=tacos", "/business/5"], &mut now);

        let predictions = engine(3).navigation_predictions(&t).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].page_type, PageType::Reviews);
        assert_eq!(predictions[0].confidence, 1.0);
    }

    #[test]
    fn test_untrusted_pattern_unavailable() {
        let mut t = tracker(2);
        let mut now = 0;
        visit(&mut t, &["/", "/explore", "/category/bars", "/", "/explore"], &mut now);

        let err = engine(3).navigation_predictions(&t).unwrap_err();
        assert!(matches!(
            err,
            PredictionUnavailable::TooFewOccurrences { seen: 1, need: 3, .. }
        ));
    }

    #[test]
    fn test_short_history_unavailable() {
        let mut t = tracker(5);
        let mut now = 0;
        visit(&mut t, &["/", "/explore"], &mut now);

        assert!(matches!(
            engine(3).navigation_predictions(&t),
            Err(PredictionUnavailable::InsufficientHistory { have: 2, need: 5 })
        ));
    }

    #[test]
    fn test_low_confidence_filtered() {
        let mut t = tracker(1);
        let mut now = 0;
        // After "/": explore 3 times, category 1 time (0.75 / 0.25)
        for next in ["/explore", "/explore", "/category/x", "/explore"] {
            visit(&mut t, &["/", next], &mut now);
        }
        visit(&mut t, &["/"], &mut now);

        let predictions = engine(3).navigation_predictions(&t).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].page_type, PageType::Explore);
        assert!((predictions[0].confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_ties_broken_by_recency() {
        let mut t = tracker(1);
        let mut now = 0;
        for next in ["/explore", "/category/x", "/explore", "/category/x"] {
            visit(&mut t, &["/", next], &mut now);
        }
        visit(&mut t, &["/"], &mut now);

        let predictions = engine(3).navigation_predictions(&t).unwrap();
        assert_eq!(predictions.len(), 2);
        // Category followed most recently
        assert_eq!(predictions[0].page_type, PageType::Category);
        assert_eq!(predictions[1].page_type, PageType::Explore);
    }

    #[test]
    fn test_default_predictions_caps() {
        let mut t = tracker(5);
        for i in 0..20 {
            t.track_search("sushi", 4, BTreeMap::new(), i);
        }
        t.track_search("ramen", 4, BTreeMap::new(), 100);
        t.track_interaction(
            "b1",
            &crate::tracker::InteractionData {
                categories: vec!["Japanese".into()],
                location: None,
            },
            crate::tracker::InteractionKind::View,
            5,
        );

        let predictions = engine(3).default_predictions(&t);
        let sushi = predictions.iter().find(|p| p.urls == ["/search?q=sushi"]).unwrap();
        assert_eq!(sushi.confidence, 0.6);
        let japanese = predictions.iter().find(|p| p.page_type == PageType::Category).unwrap();
        assert!((japanese.confidence - 0.1).abs() < 1e-9);
        assert_eq!(predictions[0].urls, ["/search?q=sushi"]);
        assert!(predictions.iter().all(|p| (0.0..=1.0).contains(&p.confidence)));
    }

    #[test]
    fn test_predictions_fall_back_to_profile() {
        let mut t = tracker(5);
        t.track_search("bagels", 2, BTreeMap::new(), 1);

        let predictions = engine(3).predictions(&t);
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].source, PredictionSource::Profile);
    }

    #[test]
    fn test_generate_urls() {
        let mut t = tracker(5);
        let mut now = 0;
        visit(&mut t, &["/business/a", "/business/b", "/business/b"], &mut now);
        let engine = engine(3);

        assert_eq!(
            engine.generate_predicted_urls(PageType::BusinessDetail, &t),
            vec!["/business/b".to_string(), "/business/a".to_string()]
        );
        assert_eq!(
            engine.generate_predicted_urls(PageType::Reviews, &t)[0],
            "/business/b/reviews"
        );
        assert_eq!(engine.generate_predicted_urls(PageType::Home, &t), vec!["/".to_string()]);
        assert!(engine.generate_predicted_urls(PageType::Other, &t).is_empty());
        assert_eq!(engine.generate_predicted_urls(PageType::Explore, &t), vec!["/explore".to_string()]);
    }
}
