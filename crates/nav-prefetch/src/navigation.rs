//! Navigation Renderer
//!
//! Intercepts same-site navigations. A fresh cache entry renders at once;
//! otherwise a skeleton for the destination's page type is shown while the
//! document is fetched, and any failure falls back to a full page load.
//! When a prefetch of the destination is already in flight, the skeleton
//! waits for it instead of issuing a second request.
//!
//! Background prefetches keep running while a navigation is awaited, and a
//! navigation never waits on prefetches of other pages.
//!
//! ```text
//! Requested ─┬─> CacheHit ─────────────────────────────────────────> Rendered
//!            └─> CacheMiss ─> OptimisticRender ─┬─> StreamedContentReceived ─> Rendered
//!                                               └─> FallbackFullReload
//! ```

use crate::background::Background;
use crate::cache::CacheEntry;
use crate::clock::{Clock, Millis};
use crate::executor::{PrefetchExecutor, with_deadline};
use crate::fetch::Fetcher;
use crate::page::PageType;
use serde::Serialize;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// States a navigation passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationState {
    Requested,
    CacheHit,
    CacheMiss,
    OptimisticRender,
    StreamedContentReceived,
    Rendered,
    FallbackFullReload,
}

/// Where rendered content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderSource {
    Cache,
    Network,
    Skeleton,
}

/// Content handed to the host for display
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedView {
    pub url: String,
    pub page_type: PageType,
    pub source: RenderSource,
    pub body: String,
}

/// Host page controls
pub trait Navigator {
    /// URL currently displayed
    fn current_url(&self) -> String;

    /// Replace the page content
    fn render(&self, view: &RenderedView);

    /// Push a history entry for `url`
    fn push_state(&self, url: &str);

    /// Leave the engine and let the host load `url` itself
    fn full_reload(&self, url: &str);
}

/// How a navigation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationOutcome {
    /// Served from the prefetch cache
    Instant,
    /// Skeleton first, then fetched content
    Streamed,
    FullReload,
}

/// Record of one navigation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationReport {
    pub url: String,
    pub page_type: PageType,
    pub path: Vec<NavigationState>,
    pub outcome: NavigationOutcome,
    pub elapsed_ms: Millis,
}

/// Placeholder markup shown while a page type loads
pub fn skeleton_for(page_type: PageType) -> String {
    let blocks = match page_type {
        PageType::Home => r#"<div class="sk-hero"></div><div class="sk-grid"><div></div><div></div><div></div></div>"#,
        PageType::Search => r#"<div class="sk-searchbar"></div><ul class="sk-results"><li></li><li></li><li></li><li></li></ul>"#,
        PageType::Category => r#"<div class="sk-title"></div><div class="sk-filters"></div><ul class="sk-results"><li></li><li></li><li></li></ul>"#,
        PageType::BusinessDetail => r#"<div class="sk-photo"></div><div class="sk-title"></div><div class="sk-rating"></div><div class="sk-text"></div>"#,
        PageType::Reviews => r#"<div class="sk-title"></div><ul class="sk-reviews"><li></li><li></li><li></li></ul>"#,
        PageType::Explore => r#"<div class="sk-map"></div><ul class="sk-results"><li></li><li></li></ul>"#,
        PageType::Other => r#"<div class="sk-text"></div>"#,
    };
    format!(
        r#"<main class="skeleton skeleton-{}" aria-busy="true">{}</main>"#,
        page_type.as_str(),
        blocks
    )
}

/// Navigation renderer
pub struct NavigationRenderer<F> {
    executor: PrefetchExecutor<F>,
    background: Rc<Background>,
    navigator: Rc<dyn Navigator>,
    clock: Rc<dyn Clock>,
}

impl<F: Fetcher> NavigationRenderer<F> {
    pub fn new(
        executor: PrefetchExecutor<F>,
        background: Rc<Background>,
        navigator: Rc<dyn Navigator>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            background,
            navigator,
            clock,
        }
    }

    pub fn navigator(&self) -> &Rc<dyn Navigator> {
        &self.navigator
    }

    pub fn background(&self) -> &Rc<Background> {
        &self.background
    }

    /// Navigate to `url`, serving from cache when possible
    pub async fn navigate(&self, url: &str) -> NavigationReport {
        self.background.drive(self.intercept(url)).await
    }

    async fn intercept(&self, url: &str) -> NavigationReport {
        let started = self.clock.now_ms();
        let page_type = PageType::classify(url);
        let mut path = vec![NavigationState::Requested];

        let Some(key) = self.executor.normalize(url) else {
            warn!(url, "navigation target not interceptable");
            path.push(NavigationState::FallbackFullReload);
            self.navigator.full_reload(url);
            return self.finish(url.to_string(), page_type, path, NavigationOutcome::FullReload, started);
        };

        if let Some(entry) = self.executor.lookup_for_navigation(&key) {
            path.push(NavigationState::CacheHit);
            self.navigator.render(&RenderedView {
                url: key.clone(),
                page_type,
                source: RenderSource::Cache,
                body: entry.text(),
            });
            self.navigator.push_state(&key);
            path.push(NavigationState::Rendered);
            self.executor.set_current_url(&key);
            return self.finish(key, page_type, path, NavigationOutcome::Instant, started);
        }

        path.push(NavigationState::CacheMiss);
        self.navigator.render(&RenderedView {
            url: key.clone(),
            page_type,
            source: RenderSource::Skeleton,
            body: skeleton_for(page_type),
        });
        path.push(NavigationState::OptimisticRender);

        if let Some(entry) = self.await_prefetch(&key).await {
            path.push(NavigationState::StreamedContentReceived);
            self.navigator.render(&RenderedView {
                url: key.clone(),
                page_type,
                source: RenderSource::Cache,
                body: entry.text(),
            });
            self.navigator.push_state(&key);
            path.push(NavigationState::Rendered);
            self.executor.set_current_url(&key);
            return self.finish(key, page_type, path, NavigationOutcome::Streamed, started);
        }

        match self.executor.fetch_document(&key).await {
            Ok(response) => {
                path.push(NavigationState::StreamedContentReceived);
                self.navigator.render(&RenderedView {
                    url: key.clone(),
                    page_type,
                    source: RenderSource::Network,
                    body: String::from_utf8_lossy(&response.body).into_owned(),
                });
                self.navigator.push_state(&key);
                path.push(NavigationState::Rendered);
                self.executor.set_current_url(&key);
                self.finish(key, page_type, path, NavigationOutcome::Streamed, started)
            }
            Err(err) => {
                warn!(%err, "navigation fetch failed, reloading");
                path.push(NavigationState::FallbackFullReload);
                self.navigator.full_reload(&key);
                self.executor.set_current_url(&key);
                self.finish(key, page_type, path, NavigationOutcome::FullReload, started)
            }
        }
    }

    /// Wait, at most the navigation timeout, for an in-flight prefetch of
    /// `key` and return what it stored
    async fn await_prefetch(&self, key: &str) -> Option<CacheEntry> {
        let waiter = self.executor.in_flight_waiter(key)?;
        debug!(url = key, "waiting on in-flight prefetch");

        let timeout_ms = self.executor.navigation_timeout_ms();
        if with_deadline(waiter.recv(), self.executor.sleep_for(timeout_ms)).await.is_none() {
            warn!(url = key, timeout_ms, "in-flight prefetch too slow");
            return None;
        }
        self.executor.cached_entry(key)
    }

    fn finish(
        &self,
        url: String,
        page_type: PageType,
        path: Vec<NavigationState>,
        outcome: NavigationOutcome,
        started: Millis,
    ) -> NavigationReport {
        let elapsed_ms = self.clock.now_ms().saturating_sub(started);
        match outcome {
            NavigationOutcome::Instant => info!(url = %url, elapsed_ms, "instant navigation"),
            _ => debug!(url = %url, ?outcome, elapsed_ms, "navigation finished"),
        }
        NavigationReport {
            url,
            page_type,
            path,
            outcome,
            elapsed_ms,
        }
    }
}
