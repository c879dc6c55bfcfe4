//! Simulated Site
//!
//! Offline stand-ins for the network and the page. The fetcher serves a
//! generated document for every path and charges a deterministic latency
//! to the shared manual clock.

use nav_prefetch::{
    FetchError, FetchRequest, FetchResponse, Fetcher, ManualClock, Navigator, PageType,
    RenderSource, RenderedView, ResourceHint,
};
use std::cell::{Cell, RefCell};
use tracing::{debug, info};

pub struct SimulatedFetcher {
    clock: ManualClock,
    base_latency_ms: u64,
    pub requests: Cell<usize>,
    pub hints: Cell<usize>,
}

impl SimulatedFetcher {
    pub fn new(clock: ManualClock, base_latency_ms: u64) -> Self {
        Self {
            clock,
            base_latency_ms,
            requests: Cell::new(0),
            hints: Cell::new(0),
        }
    }

    /// Latency in `[base, 2 * base)`, stable per URL
    fn latency_for(&self, url: &str) -> u64 {
        let spread = url.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        self.base_latency_ms + spread % self.base_latency_ms.max(1)
    }
}

fn page_for(url: &str) -> String {
    let page_type = PageType::classify(url);
    format!(
        "<!doctype html><html><head>\
         <link rel=\"stylesheet\" href=\"/static/site.css\">\
         <link rel=\"stylesheet\" href=\"/static/{kind}.css\">\
         <script src=\"/static/app.js\" defer></script>\
         </head><body class=\"{kind}\"><h1>{url}</h1>\
         <img src=\"/img/{kind}-hero.jpg\"></body></html>",
        kind = page_type.as_str(),
    )
}

impl Fetcher for SimulatedFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.requests.set(self.requests.get() + 1);
        let latency = self.latency_for(&request.url);
        self.clock.advance(latency);
        debug!(url = %request.url, latency, "simulated fetch");

        if request.url.contains("/missing") {
            return Ok(FetchResponse::new(404, "not found"));
        }
        Ok(FetchResponse::html(&page_for(&request.url)))
    }

    fn hint(&self, hint: &ResourceHint) {
        self.hints.set(self.hints.get() + 1);
        debug!(url = %hint.url, kind = hint.kind.as_str(), "resource hint");
    }
}

/// Navigator that logs what would be shown
#[derive(Default)]
pub struct LoggingNavigator {
    location: RefCell<String>,
}

impl LoggingNavigator {
    pub fn new(start: &str) -> Self {
        Self {
            location: RefCell::new(start.to_string()),
        }
    }
}

impl Navigator for LoggingNavigator {
    fn current_url(&self) -> String {
        self.location.borrow().clone()
    }

    fn render(&self, view: &RenderedView) {
        match view.source {
            RenderSource::Skeleton => debug!(url = %view.url, page = %view.page_type, "skeleton shown"),
            _ => debug!(url = %view.url, source = ?view.source, bytes = view.body.len(), "page rendered"),
        }
    }

    fn push_state(&self, url: &str) {
        *self.location.borrow_mut() = url.to_string();
    }

    fn full_reload(&self, url: &str) {
        info!(url, "full page load");
        *self.location.borrow_mut() = url.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nav_prefetch::Clock;

    #[test]
    fn test_latency_is_stable_and_bounded() {
        let fetcher = SimulatedFetcher::new(ManualClock::new(0), 100);
        let a = fetcher.latency_for("https://dir.example.com/business/1");
        assert_eq!(a, fetcher.latency_for("https://dir.example.com/business/1"));
        assert!((100..200).contains(&a));
    }

    #[test]
    fn test_fetch_advances_clock() {
        let clock = ManualClock::new(0);
        let fetcher = SimulatedFetcher::new(clock.clone(), 50);
        let resp = smol::block_on(fetcher.fetch(FetchRequest::get("https://dir.example.com/explore"))).unwrap();

        assert!(resp.is_html());
        assert!(clock.now_ms() >= 50);
        assert_eq!(fetcher.requests.get(), 1);
    }
}
