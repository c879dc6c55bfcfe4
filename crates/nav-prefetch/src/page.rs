//! Page Types and Routes
//!
//! Classifies directory URLs into page types and builds URLs back from
//! profile entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Kind of page a URL points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Home,
    Search,
    Category,
    BusinessDetail,
    Reviews,
    Explore,
    Other,
}

impl PageType {
    /// Classify an absolute URL or a site-relative path
    pub fn classify(url: &str) -> Self {
        match parse_loose(url) {
            Some(parsed) => Self::classify_path(parsed.path()),
            None => PageType::Other,
        }
    }

    /// Classify a URL path
    pub fn classify_path(path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [] => PageType::Home,
            ["search", ..] => PageType::Search,
            ["category", ..] | ["categories", ..] => PageType::Category,
            ["business", _, "reviews", ..] => PageType::Reviews,
            ["business", _, ..] => PageType::BusinessDetail,
            ["explore", ..] => PageType::Explore,
            _ => PageType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Home => "homepage",
            PageType::Search => "search_results",
            PageType::Category => "category",
            PageType::BusinessDetail => "business_detail",
            PageType::Reviews => "reviews",
            PageType::Explore => "explore",
            PageType::Other => "other",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse absolute URLs as-is and relative ones against a placeholder origin
fn parse_loose(url: &str) -> Option<Url> {
    match Url::parse(url) {
        Ok(parsed) => Some(parsed),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse("http://localhost/").ok()?.join(url).ok()
        }
        Err(_) => None,
    }
}

/// Resolve `raw` against `base` into the key used for caching and
/// in-flight tracking: an absolute http(s) URL without fragment.
pub fn normalize_url(base: &Url, raw: &str) -> Option<String> {
    let mut url = base.join(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Business id for detail and review pages
pub fn business_id(url: &str) -> Option<String> {
    let parsed = parse_loose(url)?;
    let mut segments = parsed.path_segments()?;
    match (segments.next(), segments.next()) {
        (Some("business"), Some(id)) if !id.is_empty() => Some(id.to_string()),
        _ => None,
    }
}

/// Value of the `q` parameter on search pages
pub fn search_query(url: &str) -> Option<String> {
    let parsed = parse_loose(url)?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "q")
        .map(|(_, v)| v.into_owned())
        .filter(|q| !q.trim().is_empty())
}

/// Lowercased, hyphen-separated form of a category name
pub fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

pub fn category_url(category: &str) -> String {
    format!("/category/{}", slugify(category))
}

pub fn search_url(query: &str) -> String {
    format!("/search?q={}", encode(query))
}

pub fn business_url(id: &str) -> String {
    format!("/business/{id}")
}

pub fn reviews_url(id: &str) -> String {
    format!("/business/{id}/reviews")
}

pub fn explore_url(location: Option<&str>) -> String {
    match location {
        Some(loc) => format!("/explore?location={}", encode(loc)),
        None => "/explore".to_string(),
    }
}
