//! Fetch Contract
//!
//! The engine does not speak HTTP itself. A `Fetcher` supplied by the host
//! performs requests; dropping the returned future abandons the request,
//! which is how timeouts cancel in-flight work.

use crate::hints::ResourceHint;
use std::future::Future;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
        }
    }
}

/// Outgoing request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Deadline the engine enforces; informational for the fetcher
    pub timeout_ms: u64,
}

impl FetchRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: Method::Get,
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response returned by a fetcher
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// 200 response with an HTML body
    pub fn html(body: &str) -> Self {
        Self::new(200, body.as_bytes()).with_header("Content-Type", "text/html; charset=utf-8")
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// 2xx status
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("Content-Type").unwrap_or("application/octet-stream")
    }

    pub fn is_html(&self) -> bool {
        self.content_type().to_ascii_lowercase().starts_with("text/html")
    }

    pub fn text(&self) -> Result<String, FetchError> {
        String::from_utf8(self.body.clone()).map_err(|e| FetchError::Network(e.to_string()))
    }
}

/// Failure reported by a fetcher
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Network access supplied by the host
pub trait Fetcher {
    /// Perform a request. The future may be dropped before completion.
    fn fetch(&self, request: FetchRequest) -> impl Future<Output = Result<FetchResponse, FetchError>>;

    /// Opportunistic hint for a secondary resource (e.g. a `<link rel=prefetch>`).
    /// Hints are fire-and-forget.
    fn hint(&self, _hint: &ResourceHint) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = FetchRequest::get("https://example.com/business/1")
            .with_header("Purpose", "prefetch")
            .with_timeout(8_000);

        assert_eq!(req.method, Method::Get);
        assert_eq!(req.header("purpose"), Some("prefetch"));
        assert_eq!(req.timeout_ms, 8_000);
        assert_eq!(req.method.as_str(), "GET");
    }

    #[test]
    fn test_response_status() {
        assert!(FetchResponse::new(204, Vec::new()).ok());
        assert!(!FetchResponse::new(404, Vec::new()).ok());
        assert!(!FetchResponse::new(302, Vec::new()).ok());
    }

    #[test]
    fn test_response_html_detection() {
        let resp = FetchResponse::html("<p>hi</p>");
        assert!(resp.is_html());
        assert_eq!(resp.text().unwrap(), "<p>hi</p>");

        let json = FetchResponse::new(200, "{}").with_header("content-type", "application/json");
        assert!(!json.is_html());
        assert_eq!(FetchResponse::new(200, "x").content_type(), "application/octet-stream");
    }

    #[test]
    fn test_response_invalid_utf8() {
        let resp = FetchResponse::new(200, vec![0xff, 0xfe]);
        assert!(matches!(resp.text(), Err(FetchError::Network(_))));
    }
}
