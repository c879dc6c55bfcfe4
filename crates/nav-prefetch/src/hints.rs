//! Secondary Resource Scanner
//!
//! Picks a small set of subresources out of a prefetched document so the
//! host can warm them too: stylesheets, first-party scripts and the first
//! few images. The set is capped so one prefetch cannot fan out into many.

use std::collections::HashSet;
use url::Url;

/// Kind of secondary resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Style,
    Script,
    Image,
}

impl ResourceKind {
    /// Value for a `<link rel=prefetch as=...>` hint
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Style => "style",
            ResourceKind::Script => "script",
            ResourceKind::Image => "image",
        }
    }
}

/// A subresource worth warming
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHint {
    pub url: String,
    pub kind: ResourceKind,
}

/// Scanner for subresource references in HTML
#[derive(Debug, Clone)]
pub struct SecondaryScanner {
    max_hints: usize,
    max_images: usize,
}

impl SecondaryScanner {
    pub fn new(max_hints: usize, max_images: usize) -> Self {
        Self { max_hints, max_images }
    }

    /// Scan `html` served from `page_url`, in document order
    pub fn scan(&self, html: &str, page_url: &Url) -> Vec<ResourceHint> {
        let lower = html.to_ascii_lowercase();
        let mut hints = Vec::new();
        let mut seen = HashSet::new();
        let mut images = 0;
        let mut pos = 0;

        while hints.len() < self.max_hints {
            let Some(offset) = lower[pos..].find('<') else { break };
            let start = pos + offset;
            let end = lower[start..].find('>').map(|e| start + e).unwrap_or(lower.len());
            let tag_lower = &lower[start..end];
            let tag = &html[start..end];
            pos = end.max(start + 1);

            let candidate = if tag_lower.starts_with("<link") {
                extract_attr(tag_lower, tag, "rel")
                    .filter(|rel| rel.to_ascii_lowercase().split_whitespace().any(|r| r == "stylesheet"))
                    .and_then(|_| extract_attr(tag_lower, tag, "href"))
                    .map(|href| (href, ResourceKind::Style))
            } else if tag_lower.starts_with("<script") {
                extract_attr(tag_lower, tag, "src").map(|src| (src, ResourceKind::Script))
            } else if tag_lower.starts_with("<img") && images < self.max_images {
                extract_attr(tag_lower, tag, "src").map(|src| (src, ResourceKind::Image))
            } else {
                None
            };

            let Some((raw, kind)) = candidate else { continue };
            if raw.trim_start().to_ascii_lowercase().starts_with("data:") {
                continue;
            }
            let Ok(resolved) = page_url.join(raw.trim()) else { continue };
            if kind == ResourceKind::Script && resolved.origin() != page_url.origin() {
                continue;
            }
            if kind == ResourceKind::Image {
                images += 1;
            }

            let url = resolved.to_string();
            if seen.insert(url.clone()) {
                hints.push(ResourceHint { url, kind });
            }
        }

        hints
    }
}

/// Attribute value from a tag, matched case-insensitively on the name.
/// `lower` is the ASCII-lowercased copy of `tag`, so byte offsets agree.
fn extract_attr<'a>(lower: &str, tag: &'a str, attr: &str) -> Option<&'a str> {
    let mut search = 0;
    while let Some(found) = lower[search..].find(attr) {
        let name_start = search + found;
        let name_end = name_start + attr.len();
        search = name_end;

        let boundary = lower[..name_start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_whitespace());
        if !boundary {
            continue;
        }

        let rest = lower[name_end..].trim_start();
        let Some(after_eq) = rest.strip_prefix('=') else { continue };
        let value_start = lower.len() - after_eq.trim_start().len();
        let quote = tag[value_start..].chars().next()?;

        return if quote == '"' || quote == '\'' {
            let body = &tag[value_start + 1..];
            body.find(quote).map(|end| &body[..end])
        } else {
            let body = &tag[value_start..];
            let end = body.find(|c: char| c.is_ascii_whitespace()).unwrap_or(body.len());
            Some(&body[..end]).filter(|v| !v.is_empty())
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://dir.example.com/business/1").unwrap()
    }

    #[test]
    fn test_scan_collects_kinds() {
        let html = r#"
            <html><head>
            <link rel="stylesheet" href="/static/app.css">
            <link rel="icon" href="/favicon.ico">
            <script src="/static/app.js" defer></script>
            <script src="https://cdn.other.com/lib.js"></script>
            </head><body>
            <IMG SRC="/img/a.jpg"><img src='/img/b.jpg'><img src=/img/c.jpg><img src="/img/d.jpg">
            </body></html>
        "#;
        let hints = SecondaryScanner::new(10, 3).scan(html, &page());
        let urls: Vec<&str> = hints.iter().map(|h| h.url.as_str()).collect();

        assert_eq!(
            urls,
            vec![
                "https://dir.example.com/static/app.css",
                "https://dir.example.com/static/app.js",
                "https://dir.example.com/img/a.jpg",
                "https://dir.example.com/img/b.jpg",
                "https://dir.example.com/img/c.jpg",
            ]
        );
        assert_eq!(hints[0].kind, ResourceKind::Style);
        assert_eq!(hints[1].kind, ResourceKind::Script);
    }

    #[test]
    fn test_scan_respects_total_cap() {
        let html = (0..20).map(|i| format!("<img src=\"/i{i}.png\">")).collect::<String>();
        let hints = SecondaryScanner::new(2, 10).scan(&html, &page());
        assert_eq!(hints.len(), 2);
    }

    #[test]
    fn test_scan_skips_data_and_duplicates() {
        let html = r#"<img src="data:image/png;base64,AAAA"><link rel="stylesheet" href="/a.css"><link rel="stylesheet" href="/a.css">"#;
        let hints = SecondaryScanner::new(10, 3).scan(html, &page());
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].url, "https://dir.example.com/a.css");
    }

    #[test]
    fn test_extract_attr_boundaries() {
        let tag = r#"<img data-src="/lazy.jpg" src="/real.jpg""#;
        let lower = tag.to_ascii_lowercase();
        assert_eq!(extract_attr(&lower, tag, "src"), Some("/real.jpg"));
        assert_eq!(extract_attr(&lower, tag, "alt"), None);
    }
}
