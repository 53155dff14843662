//! Content handling: turning a fetched body into links and metadata
//!
//! The scheduler does not interpret content itself. It hands each successful
//! response to a `ContentHandler` and follows whatever links come back.

use scraper::{Html, Selector};
use url::Url;

/// What a content handler extracted from one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContent {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Absolute URLs to consider for the frontier, in document order
    pub links: Vec<String>,
}

/// Extracts links and structured data from a response body
///
/// Called from the fetch task once a 2xx body has been read, so it never
/// blocks the dispatcher loop. Implementations should stay CPU-bound.
pub trait ContentHandler: Send + Sync {
    fn extract(&self, url: &Url, content_type: Option<&str>, body: &[u8]) -> ExtractedContent;
}

/// Default handler: parses HTML with `scraper`
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links and data URIs
/// - Fragment-only links
///
/// `rel="nofollow"` links are followed. Non-HTML responses yield nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlContentHandler;

impl ContentHandler for HtmlContentHandler {
    fn extract(&self, url: &Url, content_type: Option<&str>, body: &[u8]) -> ExtractedContent {
        if let Some(content_type) = content_type {
            let content_type = content_type.to_ascii_lowercase();
            if !content_type.contains("text/html") && !content_type.contains("xhtml") {
                return ExtractedContent::default();
            }
        }

        let html = String::from_utf8_lossy(body);
        parse_html(&html, url)
    }
}

/// Parses HTML content and extracts the title and links
///
/// # Example
///
/// ```
/// use roamer::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links, vec!["https://example.com/page"]);
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ExtractedContent {
    let document = Html::parse_document(html);

    ExtractedContent {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(absolute_url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(absolute_url);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(absolute_url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(absolute_url);
            }
        }
    }

    links
}

/// Resolves a link href to an absolute http(s) URL
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    match absolute_url.scheme() {
        "http" | "https" => Some(absolute_url.to_string()),
        _ => None,
    }
}
