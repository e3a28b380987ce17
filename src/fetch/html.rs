//! DOM helpers: outbound anchors and embedded frames of a page

use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid anchor selector"));
static FRAMES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("iframe[src]").expect("valid iframe selector"));

/// The parts of an HTML page a crawl cares about
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    /// URL the page was fetched from
    pub url: Url,

    /// Absolute anchor targets in document order, fragments stripped, deduplicated
    pub anchors: Vec<Url>,

    /// Absolute iframe sources in document order, deduplicated
    pub frames: Vec<Url>,
}

/// Parse an HTML document, resolving links against `url`.
pub fn parse_page(url: &Url, html: &str) -> ParsedPage {
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let anchors = document
        .select(&ANCHORS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve(url, href))
        .map(|mut link| {
            link.set_fragment(None);
            link
        })
        .filter(|link| seen.insert(link.clone()))
        .collect();

    let mut seen = HashSet::new();
    let frames = document
        .select(&FRAMES)
        .filter_map(|f| f.value().attr("src"))
        .filter_map(|src| resolve(url, src))
        .filter(|src| seen.insert(src.clone()))
        .collect();

    ParsedPage {
        url: url.clone(),
        anchors,
        frames,
    }
}

fn resolve(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with("javascript:") || reference.starts_with("mailto:") {
        return None;
    }
    match base.join(reference) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
        Ok(_) => None,
        Err(e) => {
            debug!("Skipping unresolvable link '{}': {}", reference, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page() {
        let base = Url::parse("https://site/members/").unwrap();
        let html = r##"
            <html><body>
              <a href="/a/1">one</a>
              <a href="https://site/a/2#comments">two</a>
              <a href="/a/1">one again</a>
              <a href="mailto:someone@site">mail</a>
              <a href="">empty</a>
              <iframe src="https://player/embed/v1abc/"></iframe>
              <iframe src="https://player/embed/v1abc/"></iframe>
              <iframe></iframe>
            </body></html>
        "##;

        let page = parse_page(&base, html);
        let anchors: Vec<&str> = page.anchors.iter().map(Url::as_str).collect();
        assert_eq!(anchors, vec!["https://site/a/1", "https://site/a/2"]);
        assert_eq!(page.frames.len(), 1);
        assert_eq!(page.frames[0].as_str(), "https://player/embed/v1abc/");
    }

    #[test]
    fn test_parse_page_without_links() {
        let base = Url::parse("https://site/").unwrap();
        let page = parse_page(&base, "<p>nothing here</p>");
        assert!(page.anchors.is_empty());
        assert!(page.frames.is_empty());
    }
}
