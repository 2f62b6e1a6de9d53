//! ATS platform adapters.
//!
//! One adapter per supported platform, behind [`AtsAdapter`]. The structural
//! adapters ([`AshbyAdapter`], [`GreenhouseAdapter`]) read known page shapes
//! and treat "nothing recognizable" as an empty list; [`GenericAdapter`]
//! hands cleaned page text to the extraction service and propagates its
//! failures, since there is no cheaper path left behind it.

mod ashby;
mod generic;
mod greenhouse;

pub use ashby::AshbyAdapter;
pub use generic::GenericAdapter;
pub use greenhouse::GreenhouseAdapter;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::ai::ExtractionAi;
use crate::error::Result;
use crate::models::SourceType;

#[async_trait]
pub trait AtsAdapter: Send + Sync {
    /// Adapter name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Extract absolute job posting URLs from a fetched board page.
    async fn extract_job_links(&self, html: &str, base_url: &Url) -> Result<Vec<Url>>;
}

/// Adapter for a company's ATS platform.
pub fn adapter_for(source: SourceType, ai: Arc<dyn ExtractionAi>) -> Box<dyn AtsAdapter> {
    match source {
        SourceType::Ashby => Box::new(AshbyAdapter::new()),
        SourceType::Greenhouse => Box::new(GreenhouseAdapter::new()),
        SourceType::Other => Box::new(GenericAdapter::new(ai)),
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

lazy_static! {
    static ref SCRIPT_RE: Regex = Regex::new(r"(?s)<script[^>]*>.*?</script>").unwrap();
    static ref STYLE_RE: Regex = Regex::new(r"(?s)<style[^>]*>.*?</style>").unwrap();
    static ref NOSCRIPT_RE: Regex = Regex::new(r"(?s)<noscript[^>]*>.*?</noscript>").unwrap();
    static ref ANCHOR_RE: Regex =
        Regex::new(r#"(?s)<a[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap();
    static ref TAG_RE: Regex = Regex::new(r"<[^>]+>").unwrap();
}

/// Resolve an extracted href against the board URL. Fragments are dropped
/// and only http(s) results count; anything unresolvable is skipped.
pub(crate) fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Order-preserving dedup by full URL string.
pub(crate) fn dedupe_urls(urls: Vec<Url>) -> Vec<Url> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|u| seen.insert(u.as_str().to_string()))
        .collect()
}

/// Boil board HTML down to text for link extraction. Anchors become
/// `[text](href)` so the URLs survive tag stripping.
pub(crate) fn clean_for_links(html: &str, max_chars: usize) -> String {
    let mut text = SCRIPT_RE.replace_all(html, " ").to_string();
    text = STYLE_RE.replace_all(&text, " ").to_string();
    text = NOSCRIPT_RE.replace_all(&text, " ").to_string();
    text = ANCHOR_RE.replace_all(&text, "[$2]($1)").to_string();
    text = TAG_RE.replace_all(&text, " ").to_string();
    truncate_chars(&collapse_whitespace(&text), max_chars)
}

/// Main readable content of a posting page, for detail extraction. Tries
/// common content containers before falling back to the whole document.
pub(crate) fn main_content_text(html: &str, max_chars: usize) -> String {
    let stripped = {
        let mut text = SCRIPT_RE.replace_all(html, " ").to_string();
        text = STYLE_RE.replace_all(&text, " ").to_string();
        NOSCRIPT_RE.replace_all(&text, " ").to_string()
    };
    let document = Html::parse_document(&stripped);

    let containers = [
        "main",
        "article",
        "[role='main']",
        "#content",
        ".content",
        ".posting",
        ".job-description",
    ];
    for selector_str in containers {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let text = element.text().collect::<Vec<_>>().join(" ");
                let collapsed = collapse_whitespace(&text);
                if !collapsed.is_empty() {
                    return truncate_chars(&collapsed, max_chars);
                }
            }
        }
    }

    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapse_whitespace(&text), max_chars)
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
