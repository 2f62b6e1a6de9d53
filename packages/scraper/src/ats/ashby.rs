//! Ashby job boards.
//!
//! Ashby ships board data as JSON embedded in script state rather than as
//! anchor tags. The primary path slices the `"jobPostings":` array out of
//! that state with a bracket scanner and parses it; if the embedded shape
//! ever changes, a UUID-proximity heuristic over the raw HTML is the
//! fallback. Posting URLs are `<board-url>/<posting-id>`.

use std::collections::HashSet;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{dedupe_urls, truncate_chars, AtsAdapter};
use crate::error::Result;

const JOB_POSTINGS_MARKER: &str = "\"jobPostings\":";
/// How close to a UUID a "title" key must sit for the fallback to take the
/// UUID as a posting id.
const TITLE_PROXIMITY_CHARS: usize = 300;

lazy_static! {
    static ref UUID_RE: Regex =
        Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .unwrap();
}

#[derive(Debug, Deserialize)]
struct AshbyPosting {
    id: String,
}

#[derive(Debug, Default)]
pub struct AshbyAdapter;

impl AshbyAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Slice out the JSON array that follows the marker. Tracks string and
    /// escape state so brackets inside posting titles do not end the scan
    /// early.
    fn job_postings_slice(html: &str) -> Option<&str> {
        let marker_at = html.find(JOB_POSTINGS_MARKER)?;
        let after = &html[marker_at + JOB_POSTINGS_MARKER.len()..];
        let start = after.find('[')?;
        // Only whitespace may sit between the marker and the array.
        if !after[..start].trim().is_empty() {
            return None;
        }

        let bytes = after.as_bytes();
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if escaped {
                escaped = false;
                continue;
            }
            match b {
                b'\\' if in_string => escaped = true,
                b'"' => in_string = !in_string,
                b'[' if !in_string => depth += 1,
                b']' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&after[start..=i]);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Fallback id harvest: any UUID with a "title" key nearby. Catches
    /// renamed state keys as long as postings still carry UUID ids.
    fn uuid_candidates(html: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for m in UUID_RE.find_iter(html) {
            if !near_title(html, m.start(), m.end()) {
                continue;
            }
            let id = m.as_str().to_string();
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
        ids
    }

    /// Posting URL for an Ashby job id. Plain string joining; `Url::join`
    /// would swallow the last path segment of a board URL that has no
    /// trailing slash.
    fn posting_url(base: &Url, id: &str) -> Option<Url> {
        let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), id);
        Url::parse(&joined).ok()
    }
}

fn near_title(html: &str, match_start: usize, match_end: usize) -> bool {
    let mut start = match_start.saturating_sub(TITLE_PROXIMITY_CHARS);
    let mut end = (match_end + TITLE_PROXIMITY_CHARS).min(html.len());
    while start > 0 && !html.is_char_boundary(start) {
        start -= 1;
    }
    while end < html.len() && !html.is_char_boundary(end) {
        end += 1;
    }
    html[start..end].contains("\"title\"")
}

#[async_trait]
impl AtsAdapter for AshbyAdapter {
    fn name(&self) -> &'static str {
        "ashby"
    }

    async fn extract_job_links(&self, html: &str, base_url: &Url) -> Result<Vec<Url>> {
        let ids: Vec<String> = match Self::job_postings_slice(html) {
            Some(slice) => match serde_json::from_str::<Vec<AshbyPosting>>(slice) {
                Ok(postings) => postings.into_iter().map(|p| p.id).collect(),
                Err(e) => {
                    debug!(error = %e, "embedded postings array did not parse, trying uuid fallback");
                    Self::uuid_candidates(html)
                }
            },
            None => {
                debug!("no jobPostings marker, trying uuid fallback");
                Self::uuid_candidates(html)
            }
        };

        if ids.is_empty() {
            warn!(
                board = %base_url,
                sample = %truncate_chars(html, 400),
                "ashby board yielded no posting ids"
            );
            return Ok(Vec::new());
        }

        let urls = ids
            .iter()
            .filter_map(|id| Self::posting_url(base_url, id))
            .collect();
        Ok(dedupe_urls(urls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD: &str = "https://jobs.ashbyhq.com/initech";

    fn board_url() -> Url {
        Url::parse(BOARD).unwrap()
    }

    #[tokio::test]
    async fn parses_embedded_postings_array() {
        let html = r#"<script>window.__appData = {"jobBoard":{"jobPostings": [
                {"id":"11111111-2222-3333-4444-555555555555","title":"Engineer [Core]","teamId":"t1"},
                {"id":"aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee","title":"Designer \"UI\"","teamId":"t2"}
            ]}};</script>"#;
        let links = AshbyAdapter::new()
            .extract_job_links(html, &board_url())
            .await
            .unwrap();
        assert_eq!(
            links.iter().map(|u| u.as_str()).collect::<Vec<_>>(),
            vec![
                "https://jobs.ashbyhq.com/initech/11111111-2222-3333-4444-555555555555",
                "https://jobs.ashbyhq.com/initech/aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
            ]
        );
    }

    #[test]
    fn scanner_survives_brackets_and_escapes_inside_strings() {
        let html = r#"{"jobPostings": [{"id":"x","title":"a ] tricky \" [title]"},{"id":"y","tags":["a","b"]}] ,"next":1}"#;
        let slice = AshbyAdapter::job_postings_slice(html).unwrap();
        assert!(slice.starts_with('['));
        assert!(slice.ends_with(']'));
        assert!(slice.contains("tricky"));
        assert!(!slice.contains("next"));
    }

    #[test]
    fn scanner_rejects_marker_without_adjacent_array() {
        let html = r#""jobPostings": {"count": 3} ["unrelated"]"#;
        assert!(AshbyAdapter::job_postings_slice(html).is_none());
    }

    #[tokio::test]
    async fn uuid_fallback_requires_title_nearby() {
        // Renamed state key, so the scanner misses; two UUIDs, but only one
        // sits within proximity of a title key.
        let filler = "x".repeat(400);
        let html = format!(
            r#"{{"openings": [
                {{"id":"11111111-2222-3333-4444-555555555555","title":"Engineer"}}
            ], "filler":"{filler}", "sessionToken":"99999999-8888-7777-6666-555555555555"}}"#
        );
        let links = AshbyAdapter::new()
            .extract_job_links(&html, &board_url())
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert!(links[0]
            .as_str()
            .ends_with("11111111-2222-3333-4444-555555555555"));
    }

    #[tokio::test]
    async fn unrecognizable_page_is_empty_not_an_error() {
        let links = AshbyAdapter::new()
            .extract_job_links("<html><body>maintenance</body></html>", &board_url())
            .await
            .unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn posting_url_appends_to_full_board_path() {
        let base = Url::parse("https://jobs.ashbyhq.com/initech").unwrap();
        let url = AshbyAdapter::posting_url(&base, "abc").unwrap();
        assert_eq!(url.as_str(), "https://jobs.ashbyhq.com/initech/abc");

        let with_slash = Url::parse("https://jobs.ashbyhq.com/initech/").unwrap();
        let url = AshbyAdapter::posting_url(&with_slash, "abc").unwrap();
        assert_eq!(url.as_str(), "https://jobs.ashbyhq.com/initech/abc");
    }

    #[tokio::test]
    async fn duplicate_ids_collapse() {
        let html = r#"{"jobPostings": [
            {"id":"11111111-2222-3333-4444-555555555555"},
            {"id":"11111111-2222-3333-4444-555555555555"}
        ]}"#;
        let links = AshbyAdapter::new()
            .extract_job_links(html, &board_url())
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
    }
}
