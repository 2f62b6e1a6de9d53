//! Canned fakes for pipeline tests.
//!
//! Everything here runs without network, database, or provider keys:
//! [`MockFetcher`] serves canned pages or canned failures, [`MockAi`]
//! answers extraction calls from fixtures, and [`RecordingQueue`] captures
//! what got scheduled instead of running it. The HTML builders produce the
//! minimal page shapes each adapter family recognizes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::ai::ExtractionAi;
use crate::error::{ErrorKind, Result, ScrapeError};
use crate::fetch::{FetchedPage, PageFetcher};
use crate::models::ExtractedDetails;
use crate::queue::{ScrapeTask, TaskQueue};

// ============================================================================
// Fetcher
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum CannedFailure {
    Status(u16),
    Blocked,
    Timeout,
}

/// Serves canned HTML per URL. URLs with no canned page come back 404.
#[derive(Default)]
pub struct MockFetcher {
    pages: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<String, CannedFailure>>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_page(&self, url: impl Into<String>, html: impl Into<String>) {
        self.pages.lock().unwrap().insert(url.into(), html.into());
    }

    pub fn fail_with_status(&self, url: impl Into<String>, status: u16) {
        self.failures
            .lock()
            .unwrap()
            .insert(url.into(), CannedFailure::Status(status));
    }

    pub fn fail_blocked(&self, url: impl Into<String>) {
        self.failures
            .lock()
            .unwrap()
            .insert(url.into(), CannedFailure::Blocked);
    }

    pub fn fail_timeout(&self, url: impl Into<String>) {
        self.failures
            .lock()
            .unwrap()
            .insert(url.into(), CannedFailure::Timeout);
    }

    /// URLs fetched, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        self.calls.lock().unwrap().push(url.to_string());

        if let Some(failure) = self.failures.lock().unwrap().get(url).copied() {
            return Err(match failure {
                CannedFailure::Status(status) => ScrapeError::HttpStatus {
                    status,
                    url: url.to_string(),
                },
                CannedFailure::Blocked => ScrapeError::Blocked {
                    url: url.to_string(),
                },
                CannedFailure::Timeout => ScrapeError::Request {
                    url: url.to_string(),
                    message: "deadline exceeded".into(),
                    kind: ErrorKind::Timeout,
                },
            });
        }

        match self.pages.lock().unwrap().get(url) {
            Some(html) => Ok(FetchedPage {
                url: url.to_string(),
                status: 200,
                html: html.clone(),
            }),
            None => Err(ScrapeError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

// ============================================================================
// Extraction service
// ============================================================================

/// Answers extraction calls from fixtures and logs every call.
#[derive(Default)]
pub struct MockAi {
    links: Mutex<Vec<String>>,
    details_by_url: Mutex<HashMap<String, ExtractedDetails>>,
    default_details: Mutex<ExtractedDetails>,
    fail_links: Mutex<bool>,
    fail_details: Mutex<bool>,
    link_calls: Mutex<Vec<String>>,
    detail_calls: Mutex<Vec<String>>,
}

impl MockAi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links returned for every `extract_job_links` call.
    pub fn set_links(&self, links: &[&str]) {
        *self.links.lock().unwrap() = links.iter().map(|s| s.to_string()).collect();
    }

    /// Details returned for one specific posting URL.
    pub fn set_details_for(&self, url: impl Into<String>, details: ExtractedDetails) {
        self.details_by_url
            .lock()
            .unwrap()
            .insert(url.into(), details);
    }

    /// Details returned for posting URLs with no per-URL fixture.
    /// Defaults to an all-empty object.
    pub fn set_default_details(&self, details: ExtractedDetails) {
        *self.default_details.lock().unwrap() = details;
    }

    pub fn fail_link_extraction(&self) {
        *self.fail_links.lock().unwrap() = true;
    }

    pub fn fail_detail_extraction(&self) {
        *self.fail_details.lock().unwrap() = true;
    }

    pub fn link_calls(&self) -> Vec<String> {
        self.link_calls.lock().unwrap().clone()
    }

    pub fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionAi for MockAi {
    async fn extract_job_links(&self, _content: &str, page_url: &Url) -> Result<Vec<String>> {
        self.link_calls.lock().unwrap().push(page_url.to_string());
        if *self.fail_links.lock().unwrap() {
            return Err(ScrapeError::extraction("canned link extraction failure"));
        }
        Ok(self.links.lock().unwrap().clone())
    }

    async fn extract_job_details(
        &self,
        _content: &str,
        page_url: &str,
    ) -> Result<ExtractedDetails> {
        self.detail_calls.lock().unwrap().push(page_url.to_string());
        if *self.fail_details.lock().unwrap() {
            return Err(ScrapeError::extraction("canned detail extraction failure"));
        }
        if let Some(details) = self.details_by_url.lock().unwrap().get(page_url) {
            return Ok(details.clone());
        }
        Ok(self.default_details.lock().unwrap().clone())
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Captures scheduled tasks instead of executing them.
#[derive(Default)]
pub struct RecordingQueue {
    scheduled: Mutex<Vec<(ScrapeTask, Duration)>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<(ScrapeTask, Duration)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn task_count(&self) -> usize {
        self.scheduled.lock().unwrap().len()
    }

    /// URLs of the scheduled detail fetches, in schedule order.
    pub fn detail_fetch_urls(&self) -> Vec<String> {
        self.scheduled
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(task, _)| match task {
                ScrapeTask::FetchJobDetails { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task: ScrapeTask, delay: Duration) -> Result<()> {
        self.scheduled.lock().unwrap().push((task, delay));
        Ok(())
    }
}

// ============================================================================
// Page fixtures
// ============================================================================

/// Ashby-style board: postings as embedded JSON state, no anchors.
pub fn ashby_board_html(postings: &[(&str, &str)]) -> String {
    let entries = postings
        .iter()
        .map(|(id, title)| format!(r#"{{"id":"{id}","title":"{title}"}}"#))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        r#"<html><body><div id="root"></div><script>window.__appData = {{"jobBoard":{{"jobPostings": [{entries}]}}}};</script></body></html>"#
    )
}

/// Greenhouse-style board: one anchor per opening under `/jobs/<id>`.
pub fn greenhouse_board_html(hrefs: &[&str]) -> String {
    let anchors = hrefs
        .iter()
        .map(|href| format!(r#"<div class="opening"><a href="{href}">Opening</a></div>"#))
        .collect::<Vec<_>>()
        .join("\n");
    format!("<html><body><main>{anchors}</main></body></html>")
}

/// A single posting page with enough text for detail extraction.
pub fn posting_html(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head>\
         <body><nav>Home</nav><main><h1>{title}</h1><p>{body}</p></main>\
         <footer>About us</footer></body></html>"
    )
}
