//! Greenhouse job boards.
//!
//! Greenhouse renders plain anchors whose hrefs contain `/jobs/<id>`. The
//! markup around them varies between hosted and embedded boards, but the
//! href shape is stable, so one regex over the raw HTML is all it takes.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;
use url::Url;

use super::{dedupe_urls, resolve_link, AtsAdapter};
use crate::error::Result;

lazy_static! {
    static ref JOB_HREF_RE: Regex =
        Regex::new(r#"href\s*=\s*["']([^"']*/jobs/\d+[^"']*)["']"#).unwrap();
}

#[derive(Debug, Default)]
pub struct GreenhouseAdapter;

impl GreenhouseAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AtsAdapter for GreenhouseAdapter {
    fn name(&self) -> &'static str {
        "greenhouse"
    }

    async fn extract_job_links(&self, html: &str, base_url: &Url) -> Result<Vec<Url>> {
        let urls: Vec<Url> = JOB_HREF_RE
            .captures_iter(html)
            .filter_map(|cap| cap.get(1))
            .filter_map(|m| resolve_link(base_url, m.as_str()))
            .collect();

        if urls.is_empty() {
            debug!(board = %base_url, "no greenhouse job links found");
        }
        Ok(dedupe_urls(urls))
    }
}
