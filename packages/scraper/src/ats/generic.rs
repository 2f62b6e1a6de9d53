//! Fallback adapter for unrecognized platforms.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{clean_for_links, dedupe_urls, resolve_link, AtsAdapter};
use crate::ai::ExtractionAi;
use crate::error::Result;

const MAX_BOARD_CONTENT_CHARS: usize = 40_000;

/// Hands cleaned board text to the extraction service and resolves whatever
/// URLs come back. There is no cheaper path behind this adapter, so service
/// failures propagate instead of degrading to an empty list.
pub struct GenericAdapter {
    ai: Arc<dyn ExtractionAi>,
}

impl GenericAdapter {
    pub fn new(ai: Arc<dyn ExtractionAi>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl AtsAdapter for GenericAdapter {
    fn name(&self) -> &'static str {
        "generic"
    }

    async fn extract_job_links(&self, html: &str, base_url: &Url) -> Result<Vec<Url>> {
        let content = clean_for_links(html, MAX_BOARD_CONTENT_CHARS);
        let raw = self.ai.extract_job_links(&content, base_url).await?;
        debug!(raw = raw.len(), board = %base_url, "extraction service returned links");

        let urls = raw
            .iter()
            .filter_map(|href| resolve_link(base_url, href))
            .collect();
        Ok(dedupe_urls(urls))
    }
}
