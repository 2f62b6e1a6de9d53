//! Extraction service abstraction.
//!
//! The pipeline owns its prompts and schemas; an implementation only has to
//! run them. Everything takes `Arc<dyn ExtractionAi>` so tests can swap in a
//! canned mock without touching any provider.

pub mod openai;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::models::ExtractedDetails;

#[async_trait]
pub trait ExtractionAi: Send + Sync {
    /// Best-effort list of job posting URLs found in cleaned page content.
    /// Entries may be relative; callers resolve them against `page_url`.
    async fn extract_job_links(&self, content: &str, page_url: &Url) -> Result<Vec<String>>;

    /// Structured fields for a single posting page. Every field is optional;
    /// an empty result is a valid answer, not an error.
    async fn extract_job_details(&self, content: &str, page_url: &str)
        -> Result<ExtractedDetails>;
}
