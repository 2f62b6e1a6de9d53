//! Job detail enrichment.
//!
//! Placeholder rows created by reconciliation carry nothing but a URL. The
//! enricher fetches the posting page (rendering it when the ATS requires
//! JS), hands the cleaned text to the extraction service, and patches the
//! row with whatever came back. Failures are recorded against the company,
//! because backoff is company-granular, and surface as a non-fatal outcome
//! rather than an `Err`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::ai::ExtractionAi;
use crate::ats::main_content_text;
use crate::error::{ErrorKind, Result};
use crate::fetch::FetcherSet;
use crate::models::{Job, JobId, ScrapingError};
use crate::store::ScraperStore;

/// Posting pages are a single listing; this is plenty of text for the
/// extractor and keeps token usage bounded.
const CONTENT_MAX_CHARS: usize = 20_000;

/// What one enrichment attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichOutcome {
    /// Details extracted and stored.
    Enriched { fields: usize },
    /// Page fetched fine but the extractor found nothing. The job is still
    /// marked fetched so the queue does not revisit it forever.
    NothingExtracted,
    /// Nothing to do for this row.
    Skipped { reason: &'static str },
    /// Fetch or extraction failed. Recorded against the company; never
    /// bubbled as an `Err`.
    Failed { kind: ErrorKind, message: String },
}

pub struct JobEnricher<S> {
    store: Arc<S>,
    fetchers: FetcherSet,
    ai: Arc<dyn ExtractionAi>,
}

impl<S: ScraperStore> JobEnricher<S> {
    pub fn new(store: Arc<S>, fetchers: FetcherSet, ai: Arc<dyn ExtractionAi>) -> Self {
        Self {
            store,
            fetchers,
            ai,
        }
    }

    /// Enrich one placeholder job. Skips rows that are already fetched or
    /// were soft-deleted since the task was scheduled; the queue is
    /// at-least-once, so stale deliveries are normal.
    pub async fn enrich_job(&self, job_id: JobId) -> Result<EnrichOutcome> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(EnrichOutcome::Skipped {
                reason: "job no longer exists",
            });
        };
        if !job.is_active() {
            return Ok(EnrichOutcome::Skipped {
                reason: "job was soft-deleted",
            });
        }
        if job.is_fetched {
            return Ok(EnrichOutcome::Skipped {
                reason: "details already fetched",
            });
        }
        self.fetch_and_apply(job).await
    }

    /// Operator-forced re-extraction. Runs even for rows already marked
    /// fetched; existing fields survive unless the new extraction fills them.
    pub async fn refetch_job(&self, job_id: JobId) -> Result<EnrichOutcome> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(EnrichOutcome::Skipped {
                reason: "job no longer exists",
            });
        };
        self.fetch_and_apply(job).await
    }

    async fn fetch_and_apply(&self, job: Job) -> Result<EnrichOutcome> {
        let Some(company) = self.store.get_company(job.company_id).await? else {
            return Ok(EnrichOutcome::Skipped {
                reason: "company no longer exists",
            });
        };

        let fetcher = self.fetchers.for_details(company.source_type);
        debug!(
            job_id = %job.id,
            url = %job.url,
            fetcher = fetcher.name(),
            "fetching posting page"
        );

        let page = match fetcher.fetch(&job.url).await {
            Ok(page) => page,
            Err(e) => {
                return self
                    .record_failure(&job, ErrorKind::JobFetchFailed, e.to_string())
                    .await;
            }
        };

        let content = main_content_text(&page.html, CONTENT_MAX_CHARS);
        let extracted = match self.ai.extract_job_details(&content, &job.url).await {
            Ok(extracted) => extracted,
            Err(e) => {
                return self
                    .record_failure(&job, ErrorKind::JobDetailsFailed, e.to_string())
                    .await;
            }
        };

        // Empty extraction still flips is_fetched: the page may simply be a
        // shell, and retrying it forever would burn tokens for nothing.
        self.store.apply_job_details(job.id, &extracted).await?;

        if extracted.is_empty() {
            warn!(job_id = %job.id, url = %job.url, "extraction returned no fields");
            Ok(EnrichOutcome::NothingExtracted)
        } else {
            let fields = extracted.filled_field_count();
            info!(job_id = %job.id, url = %job.url, fields, "job enriched");
            Ok(EnrichOutcome::Enriched { fields })
        }
    }

    async fn record_failure(
        &self,
        job: &Job,
        kind: ErrorKind,
        message: String,
    ) -> Result<EnrichOutcome> {
        warn!(
            job_id = %job.id,
            company_id = %job.company_id,
            url = %job.url,
            kind = kind.as_str(),
            error = %message,
            "job enrichment failed"
        );
        let scoped = ScrapingError::new(kind, message.clone())
            .with_url(job.url.clone())
            .with_timestamp(Utc::now());
        if let Err(e) = self
            .store
            .record_scrape_failure(job.company_id, scoped)
            .await
        {
            // The attempt still reports its own failure; losing the error
            // record only delays backoff.
            error!(company_id = %job.company_id, error = %e, "failed to record enrichment error");
        }
        Ok(EnrichOutcome::Failed { kind, message })
    }
}
