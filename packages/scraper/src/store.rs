//! Storage abstraction.
//!
//! Three narrow traits plus the [`ScraperStore`] umbrella the pipeline is
//! generic over. Company updates that touch backoff go through the
//! `record_*` methods so each implementation can make the read-modify-write
//! atomic its own way: a process-wide lock in memory, a row lock in
//! Postgres. The backoff arithmetic itself lives in [`crate::backoff`]
//! either way.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Company, CompanyId, ExtractedDetails, Job, JobId, ScrapeMetrics, ScrapingError,
};

#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn insert_company(&self, company: &Company) -> Result<()>;

    async fn get_company(&self, id: CompanyId) -> Result<Option<Company>>;

    async fn list_companies(&self) -> Result<Vec<Company>>;

    /// Append a failure, prune the rolling error window, and advance backoff,
    /// as one atomic update. Returns the updated company.
    async fn record_scrape_failure(&self, id: CompanyId, error: ScrapingError) -> Result<Company>;

    /// Reset consecutive failures, decay the backoff level one step, and
    /// stamp `last_scraped`, as one atomic update.
    async fn record_scrape_success(&self, id: CompanyId, at: DateTime<Utc>) -> Result<Company>;

    /// Manual reset: wipe recorded errors and backoff state. The only way
    /// back in once a company hits the lifetime failure cap.
    async fn clear_company_errors(&self, id: CompanyId) -> Result<()>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Lookup by exact URL, deleted or not. Reconciliation needs soft-deleted
    /// rows to restore reappearing postings instead of duplicating them.
    async fn find_job_by_url(&self, company_id: CompanyId, url: &str) -> Result<Option<Job>>;

    /// Jobs without a `deleted_at`.
    async fn active_jobs(&self, company_id: CompanyId) -> Result<Vec<Job>>;

    /// Active jobs the enricher has not processed yet.
    async fn unfetched_jobs(&self, company_id: CompanyId) -> Result<Vec<Job>>;

    /// Bump `last_scraped`.
    async fn touch_job(&self, id: JobId, at: DateTime<Utc>) -> Result<()>;

    /// Clear `deleted_at` and bump `last_scraped`.
    async fn restore_job(&self, id: JobId, at: DateTime<Utc>) -> Result<()>;

    async fn soft_delete_job(&self, id: JobId, at: DateTime<Utc>) -> Result<()>;

    /// Patch extracted fields onto the job and mark it fetched. An empty
    /// extraction still marks it fetched so the queue never loops on it.
    async fn apply_job_details(&self, id: JobId, extracted: &ExtractedDetails) -> Result<()>;
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Append one scrape-attempt record. Nothing ever updates these rows.
    async fn record_metrics(&self, metrics: &ScrapeMetrics) -> Result<()>;
}

/// Everything the pipeline needs from storage.
pub trait ScraperStore: CompanyStore + JobStore + MetricsSink {}

impl<T: CompanyStore + JobStore + MetricsSink> ScraperStore for T {}
