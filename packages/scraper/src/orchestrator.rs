//! Per-company scrape driver and fleet-wide loop.
//!
//! One `scrape_company` call is the unit of work: backoff gate, board
//! fetch, adapter dispatch, reconciliation, metrics, then detail-fetch
//! scheduling. Failures are recorded against the company (feeding backoff)
//! and a metrics row is appended before the error is returned, so callers
//! only decide whether to keep going. The fleet driver does exactly that.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::ai::ExtractionAi;
use crate::ats::adapter_for;
use crate::backoff::{should_skip, status_description};
use crate::config::ScrapeSettings;
use crate::enrich::JobEnricher;
use crate::error::{Result, ScrapeError};
use crate::fetch::FetcherSet;
use crate::models::{Company, CompanyId, JobId, ScrapeMetrics, ScrapingError};
use crate::queue::{ScrapeTask, TaskHandler, TaskQueue};
use crate::reconcile::{reconcile_job_links, ReconcileOutcome};
use crate::store::ScraperStore;

/// What a company scrape did, when it did not error out.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeOutcome {
    /// Backoff said not yet. No HTTP was issued and no metrics appended.
    Skipped { reason: String },
    /// The full pipeline ran.
    Completed {
        total_found: usize,
        new_jobs: usize,
        skipped_jobs: usize,
        soft_deleted_jobs: usize,
        scheduled_detail_fetches: usize,
    },
}

/// Tally of one fleet pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetSummary {
    pub companies_scheduled: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub detail_fetches_scheduled: usize,
}

pub struct ScrapeOrchestrator<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
    fetchers: FetcherSet,
    ai: Arc<dyn ExtractionAi>,
    settings: ScrapeSettings,
}

impl<S, Q> ScrapeOrchestrator<S, Q>
where
    S: ScraperStore,
    Q: TaskQueue,
{
    pub fn new(
        store: Arc<S>,
        queue: Arc<Q>,
        fetchers: FetcherSet,
        ai: Arc<dyn ExtractionAi>,
    ) -> Self {
        Self {
            store,
            queue,
            fetchers,
            ai,
            settings: ScrapeSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ScrapeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Scrape one company's board end to end.
    ///
    /// Per-invocation ordering is fixed: links are extracted before
    /// reconciliation, and detail fetches are scheduled only after the
    /// placeholder rows exist.
    pub async fn scrape_company(&self, company_id: CompanyId) -> Result<ScrapeOutcome> {
        let company = self
            .store
            .get_company(company_id)
            .await?
            .ok_or(ScrapeError::CompanyNotFound(company_id))?;

        let now = Utc::now();
        if should_skip(&company.backoff, now) {
            let reason = status_description(&company.backoff, now);
            info!(
                company_id = %company_id,
                company = %company.name,
                reason = %reason,
                "skipping scrape due to backoff"
            );
            return Ok(ScrapeOutcome::Skipped { reason });
        }

        info!(
            company_id = %company_id,
            company = %company.name,
            source = %company.source_type,
            url = %company.job_board_url,
            "scraping job board"
        );

        sleep(self.settings.job_board_delay).await;
        let started = Instant::now();

        let page = match self
            .fetchers
            .board()
            .fetch(company.job_board_url.as_str())
            .await
        {
            Ok(page) => page,
            Err(e) => return self.fail(&company, e, started).await,
        };

        let adapter = adapter_for(company.source_type, self.ai.clone());
        let links = match adapter
            .extract_job_links(&page.html, &company.job_board_url)
            .await
        {
            Ok(links) => links,
            Err(e) => return self.fail(&company, e, started).await,
        };
        debug!(
            company_id = %company_id,
            adapter = adapter.name(),
            links = links.len(),
            "extracted job links"
        );

        // Zero links while active rows are on file smells like a board
        // layout change, not a board that emptied overnight. Treat it as a
        // parse failure instead of mass-soft-deleting; an operator clears
        // the errors if the board really did empty.
        if links.is_empty() {
            let active = self.store.active_jobs(company_id).await?;
            if !active.is_empty() {
                let e = ScrapeError::Parse(format!(
                    "adapter {} returned no links while {} active jobs exist",
                    adapter.name(),
                    active.len()
                ));
                return self.fail(&company, e, started).await;
            }
        }

        let outcome = match reconcile_job_links(&*self.store, company_id, &links, now).await {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(&company, e, started).await,
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        if let Err(e) = self.store.record_scrape_success(company_id, now).await {
            error!(company_id = %company_id, error = %e, "failed to record scrape success");
        }

        self.append_metrics(
            ScrapeMetrics::success(company_id, company.source_type, duration_ms).with_counts(
                outcome.total_found as u32,
                outcome.new_jobs() as u32,
                outcome.skipped_jobs as u32,
                outcome.soft_deleted_jobs as u32,
            ),
        )
        .await;

        let scheduled = self.schedule_detail_fetches(&company, &outcome).await;

        info!(
            company_id = %company_id,
            total = outcome.total_found,
            new = outcome.new_jobs(),
            skipped = outcome.skipped_jobs,
            soft_deleted = outcome.soft_deleted_jobs,
            scheduled,
            duration_ms,
            "scrape complete"
        );

        Ok(ScrapeOutcome::Completed {
            total_found: outcome.total_found,
            new_jobs: outcome.new_jobs(),
            skipped_jobs: outcome.skipped_jobs,
            soft_deleted_jobs: outcome.soft_deleted_jobs,
            scheduled_detail_fetches: scheduled,
        })
    }

    /// Scrape every company, spaced out, tolerating per-company failures.
    /// One bad company never stops the rest of the fleet.
    pub async fn scrape_all_companies(&self) -> Result<FleetSummary> {
        let companies = self.store.list_companies().await?;
        let mut summary = FleetSummary {
            companies_scheduled: companies.len(),
            ..Default::default()
        };
        info!(companies = companies.len(), "starting fleet scrape");

        for (i, company) in companies.iter().enumerate() {
            if i > 0 {
                sleep(self.settings.inter_company_delay).await;
            }
            match self.scrape_company(company.id).await {
                Ok(ScrapeOutcome::Skipped { reason }) => {
                    debug!(company_id = %company.id, reason = %reason, "company skipped");
                    summary.skipped += 1;
                }
                Ok(ScrapeOutcome::Completed {
                    scheduled_detail_fetches,
                    ..
                }) => {
                    summary.succeeded += 1;
                    summary.detail_fetches_scheduled += scheduled_detail_fetches;
                }
                Err(e) => {
                    // Already recorded against the company; keep going.
                    warn!(
                        company_id = %company.id,
                        company = %company.name,
                        error = %e,
                        "company scrape failed"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            scheduled = summary.companies_scheduled,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            "fleet scrape finished"
        );
        Ok(summary)
    }

    /// Re-queue detail enrichment for one job. The handler-side guard makes
    /// a duplicate retry harmless.
    pub async fn retry_failed_job(&self, job_id: JobId) -> Result<()> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(ScrapeError::JobNotFound(job_id))?;
        let company = self
            .store
            .get_company(job.company_id)
            .await?
            .ok_or(ScrapeError::CompanyNotFound(job.company_id))?;

        self.queue
            .enqueue(
                ScrapeTask::FetchJobDetails {
                    job_id: job.id,
                    company_id: company.id,
                    url: job.url.clone(),
                    source_type: company.source_type,
                },
                self.settings.job_details_delay,
            )
            .await?;
        info!(job_id = %job_id, url = %job.url, "detail fetch re-queued");
        Ok(())
    }

    /// Re-queue enrichment for every active unfetched job of a company,
    /// staggered to respect the detail-fetch rate limit.
    pub async fn retry_failed_jobs_for_company(&self, company_id: CompanyId) -> Result<usize> {
        let company = self
            .store
            .get_company(company_id)
            .await?
            .ok_or(ScrapeError::CompanyNotFound(company_id))?;
        let jobs = self.store.unfetched_jobs(company_id).await?;

        let mut scheduled = 0;
        for (i, job) in jobs.iter().enumerate() {
            let delay = self.settings.job_details_delay * (i as u32 + 1);
            let task = ScrapeTask::FetchJobDetails {
                job_id: job.id,
                company_id,
                url: job.url.clone(),
                source_type: company.source_type,
            };
            match self.queue.enqueue(task, delay).await {
                Ok(()) => scheduled += 1,
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "failed to re-queue detail fetch")
                }
            }
        }
        info!(company_id = %company_id, scheduled, "re-queued unfetched jobs");
        Ok(scheduled)
    }

    /// Zero a company's error list and backoff state. The only way out of
    /// the permanent-failure gate.
    pub async fn clear_company_errors(&self, company_id: CompanyId) -> Result<()> {
        self.store.clear_company_errors(company_id).await?;
        info!(company_id = %company_id, "company errors cleared");
        Ok(())
    }

    async fn schedule_detail_fetches(
        &self,
        company: &Company,
        outcome: &ReconcileOutcome,
    ) -> usize {
        let mut scheduled = 0;
        for (i, created) in outcome.created.iter().enumerate() {
            let delay = self.settings.job_details_delay * (i as u32 + 1);
            let task = ScrapeTask::FetchJobDetails {
                job_id: created.id,
                company_id: company.id,
                url: created.url.clone(),
                source_type: company.source_type,
            };
            match self.queue.enqueue(task, delay).await {
                Ok(()) => scheduled += 1,
                Err(e) => {
                    error!(
                        company_id = %company.id,
                        job_id = %created.id,
                        error = %e,
                        "failed to schedule detail fetch"
                    )
                }
            }
        }
        scheduled
    }

    /// Record the failure against the company, append a failure metrics
    /// row, then hand the error back to the caller.
    async fn fail(
        &self,
        company: &Company,
        e: ScrapeError,
        started: Instant,
    ) -> Result<ScrapeOutcome> {
        let duration_ms = started.elapsed().as_millis() as u64;
        let kind = e.kind();
        warn!(
            company_id = %company.id,
            company = %company.name,
            kind = kind.as_str(),
            error = %e,
            "scrape failed"
        );

        let scoped = ScrapingError::new(kind, e.to_string())
            .with_url(company.job_board_url.to_string())
            .with_timestamp(Utc::now());
        match self.store.record_scrape_failure(company.id, scoped).await {
            Ok(updated) => debug!(
                company_id = %company.id,
                level = updated.backoff.level,
                consecutive_failures = updated.backoff.consecutive_failures,
                "backoff updated"
            ),
            Err(store_err) => error!(
                company_id = %company.id,
                error = %store_err,
                "failed to record scrape failure"
            ),
        }

        self.append_metrics(ScrapeMetrics::failure(
            company.id,
            company.source_type,
            kind,
            e.to_string(),
            duration_ms,
        ))
        .await;

        Err(e)
    }

    async fn append_metrics(&self, metrics: ScrapeMetrics) {
        if let Err(e) = self.store.record_metrics(&metrics).await {
            error!(
                company_id = %metrics.company_id,
                error = %e,
                "failed to append scrape metrics"
            );
        }
    }
}

/// Routes queue deliveries into the pipeline. One handler instance serves
/// the whole worker.
pub struct PipelineHandler<S, Q> {
    orchestrator: Arc<ScrapeOrchestrator<S, Q>>,
    enricher: Arc<JobEnricher<S>>,
}

impl<S, Q> PipelineHandler<S, Q> {
    pub fn new(orchestrator: Arc<ScrapeOrchestrator<S, Q>>, enricher: Arc<JobEnricher<S>>) -> Self {
        Self {
            orchestrator,
            enricher,
        }
    }
}

#[async_trait]
impl<S, Q> TaskHandler for PipelineHandler<S, Q>
where
    S: ScraperStore + 'static,
    Q: TaskQueue + 'static,
{
    async fn handle(&self, task: ScrapeTask) -> Result<()> {
        match task {
            ScrapeTask::ScrapeCompany { company_id } => {
                self.orchestrator.scrape_company(company_id).await?;
                Ok(())
            }
            ScrapeTask::FetchJobDetails { job_id, url, .. } => {
                let outcome = self.enricher.enrich_job(job_id).await?;
                debug!(job_id = %job_id, url = %url, outcome = ?outcome, "detail fetch handled");
                Ok(())
            }
        }
    }
}
