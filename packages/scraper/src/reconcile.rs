//! Reconciling extracted board links against stored jobs.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use url::Url;

use crate::error::Result;
use crate::models::{CompanyId, Job, JobId};
use crate::store::JobStore;

/// Postings seen again within this window are logged as fresh rather than
/// refreshed. Either way only `last_scraped` moves.
pub const REFRESH_WINDOW_DAYS: i64 = 7;

/// A row created by reconciliation, still waiting on detail enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedJob {
    pub id: JobId,
    pub url: String,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    /// Distinct URLs the scrape produced.
    pub total_found: usize,
    /// URLs that already had a row (touched or restored).
    pub skipped_jobs: usize,
    /// Active rows whose URL disappeared from the board.
    pub soft_deleted_jobs: usize,
    /// Rows inserted this pass.
    pub created: Vec<CreatedJob>,
}

impl ReconcileOutcome {
    pub fn new_jobs(&self) -> usize {
        self.created.len()
    }
}

/// Diff the URLs a scrape found against the company's stored jobs.
///
/// Nothing is ever hard-deleted here: URLs missing from the board are
/// soft-deleted, URLs that came back are restored with their enrichment
/// intact, and URLs already on file only get `last_scraped` bumped. The
/// caller decides what to do with the created rows.
pub async fn reconcile_job_links<S>(
    store: &S,
    company_id: CompanyId,
    links: &[Url],
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome>
where
    S: JobStore + ?Sized,
{
    let active_before = store.active_jobs(company_id).await?;

    // Dedupe while keeping first-seen order so insert order is stable.
    let mut found: Vec<String> = Vec::new();
    let mut found_set: HashSet<String> = HashSet::new();
    for link in links {
        let url = link.to_string();
        if found_set.insert(url.clone()) {
            found.push(url);
        }
    }

    let mut outcome = ReconcileOutcome {
        total_found: found.len(),
        ..Default::default()
    };
    let refresh_cutoff = now - Duration::days(REFRESH_WINDOW_DAYS);

    for url in &found {
        match store.find_job_by_url(company_id, url).await? {
            Some(job) if !job.is_active() => {
                // The posting came back after disappearing. Revive the row;
                // whatever details it already has are still good.
                debug!(job_id = %job.id, url = %url, "restoring soft-deleted job");
                store.restore_job(job.id, now).await?;
                outcome.skipped_jobs += 1;
            }
            Some(job) => {
                if job.last_scraped >= refresh_cutoff {
                    debug!(job_id = %job.id, url = %url, "job seen recently");
                } else {
                    debug!(job_id = %job.id, url = %url, "refreshing stale job");
                }
                store.touch_job(job.id, now).await?;
                outcome.skipped_jobs += 1;
            }
            None => {
                let job = Job::placeholder(company_id, url.clone(), now);
                store.insert_job(&job).await?;
                outcome.created.push(CreatedJob {
                    id: job.id,
                    url: job.url,
                });
            }
        }
    }

    for job in &active_before {
        if !found_set.contains(&job.url) {
            debug!(job_id = %job.id, url = %job.url, "job gone from board, soft deleting");
            store.soft_delete_job(job.id, now).await?;
            outcome.soft_deleted_jobs += 1;
        }
    }

    info!(
        company_id = %company_id,
        total = outcome.total_found,
        new = outcome.new_jobs(),
        skipped = outcome.skipped_jobs,
        soft_deleted = outcome.soft_deleted_jobs,
        "reconciled job links"
    );
    Ok(outcome)
}
