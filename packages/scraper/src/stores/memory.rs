//! In-memory store for tests and local development.
//!
//! `RwLock<HashMap>` per entity. Backoff updates happen entirely inside one
//! write lock, which is what makes them atomic here.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backoff;
use crate::error::{Result, ScrapeError};
use crate::models::{
    BackoffInfo, Company, CompanyId, ExtractedDetails, Job, JobId, ScrapeMetrics, ScrapingError,
};
use crate::store::{CompanyStore, JobStore, MetricsSink};

#[derive(Default)]
pub struct MemoryStore {
    companies: RwLock<HashMap<CompanyId, Company>>,
    jobs: RwLock<HashMap<JobId, Job>>,
    metrics: RwLock<Vec<ScrapeMetrics>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn company_count(&self) -> usize {
        self.companies.read().unwrap().len()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    /// All recorded metrics, oldest first.
    pub fn metrics(&self) -> Vec<ScrapeMetrics> {
        self.metrics.read().unwrap().clone()
    }

    /// Every job row for a company, deleted ones included. Test helper.
    pub fn jobs_for_company(&self, company_id: CompanyId) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.company_id == company_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.url.cmp(&b.url));
        jobs
    }

    pub fn clear(&self) {
        self.companies.write().unwrap().clear();
        self.jobs.write().unwrap().clear();
        self.metrics.write().unwrap().clear();
    }
}

#[async_trait]
impl CompanyStore for MemoryStore {
    async fn insert_company(&self, company: &Company) -> Result<()> {
        self.companies
            .write()
            .unwrap()
            .insert(company.id, company.clone());
        Ok(())
    }

    async fn get_company(&self, id: CompanyId) -> Result<Option<Company>> {
        Ok(self.companies.read().unwrap().get(&id).cloned())
    }

    async fn list_companies(&self) -> Result<Vec<Company>> {
        let mut companies: Vec<Company> =
            self.companies.read().unwrap().values().cloned().collect();
        companies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(companies)
    }

    async fn record_scrape_failure(&self, id: CompanyId, error: ScrapingError) -> Result<Company> {
        let now = Utc::now();
        let mut companies = self.companies.write().unwrap();
        let company = companies
            .get_mut(&id)
            .ok_or(ScrapeError::CompanyNotFound(id))?;

        company.scraping_errors = backoff::errors_within_window(&company.scraping_errors, now);
        company.scraping_errors.push(error);
        company.backoff = backoff::after_failure(&company.backoff, &company.scraping_errors, now);
        Ok(company.clone())
    }

    async fn record_scrape_success(&self, id: CompanyId, at: DateTime<Utc>) -> Result<Company> {
        let mut companies = self.companies.write().unwrap();
        let company = companies
            .get_mut(&id)
            .ok_or(ScrapeError::CompanyNotFound(id))?;

        company.backoff = backoff::after_success(&company.backoff, at);
        company.last_scraped = Some(at);
        Ok(company.clone())
    }

    async fn clear_company_errors(&self, id: CompanyId) -> Result<()> {
        let mut companies = self.companies.write().unwrap();
        let company = companies
            .get_mut(&id)
            .ok_or(ScrapeError::CompanyNotFound(id))?;

        company.scraping_errors.clear();
        company.backoff = BackoffInfo::new(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        self.jobs.write().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn find_job_by_url(&self, company_id: CompanyId, url: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .unwrap()
            .values()
            .find(|j| j.company_id == company_id && j.url == url)
            .cloned())
    }

    async fn active_jobs(&self, company_id: CompanyId) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.company_id == company_id && j.is_active())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(jobs)
    }

    async fn unfetched_jobs(&self, company_id: CompanyId) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.company_id == company_id && j.is_active() && !j.is_fetched)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(jobs)
    }

    async fn touch_job(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(ScrapeError::JobNotFound(id))?;
        job.last_scraped = at;
        Ok(())
    }

    async fn restore_job(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(ScrapeError::JobNotFound(id))?;
        job.deleted_at = None;
        job.last_scraped = at;
        Ok(())
    }

    async fn soft_delete_job(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(ScrapeError::JobNotFound(id))?;
        job.deleted_at = Some(at);
        Ok(())
    }

    async fn apply_job_details(&self, id: JobId, extracted: &ExtractedDetails) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(ScrapeError::JobNotFound(id))?;
        job.apply_details(extracted);
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for MemoryStore {
    async fn record_metrics(&self, metrics: &ScrapeMetrics) -> Result<()> {
        self.metrics.write().unwrap().push(metrics.clone());
        Ok(())
    }
}
