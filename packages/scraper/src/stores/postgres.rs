//! Postgres-backed store.
//!
//! Runtime `sqlx::query` with explicit binds and hand-rolled row mapping.
//! Backoff updates run inside a transaction with `SELECT ... FOR UPDATE` so
//! two workers recording outcomes for the same company cannot interleave;
//! the arithmetic is the same pure code the memory store uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::backoff;
use crate::error::{Result, ScrapeError};
use crate::models::{
    BackoffInfo, Company, CompanyId, ExtractedDetails, Job, JobId, ScrapeMetrics, ScrapingError,
};
use crate::store::{CompanyStore, JobStore, MetricsSink};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn company_from_row(row: &PgRow) -> Result<Company> {
    let id: Uuid = row.get("id");
    let url_raw: String = row.get("job_board_url");
    let job_board_url = Url::parse(&url_raw).map_err(|e| ScrapeError::InvalidUrl {
        url: url_raw.clone(),
        message: e.to_string(),
    })?;
    let source_raw: String = row.get("source_type");
    let source_type = source_raw.parse().map_err(ScrapeError::Parse)?;
    let scraping_errors: Vec<ScrapingError> = serde_json::from_value(row.get("scraping_errors"))?;
    let backoff: BackoffInfo = serde_json::from_value(row.get("backoff"))?;

    Ok(Company {
        id: CompanyId::from_uuid(id),
        name: row.get("name"),
        job_board_url,
        source_type,
        scraping_errors,
        backoff,
        last_scraped: row.get("last_scraped"),
        created_at: row.get("created_at"),
    })
}

fn job_from_row(row: &PgRow) -> Result<Job> {
    let id: Uuid = row.get("id");
    let company_id: Uuid = row.get("company_id");
    let details = serde_json::from_value(row.get("details"))?;

    Ok(Job {
        id: JobId::from_uuid(id),
        company_id: CompanyId::from_uuid(company_id),
        url: row.get("url"),
        title: row.get("title"),
        description: row.get("description"),
        details,
        is_fetched: row.get("is_fetched"),
        first_seen_at: row.get("first_seen_at"),
        last_scraped: row.get("last_scraped"),
        deleted_at: row.get("deleted_at"),
    })
}

#[async_trait]
impl CompanyStore for PostgresStore {
    async fn insert_company(&self, company: &Company) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO companies
                (id, name, job_board_url, source_type, scraping_errors, backoff, last_scraped, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(company.id.as_uuid())
        .bind(&company.name)
        .bind(company.job_board_url.as_str())
        .bind(company.source_type.as_str())
        .bind(serde_json::to_value(&company.scraping_errors)?)
        .bind(serde_json::to_value(&company.backoff)?)
        .bind(company.last_scraped)
        .bind(company.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_company(&self, id: CompanyId) -> Result<Option<Company>> {
        let row = sqlx::query("SELECT * FROM companies WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(company_from_row).transpose()
    }

    async fn list_companies(&self) -> Result<Vec<Company>> {
        let rows = sqlx::query("SELECT * FROM companies ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(company_from_row).collect()
    }

    async fn record_scrape_failure(&self, id: CompanyId, error: ScrapingError) -> Result<Company> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM companies WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(ScrapeError::CompanyNotFound(id))?;
        let mut company = company_from_row(&row)?;

        company.scraping_errors = backoff::errors_within_window(&company.scraping_errors, now);
        company.scraping_errors.push(error);
        company.backoff = backoff::after_failure(&company.backoff, &company.scraping_errors, now);

        sqlx::query("UPDATE companies SET scraping_errors = $2, backoff = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(serde_json::to_value(&company.scraping_errors)?)
            .bind(serde_json::to_value(&company.backoff)?)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(company)
    }

    async fn record_scrape_success(&self, id: CompanyId, at: DateTime<Utc>) -> Result<Company> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM companies WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(ScrapeError::CompanyNotFound(id))?;
        let mut company = company_from_row(&row)?;

        company.backoff = backoff::after_success(&company.backoff, at);
        company.last_scraped = Some(at);

        sqlx::query("UPDATE companies SET backoff = $2, last_scraped = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(serde_json::to_value(&company.backoff)?)
            .bind(at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(company)
    }

    async fn clear_company_errors(&self, id: CompanyId) -> Result<()> {
        let reset = BackoffInfo::new(Utc::now());
        let result = sqlx::query(
            "UPDATE companies SET scraping_errors = '[]'::jsonb, backoff = $2 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(serde_json::to_value(&reset)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScrapeError::CompanyNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        // Concurrent reconciles of the same company may race on a URL; the
        // unique index plus DO NOTHING keeps the first row.
        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, company_id, url, title, description, details, is_fetched,
                 first_seen_at, last_scraped, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (company_id, url) DO NOTHING
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.company_id.as_uuid())
        .bind(&job.url)
        .bind(&job.title)
        .bind(&job.description)
        .bind(serde_json::to_value(&job.details)?)
        .bind(job.is_fetched)
        .bind(job.first_seen_at)
        .bind(job.last_scraped)
        .bind(job.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_job_by_url(&self, company_id: CompanyId, url: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE company_id = $1 AND url = $2")
            .bind(company_id.as_uuid())
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn active_jobs(&self, company_id: CompanyId) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE company_id = $1 AND deleted_at IS NULL ORDER BY url",
        )
        .bind(company_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn unfetched_jobs(&self, company_id: CompanyId) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE company_id = $1 AND deleted_at IS NULL AND is_fetched = FALSE
            ORDER BY url
            "#,
        )
        .bind(company_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn touch_job(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET last_scraped = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ScrapeError::JobNotFound(id));
        }
        Ok(())
    }

    async fn restore_job(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET deleted_at = NULL, last_scraped = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ScrapeError::JobNotFound(id));
        }
        Ok(())
    }

    async fn soft_delete_job(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET deleted_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ScrapeError::JobNotFound(id));
        }
        Ok(())
    }

    async fn apply_job_details(&self, id: JobId, extracted: &ExtractedDetails) -> Result<()> {
        // jsonb_strip_nulls keeps patch semantics: fields the extraction left
        // empty never overwrite stored values.
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                details = details || jsonb_strip_nulls($4),
                is_fetched = TRUE
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(&extracted.title)
        .bind(&extracted.description)
        .bind(serde_json::to_value(&extracted.details)?)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ScrapeError::JobNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for PostgresStore {
    async fn record_metrics(&self, metrics: &ScrapeMetrics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scrape_metrics
                (company_id, scraped_at, success, ats, duration_ms, total_jobs_found,
                 new_jobs, skipped_jobs, soft_deleted_jobs, net_job_change,
                 error_kind, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(metrics.company_id.as_uuid())
        .bind(metrics.scraped_at)
        .bind(metrics.success)
        .bind(metrics.ats.as_str())
        .bind(metrics.duration_ms as i64)
        .bind(metrics.total_jobs_found.map(|v| v as i32))
        .bind(metrics.new_jobs.map(|v| v as i32))
        .bind(metrics.skipped_jobs.map(|v| v as i32))
        .bind(metrics.soft_deleted_jobs.map(|v| v as i32))
        .bind(metrics.net_job_change)
        .bind(metrics.error_kind.map(|k| k.as_str()))
        .bind(metrics.error_message.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
