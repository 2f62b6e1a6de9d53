//! Operator CLI for the scraping pipeline.
//!
//! Runs one pipeline action against the configured Postgres deployment and
//! prints a JSON result. Detail fetches ride the in-process queue, so
//! commands that schedule them keep the process alive until the staggered
//! tasks have had their window; anything missed is retryable.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use scraper_core::ai::openai::OpenAiExtractor;
use scraper_core::backoff::{assess_health, errors_within_window, status_description};
use scraper_core::{
    Company, CompanyId, CompanyStore, Config, EnrichOutcome, ExtractionAi, FetcherSet,
    FleetSummary, HttpFetcher, InProcessQueue, JobEnricher, JobId, JobStore, PageFetcher,
    PipelineHandler, PostgresStore, RenderFetcher, ScrapeOrchestrator, ScrapeOutcome,
    ScrapeSettings, SourceType, TaskWorker,
};
use std::sync::Arc;

/// Cushion after the last scheduled delay for in-flight HTTP and extraction.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "scraperctl")]
#[command(about = "Job board scraping pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape one company's job board
    Scrape { company_id: Uuid },

    /// Scrape every registered company
    ScrapeAll,

    /// Re-queue detail enrichment for one unfetched job
    RetryJob { job_id: Uuid },

    /// Re-queue detail enrichment for a company's unfetched jobs
    RetryCompany { company_id: Uuid },

    /// Reset a company's error list and backoff state
    ClearErrors { company_id: Uuid },

    /// Force re-extraction of one job's details, even if already fetched
    RefetchJob { job_id: Uuid },

    /// Show backoff and job state for every company
    Status,

    /// Register a company to scrape
    AddCompany {
        name: String,
        job_board_url: String,
        /// ashby, greenhouse, or other
        source_type: String,
    },

    /// Apply pending database migrations
    Migrate,
}

// ============================================================================
// JSON Response Types
// ============================================================================

#[derive(Serialize)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    company_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduled: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scrape: Option<ScrapeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fleet: Option<FleetReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enrichment: Option<EnrichReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    companies: Option<Vec<CompanyStatus>>,
}

impl Response {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
            message: None,
            company_id: None,
            scheduled: None,
            scrape: None,
            fleet: None,
            enrichment: None,
            companies: None,
        }
    }

    fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::ok()
        }
    }
}

#[derive(Serialize)]
struct ScrapeReport {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_found: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_jobs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped_jobs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    soft_deleted_jobs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduled_detail_fetches: Option<usize>,
}

#[derive(Serialize)]
struct FleetReport {
    companies_scheduled: usize,
    succeeded: usize,
    skipped: usize,
    failed: usize,
    detail_fetches_scheduled: usize,
}

#[derive(Serialize)]
struct EnrichReport {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct CompanyStatus {
    id: Uuid,
    name: String,
    source_type: String,
    job_board_url: String,
    backoff_level: u32,
    consecutive_failures: u32,
    total_failures: u32,
    recent_errors: usize,
    health: String,
    description: String,
    next_allowed_scrape: DateTime<Utc>,
    last_scraped: Option<DateTime<Utc>>,
    active_jobs: usize,
    unfetched_jobs: usize,
}

fn output(resp: Response) {
    println!("{}", serde_json::to_string_pretty(&resp).unwrap());
}

// ============================================================================
// Wiring
// ============================================================================

type PgOrchestrator = ScrapeOrchestrator<PostgresStore, InProcessQueue>;

struct Pipeline {
    orchestrator: Arc<PgOrchestrator>,
    enricher: Arc<JobEnricher<PostgresStore>>,
    settings: ScrapeSettings,
    shutdown: CancellationToken,
    worker: tokio::task::JoinHandle<()>,
}

impl Pipeline {
    /// Give scheduled fire-and-forget tasks their window, then stop the
    /// worker and wait for in-flight handlers to finish.
    async fn drain(self, wait: Duration) {
        tokio::time::sleep(wait).await;
        self.shutdown.cancel();
        let _ = self.worker.await;
    }

    fn detail_drain_window(&self, scheduled: usize) -> Duration {
        if scheduled == 0 {
            Duration::ZERO
        } else {
            self.settings.job_details_delay * scheduled as u32 + DRAIN_GRACE
        }
    }
}

async fn build_pipeline() -> Result<Pipeline> {
    let config = Config::from_env()?;

    let store = Arc::new(
        PostgresStore::connect(&config.database_url)
            .await
            .context("Failed to connect to database")?,
    );
    store
        .migrate()
        .await
        .context("Failed to run database migrations")?;

    let ai: Arc<dyn ExtractionAi> = {
        let mut extractor = OpenAiExtractor::new(config.openai_api_key.clone());
        if let Some(model) = &config.openai_model {
            extractor = extractor.with_model(model.as_str());
        }
        Arc::new(extractor)
    };

    let http: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new()?);
    let mut fetchers = FetcherSet::new(http);
    if let Some(endpoint) = &config.render_endpoint {
        let mut render = RenderFetcher::new(endpoint.as_str())?;
        if let Some(token) = &config.render_token {
            render = render.with_token(token.as_str());
        }
        fetchers = fetchers.with_render(Arc::new(render));
    }

    let (queue, receiver) = InProcessQueue::new();
    let queue = Arc::new(queue);
    let settings = ScrapeSettings::default();

    let orchestrator = Arc::new(
        ScrapeOrchestrator::new(store.clone(), queue, fetchers.clone(), ai.clone())
            .with_settings(settings.clone()),
    );
    let enricher = Arc::new(JobEnricher::new(store.clone(), fetchers, ai));

    let handler = Arc::new(PipelineHandler::new(orchestrator.clone(), enricher.clone()));
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(TaskWorker::new(receiver, handler).run(shutdown.clone()));

    Ok(Pipeline {
        orchestrator,
        enricher,
        settings,
        shutdown,
        worker,
    })
}

/// Store-only connection for commands that need no fetchers or AI key.
async fn connect_store() -> Result<PostgresStore> {
    let _ = dotenvy::dotenv();
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let store = PostgresStore::connect(&database_url)
        .await
        .context("Failed to connect to database")?;
    store
        .migrate()
        .await
        .context("Failed to run database migrations")?;
    Ok(store)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scraper_core=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape { company_id } => cmd_scrape(company_id).await,
        Commands::ScrapeAll => cmd_scrape_all().await,
        Commands::RetryJob { job_id } => cmd_retry_job(job_id).await,
        Commands::RetryCompany { company_id } => cmd_retry_company(company_id).await,
        Commands::ClearErrors { company_id } => cmd_clear_errors(company_id).await,
        Commands::RefetchJob { job_id } => cmd_refetch_job(job_id).await,
        Commands::Status => cmd_status().await,
        Commands::AddCompany {
            name,
            job_board_url,
            source_type,
        } => cmd_add_company(name, job_board_url, source_type).await,
        Commands::Migrate => cmd_migrate().await,
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_scrape(company_id: Uuid) -> Result<()> {
    let pipeline = build_pipeline().await?;
    let result = pipeline
        .orchestrator
        .scrape_company(CompanyId::from_uuid(company_id))
        .await;

    match result {
        Ok(ScrapeOutcome::Completed {
            total_found,
            new_jobs,
            skipped_jobs,
            soft_deleted_jobs,
            scheduled_detail_fetches,
        }) => {
            let wait = pipeline.detail_drain_window(scheduled_detail_fetches);
            pipeline.drain(wait).await;
            output(Response {
                scrape: Some(ScrapeReport {
                    status: "completed".to_string(),
                    reason: None,
                    total_found: Some(total_found),
                    new_jobs: Some(new_jobs),
                    skipped_jobs: Some(skipped_jobs),
                    soft_deleted_jobs: Some(soft_deleted_jobs),
                    scheduled_detail_fetches: Some(scheduled_detail_fetches),
                }),
                ..Response::ok()
            });
        }
        Ok(ScrapeOutcome::Skipped { reason }) => {
            pipeline.drain(Duration::ZERO).await;
            output(Response {
                scrape: Some(ScrapeReport {
                    status: "skipped".to_string(),
                    reason: Some(reason),
                    total_found: None,
                    new_jobs: None,
                    skipped_jobs: None,
                    soft_deleted_jobs: None,
                    scheduled_detail_fetches: None,
                }),
                ..Response::ok()
            });
        }
        Err(e) => {
            pipeline.drain(Duration::ZERO).await;
            output(Response::err(e.to_string()));
        }
    }

    Ok(())
}

async fn cmd_scrape_all() -> Result<()> {
    let pipeline = build_pipeline().await?;
    let result = pipeline.orchestrator.scrape_all_companies().await;

    match result {
        Ok(FleetSummary {
            companies_scheduled,
            succeeded,
            skipped,
            failed,
            detail_fetches_scheduled,
        }) => {
            let wait = pipeline.detail_drain_window(detail_fetches_scheduled);
            pipeline.drain(wait).await;
            output(Response {
                fleet: Some(FleetReport {
                    companies_scheduled,
                    succeeded,
                    skipped,
                    failed,
                    detail_fetches_scheduled,
                }),
                ..Response::ok()
            });
        }
        Err(e) => {
            pipeline.drain(Duration::ZERO).await;
            output(Response::err(e.to_string()));
        }
    }

    Ok(())
}

async fn cmd_retry_job(job_id: Uuid) -> Result<()> {
    let pipeline = build_pipeline().await?;
    let result = pipeline
        .orchestrator
        .retry_failed_job(JobId::from_uuid(job_id))
        .await;

    match result {
        Ok(()) => {
            let wait = pipeline.detail_drain_window(1);
            pipeline.drain(wait).await;
            output(Response {
                message: Some("detail fetch queued".to_string()),
                scheduled: Some(1),
                ..Response::ok()
            });
        }
        Err(e) => {
            pipeline.drain(Duration::ZERO).await;
            output(Response::err(e.to_string()));
        }
    }

    Ok(())
}

async fn cmd_retry_company(company_id: Uuid) -> Result<()> {
    let pipeline = build_pipeline().await?;
    let result = pipeline
        .orchestrator
        .retry_failed_jobs_for_company(CompanyId::from_uuid(company_id))
        .await;

    match result {
        Ok(scheduled) => {
            let wait = pipeline.detail_drain_window(scheduled);
            pipeline.drain(wait).await;
            output(Response {
                message: Some("detail fetches queued".to_string()),
                scheduled: Some(scheduled),
                ..Response::ok()
            });
        }
        Err(e) => {
            pipeline.drain(Duration::ZERO).await;
            output(Response::err(e.to_string()));
        }
    }

    Ok(())
}

async fn cmd_clear_errors(company_id: Uuid) -> Result<()> {
    let store = connect_store().await?;

    match store
        .clear_company_errors(CompanyId::from_uuid(company_id))
        .await
    {
        Ok(()) => output(Response {
            message: Some("company errors and backoff cleared".to_string()),
            company_id: Some(company_id),
            ..Response::ok()
        }),
        Err(e) => output(Response::err(e.to_string())),
    }

    Ok(())
}

async fn cmd_refetch_job(job_id: Uuid) -> Result<()> {
    let pipeline = build_pipeline().await?;
    let result = pipeline.enricher.refetch_job(JobId::from_uuid(job_id)).await;
    pipeline.drain(Duration::ZERO).await;

    match result {
        Ok(outcome) => {
            let (success, report) = match outcome {
                EnrichOutcome::Enriched { fields } => (
                    true,
                    EnrichReport {
                        status: "enriched".to_string(),
                        fields: Some(fields),
                        reason: None,
                        error: None,
                    },
                ),
                EnrichOutcome::NothingExtracted => (
                    true,
                    EnrichReport {
                        status: "nothing_extracted".to_string(),
                        fields: Some(0),
                        reason: None,
                        error: None,
                    },
                ),
                EnrichOutcome::Skipped { reason } => (
                    true,
                    EnrichReport {
                        status: "skipped".to_string(),
                        fields: None,
                        reason: Some(reason.to_string()),
                        error: None,
                    },
                ),
                EnrichOutcome::Failed { kind, message } => (
                    false,
                    EnrichReport {
                        status: "failed".to_string(),
                        fields: None,
                        reason: None,
                        error: Some(format!("{kind}: {message}")),
                    },
                ),
            };
            output(Response {
                success,
                enrichment: Some(report),
                ..Response::ok()
            });
        }
        Err(e) => output(Response::err(e.to_string())),
    }

    Ok(())
}

async fn cmd_status() -> Result<()> {
    let store = connect_store().await?;
    let companies = store.list_companies().await?;
    let now = Utc::now();

    let mut rows = Vec::with_capacity(companies.len());
    for company in companies {
        let active = store.active_jobs(company.id).await?.len();
        let unfetched = store.unfetched_jobs(company.id).await?.len();
        let recent = errors_within_window(&company.scraping_errors, now);
        rows.push(CompanyStatus {
            id: company.id.into_uuid(),
            name: company.name,
            source_type: company.source_type.to_string(),
            job_board_url: company.job_board_url.to_string(),
            backoff_level: company.backoff.level,
            consecutive_failures: company.backoff.consecutive_failures,
            total_failures: company.backoff.total_failures,
            recent_errors: recent.len(),
            health: assess_health(&recent, &company.backoff).as_str().to_string(),
            description: status_description(&company.backoff, now),
            next_allowed_scrape: company.backoff.next_allowed_scrape,
            last_scraped: company.last_scraped,
            active_jobs: active,
            unfetched_jobs: unfetched,
        });
    }

    output(Response {
        companies: Some(rows),
        ..Response::ok()
    });

    Ok(())
}

async fn cmd_add_company(name: String, job_board_url: String, source_type: String) -> Result<()> {
    let store = connect_store().await?;

    let url = match url::Url::parse(&job_board_url) {
        Ok(url) => url,
        Err(e) => {
            output(Response::err(format!("invalid job board url: {e}")));
            return Ok(());
        }
    };
    let source: SourceType = match source_type.parse() {
        Ok(source) => source,
        Err(e) => {
            output(Response::err(e));
            return Ok(());
        }
    };

    let company = Company::new(name, url, source);
    let id = company.id;
    match store.insert_company(&company).await {
        Ok(()) => output(Response {
            message: Some("company registered".to_string()),
            company_id: Some(id.into_uuid()),
            ..Response::ok()
        }),
        Err(e) => output(Response::err(e.to_string())),
    }

    Ok(())
}

async fn cmd_migrate() -> Result<()> {
    // connect_store applies pending migrations on the way in.
    connect_store().await?;
    output(Response {
        message: Some("database migrations applied".to_string()),
        ..Response::ok()
    });

    Ok(())
}
