//! Job-board scraping pipeline.
//!
//! Companies register a job board URL and an ATS platform; the pipeline
//! scrapes each board, diffs the discovered posting URLs against stored
//! jobs, and enriches new postings with structured details pulled by an
//! extraction service. Failures feed a per-company backoff model so a
//! broken or hostile board slows itself down instead of the fleet.
//!
//! # Modules
//!
//! - [`models`] - Companies, jobs, backoff state, metrics
//! - [`error`] - Error taxonomy and severity classification
//! - [`backoff`] - Pure backoff math over recorded failures
//! - [`ats`] - Per-platform link extraction adapters
//! - [`fetch`] - HTTP and render-service page fetchers
//! - [`ai`] - Extraction service abstraction + OpenAI implementation
//! - [`reconcile`] - Link-set diffing against stored jobs
//! - [`enrich`] - Posting-page detail enrichment
//! - [`orchestrator`] - Per-company driver and fleet loop
//! - [`queue`] - Deferred task scheduling
//! - [`store`] / [`stores`] - Storage traits, memory and Postgres backends
//! - [`testing`] - Canned fakes for tests

pub mod ai;
pub mod ats;
pub mod backoff;
pub mod config;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod reconcile;
pub mod store;
pub mod stores;
pub mod testing;

// Re-export the types most callers touch.
pub use ai::ExtractionAi;
pub use config::{Config, ScrapeSettings};
pub use enrich::{EnrichOutcome, JobEnricher};
pub use error::{ErrorKind, Result, ScrapeError};
pub use fetch::{FetcherSet, HttpFetcher, PageFetcher, RenderFetcher};
pub use models::{
    BackoffInfo, Company, CompanyId, ExtractedDetails, Job, JobDetails, JobId, ScrapeMetrics,
    ScrapingError, SourceType,
};
pub use orchestrator::{FleetSummary, PipelineHandler, ScrapeOrchestrator, ScrapeOutcome};
pub use queue::{InProcessQueue, ScrapeTask, TaskHandler, TaskQueue, TaskWorker};
pub use reconcile::{reconcile_job_links, ReconcileOutcome};
pub use store::{CompanyStore, JobStore, MetricsSink, ScraperStore};
pub use stores::{MemoryStore, PostgresStore};
