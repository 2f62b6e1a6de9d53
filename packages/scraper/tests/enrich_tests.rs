//! Integration tests for job detail enrichment.
//!
//! The enricher runs against the in-memory store with canned fetchers and a
//! canned extraction service. Each test seeds a company and a placeholder
//! job the way reconciliation would have left them.

use std::sync::Arc;

use chrono::Utc;
use url::Url;

use scraper_core::testing::{posting_html, MockAi, MockFetcher};
use scraper_core::{
    Company, CompanyId, CompanyStore, EnrichOutcome, ErrorKind, ExtractedDetails, FetcherSet, Job,
    JobDetails, JobEnricher, JobId, JobStore, MemoryStore, SourceType,
};

const JOB_URL: &str = "https://boards.greenhouse.io/initech/jobs/100";

struct Harness {
    store: Arc<MemoryStore>,
    http: Arc<MockFetcher>,
    render: Arc<MockFetcher>,
    ai: Arc<MockAi>,
    enricher: JobEnricher<MemoryStore>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let http = Arc::new(MockFetcher::new());
    let render = Arc::new(MockFetcher::new());
    let ai = Arc::new(MockAi::new());
    let fetchers = FetcherSet::new(http.clone()).with_render(render.clone());
    let enricher = JobEnricher::new(store.clone(), fetchers, ai.clone());
    Harness {
        store,
        http,
        render,
        ai,
        enricher,
    }
}

async fn seed_company(store: &MemoryStore, source: SourceType) -> CompanyId {
    let company = Company::new(
        "Initech",
        Url::parse("https://boards.greenhouse.io/initech").unwrap(),
        source,
    );
    let id = company.id;
    store.insert_company(&company).await.expect("insert company");
    id
}

async fn seed_job(store: &MemoryStore, company_id: CompanyId, url: &str) -> JobId {
    let job = Job::placeholder(company_id, url, Utc::now());
    let id = job.id;
    store.insert_job(&job).await.expect("insert job");
    id
}

#[tokio::test]
async fn test_enrichment_patches_job_and_marks_fetched() {
    let h = harness();
    let company_id = seed_company(&h.store, SourceType::Greenhouse).await;
    let job_id = seed_job(&h.store, company_id, JOB_URL).await;

    h.http.set_page(
        JOB_URL,
        posting_html("Platform Engineer", "Build the job pipeline. Remote. $150k."),
    );
    h.ai.set_details_for(
        JOB_URL,
        ExtractedDetails {
            title: Some("Platform Engineer".into()),
            description: Some("Build the job pipeline.".into()),
            details: JobDetails {
                location: Some("Remote".into()),
                ..Default::default()
            },
        },
    );

    let outcome = h.enricher.enrich_job(job_id).await.expect("enrich");
    assert_eq!(outcome, EnrichOutcome::Enriched { fields: 3 });

    let job = h
        .store
        .get_job(job_id)
        .await
        .expect("get job")
        .expect("job exists");
    assert!(job.is_fetched);
    assert_eq!(job.title.as_deref(), Some("Platform Engineer"));
    assert_eq!(job.details.location.as_deref(), Some("Remote"));

    assert_eq!(h.ai.detail_calls(), vec![JOB_URL.to_string()]);
}

#[tokio::test]
async fn test_empty_extraction_still_marks_fetched() {
    let h = harness();
    let company_id = seed_company(&h.store, SourceType::Greenhouse).await;
    let job_id = seed_job(&h.store, company_id, JOB_URL).await;
    h.http
        .set_page(JOB_URL, posting_html("Shell", "This page has expired."));
    // MockAi's default details are all-empty.

    let outcome = h.enricher.enrich_job(job_id).await.expect("enrich");
    assert_eq!(outcome, EnrichOutcome::NothingExtracted);

    let job = h
        .store
        .get_job(job_id)
        .await
        .expect("get job")
        .expect("job exists");
    assert!(job.is_fetched, "empty extraction still marks the row fetched");
    assert!(job.title.is_none());

    // A redelivered task for the same row is now a no-op.
    let outcome = h.enricher.enrich_job(job_id).await.expect("enrich");
    assert_eq!(
        outcome,
        EnrichOutcome::Skipped {
            reason: "details already fetched"
        }
    );
    assert_eq!(h.ai.detail_calls().len(), 1);
}

#[tokio::test]
async fn test_fetch_failure_is_recorded_against_company() {
    let h = harness();
    let company_id = seed_company(&h.store, SourceType::Greenhouse).await;
    let job_id = seed_job(&h.store, company_id, JOB_URL).await;
    h.http.fail_with_status(JOB_URL, 503);

    let outcome = h.enricher.enrich_job(job_id).await.expect("non-fatal");
    match outcome {
        EnrichOutcome::Failed { kind, .. } => assert_eq!(kind, ErrorKind::JobFetchFailed),
        other => panic!("unexpected outcome {other:?}"),
    }

    let company = h
        .store
        .get_company(company_id)
        .await
        .expect("get company")
        .expect("company exists");
    assert_eq!(company.scraping_errors.len(), 1);
    assert_eq!(company.scraping_errors[0].kind, ErrorKind::JobFetchFailed);
    assert_eq!(company.scraping_errors[0].url.as_deref(), Some(JOB_URL));
    assert_eq!(company.backoff.total_failures, 1);

    // The row stays unfetched so a retry can pick it up.
    let job = h
        .store
        .get_job(job_id)
        .await
        .expect("get job")
        .expect("job exists");
    assert!(!job.is_fetched);
    assert!(h.ai.detail_calls().is_empty(), "no extraction without a page");
}

#[tokio::test]
async fn test_extraction_failure_is_recorded_against_company() {
    let h = harness();
    let company_id = seed_company(&h.store, SourceType::Greenhouse).await;
    let job_id = seed_job(&h.store, company_id, JOB_URL).await;
    h.http
        .set_page(JOB_URL, posting_html("Engineer", "Some description."));
    h.ai.fail_detail_extraction();

    let outcome = h.enricher.enrich_job(job_id).await.expect("non-fatal");
    match outcome {
        EnrichOutcome::Failed { kind, .. } => assert_eq!(kind, ErrorKind::JobDetailsFailed),
        other => panic!("unexpected outcome {other:?}"),
    }

    let company = h
        .store
        .get_company(company_id)
        .await
        .expect("get company")
        .expect("company exists");
    assert_eq!(company.scraping_errors[0].kind, ErrorKind::JobDetailsFailed);

    let job = h
        .store
        .get_job(job_id)
        .await
        .expect("get job")
        .expect("job exists");
    assert!(!job.is_fetched);
}

#[tokio::test]
async fn test_guards_skip_stale_deliveries() {
    let h = harness();
    let company_id = seed_company(&h.store, SourceType::Greenhouse).await;

    // Task for a row that was never created.
    let outcome = h.enricher.enrich_job(JobId::new()).await.expect("enrich");
    assert_eq!(
        outcome,
        EnrichOutcome::Skipped {
            reason: "job no longer exists"
        }
    );

    // Task for a row soft-deleted after scheduling.
    let deleted_id = seed_job(&h.store, company_id, JOB_URL).await;
    h.store
        .soft_delete_job(deleted_id, Utc::now())
        .await
        .expect("soft delete");
    let outcome = h.enricher.enrich_job(deleted_id).await.expect("enrich");
    assert_eq!(
        outcome,
        EnrichOutcome::Skipped {
            reason: "job was soft-deleted"
        }
    );

    assert_eq!(h.http.call_count(), 0, "skips never touch the network");
}

#[tokio::test]
async fn test_enrichment_skips_when_company_is_gone() {
    let h = harness();
    // Job row pointing at a company id with no row behind it.
    let job_id = seed_job(&h.store, CompanyId::new(), JOB_URL).await;
    h.http.set_page(JOB_URL, posting_html("Orphan", "text"));

    let outcome = h.enricher.enrich_job(job_id).await.expect("enrich");
    assert_eq!(
        outcome,
        EnrichOutcome::Skipped {
            reason: "company no longer exists"
        }
    );
}

#[tokio::test]
async fn test_refetch_forces_reextraction_without_erasing_fields() {
    let h = harness();
    let company_id = seed_company(&h.store, SourceType::Greenhouse).await;
    let job_id = seed_job(&h.store, company_id, JOB_URL).await;
    h.http
        .set_page(JOB_URL, posting_html("Platform Engineer", "First pass."));
    h.ai.set_details_for(
        JOB_URL,
        ExtractedDetails {
            title: Some("Platform Engineer".into()),
            details: JobDetails {
                location: Some("Minneapolis, MN".into()),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    h.enricher.enrich_job(job_id).await.expect("first enrich");

    // The posting was edited; the second extraction sees only a new field.
    h.ai.set_details_for(
        JOB_URL,
        ExtractedDetails {
            details: JobDetails {
                remote: Some("hybrid".into()),
                ..Default::default()
            },
            ..Default::default()
        },
    );

    // enrich_job refuses the already-fetched row, refetch_job does not.
    let outcome = h.enricher.enrich_job(job_id).await.expect("enrich");
    assert_eq!(
        outcome,
        EnrichOutcome::Skipped {
            reason: "details already fetched"
        }
    );
    let outcome = h.enricher.refetch_job(job_id).await.expect("refetch");
    assert_eq!(outcome, EnrichOutcome::Enriched { fields: 1 });

    let job = h
        .store
        .get_job(job_id)
        .await
        .expect("get job")
        .expect("job exists");
    assert_eq!(job.title.as_deref(), Some("Platform Engineer"));
    assert_eq!(job.details.location.as_deref(), Some("Minneapolis, MN"));
    assert_eq!(job.details.remote.as_deref(), Some("hybrid"));
}

#[tokio::test]
async fn test_ashby_details_go_through_render_fetcher() {
    let h = harness();
    let company_id = seed_company(&h.store, SourceType::Ashby).await;
    let url = "https://jobs.ashbyhq.com/initech/11111111-2222-3333-4444-555555555555";
    let job_id = seed_job(&h.store, company_id, url).await;

    h.render
        .set_page(url, posting_html("Designer", "Rendered posting body."));
    h.ai.set_default_details(ExtractedDetails {
        title: Some("Designer".into()),
        ..Default::default()
    });

    let outcome = h.enricher.enrich_job(job_id).await.expect("enrich");
    assert_eq!(outcome, EnrichOutcome::Enriched { fields: 1 });
    assert_eq!(h.render.call_count(), 1, "ashby postings need a browser");
    assert_eq!(h.http.call_count(), 0);
}
