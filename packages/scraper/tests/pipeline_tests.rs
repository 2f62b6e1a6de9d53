//! Integration tests for the scrape pipeline.
//!
//! Everything runs against the in-memory store with the canned fetcher,
//! extraction mock, and recording queue; no network, database, or provider
//! keys involved.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use url::Url;

use scraper_core::testing::{greenhouse_board_html, MockAi, MockFetcher, RecordingQueue};
use scraper_core::{
    Company, CompanyId, CompanyStore, ErrorKind, FetcherSet, JobStore, MemoryStore,
    ScrapeOrchestrator, ScrapeOutcome, ScrapeSettings, ScrapeTask, SourceType,
};

const BOARD_URL: &str = "https://boards.greenhouse.io/initech";
const DETAIL_DELAY: Duration = Duration::from_secs(1);

struct TestPipeline {
    store: Arc<MemoryStore>,
    fetcher: Arc<MockFetcher>,
    ai: Arc<MockAi>,
    queue: Arc<RecordingQueue>,
    orchestrator: ScrapeOrchestrator<MemoryStore, RecordingQueue>,
}

fn pipeline() -> TestPipeline {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(MockFetcher::new());
    let ai = Arc::new(MockAi::new());
    let queue = Arc::new(RecordingQueue::new());
    let fetchers = FetcherSet::new(fetcher.clone());
    let orchestrator = ScrapeOrchestrator::new(store.clone(), queue.clone(), fetchers, ai.clone())
        .with_settings(ScrapeSettings::immediate().with_job_details_delay(DETAIL_DELAY));
    TestPipeline {
        store,
        fetcher,
        ai,
        queue,
        orchestrator,
    }
}

async fn add_company(store: &MemoryStore, source: SourceType, board: &str) -> CompanyId {
    let company = Company::new("Initech", Url::parse(board).unwrap(), source);
    let id = company.id;
    store.insert_company(&company).await.expect("insert company");
    id
}

fn completed(outcome: ScrapeOutcome) -> (usize, usize, usize, usize, usize) {
    match outcome {
        ScrapeOutcome::Completed {
            total_found,
            new_jobs,
            skipped_jobs,
            soft_deleted_jobs,
            scheduled_detail_fetches,
        } => (
            total_found,
            new_jobs,
            skipped_jobs,
            soft_deleted_jobs,
            scheduled_detail_fetches,
        ),
        other => panic!("expected completed scrape, got {other:?}"),
    }
}

// =============================================================================
// Discovery and scheduling
// =============================================================================

#[tokio::test]
async fn test_scrape_discovers_jobs_and_schedules_staggered_detail_fetches() {
    let p = pipeline();
    let company_id = add_company(&p.store, SourceType::Greenhouse, BOARD_URL).await;
    p.fetcher.set_page(
        BOARD_URL,
        greenhouse_board_html(&["/initech/jobs/100", "/initech/jobs/200"]),
    );

    let outcome = p.orchestrator.scrape_company(company_id).await.expect("scrape");
    let (total, new, skipped, deleted, scheduled) = completed(outcome);

    assert_eq!(total, 2);
    assert_eq!(new, 2);
    assert_eq!(skipped, 0);
    assert_eq!(deleted, 0);
    assert_eq!(scheduled, 2);
    assert_eq!(p.store.job_count(), 2);

    // Detail fetches are staggered one delay apart to stay under rate limits.
    let tasks = p.queue.scheduled();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].1, DETAIL_DELAY);
    assert_eq!(tasks[1].1, DETAIL_DELAY * 2);
    for (task, _) in &tasks {
        assert!(matches!(task, ScrapeTask::FetchJobDetails { .. }));
    }

    // One success metrics row with the reconcile counts.
    let metrics = p.store.metrics();
    assert_eq!(metrics.len(), 1);
    assert!(metrics[0].success);
    assert_eq!(metrics[0].total_jobs_found, Some(2));
    assert_eq!(metrics[0].new_jobs, Some(2));
    assert_eq!(metrics[0].net_job_change, Some(2));
}

#[tokio::test]
async fn test_rescrape_with_unchanged_board_is_idempotent() {
    let p = pipeline();
    let company_id = add_company(&p.store, SourceType::Greenhouse, BOARD_URL).await;
    p.fetcher.set_page(
        BOARD_URL,
        greenhouse_board_html(&["/initech/jobs/100", "/initech/jobs/200"]),
    );

    p.orchestrator.scrape_company(company_id).await.expect("first scrape");
    let after_first: Vec<_> = p
        .store
        .jobs_for_company(company_id)
        .into_iter()
        .map(|j| (j.url, j.last_scraped))
        .collect();

    let outcome = p.orchestrator.scrape_company(company_id).await.expect("second scrape");
    let (_, new, skipped, deleted, scheduled) = completed(outcome);

    assert_eq!(new, 0);
    assert_eq!(skipped, 2);
    assert_eq!(deleted, 0);
    assert_eq!(scheduled, 0);
    assert_eq!(p.store.job_count(), 2);

    // Every surviving job's last_scraped moved forward.
    for job in p.store.jobs_for_company(company_id) {
        let (_, before) = after_first
            .iter()
            .find(|(url, _)| *url == job.url)
            .expect("job survived");
        assert!(job.last_scraped >= *before);
        assert!(job.is_active());
    }

    // No extra detail fetches for already-known jobs.
    assert_eq!(p.queue.task_count(), 2);
}

#[tokio::test]
async fn test_no_two_jobs_share_company_and_url() {
    let p = pipeline();
    let company_id = add_company(&p.store, SourceType::Greenhouse, BOARD_URL).await;
    // The board repeats the same href, and we scrape it twice on top.
    p.fetcher.set_page(
        BOARD_URL,
        greenhouse_board_html(&[
            "/initech/jobs/100",
            "/initech/jobs/100",
            "/initech/jobs/200",
        ]),
    );

    p.orchestrator.scrape_company(company_id).await.expect("first scrape");
    p.orchestrator.scrape_company(company_id).await.expect("second scrape");

    let jobs = p.store.jobs_for_company(company_id);
    let mut pairs: Vec<_> = jobs.iter().map(|j| (j.company_id, j.url.clone())).collect();
    pairs.sort();
    let before = pairs.len();
    pairs.dedup();
    assert_eq!(pairs.len(), before, "duplicate (company, url) pair");
    assert_eq!(before, 2);
}

// =============================================================================
// Soft delete and resurrection
// =============================================================================

#[tokio::test]
async fn test_disappeared_url_is_soft_deleted_then_resurrected() {
    let p = pipeline();
    let company_id = add_company(&p.store, SourceType::Greenhouse, BOARD_URL).await;
    let both = greenhouse_board_html(&["/initech/jobs/100", "/initech/jobs/200"]);
    let only_first = greenhouse_board_html(&["/initech/jobs/100"]);

    p.fetcher.set_page(BOARD_URL, both.clone());
    p.orchestrator.scrape_company(company_id).await.expect("scrape 1");
    let original: Vec<_> = p.store.jobs_for_company(company_id);
    assert_eq!(original.len(), 2);

    p.fetcher.set_page(BOARD_URL, only_first);
    let outcome = p.orchestrator.scrape_company(company_id).await.expect("scrape 2");
    let (_, _, _, deleted, _) = completed(outcome);
    assert_eq!(deleted, 1);

    let active = p.store.active_jobs(company_id).await.expect("active jobs");
    assert_eq!(active.len(), 1);
    assert!(active[0].url.ends_with("/jobs/100"));

    // The row survives with deleted_at set rather than disappearing.
    let gone = p
        .store
        .find_job_by_url(company_id, "https://boards.greenhouse.io/initech/jobs/200")
        .await
        .expect("lookup")
        .expect("row kept");
    assert!(!gone.is_active());

    // Scrape 3: the URL comes back and the original row is revived.
    p.fetcher.set_page(BOARD_URL, both);
    let outcome = p.orchestrator.scrape_company(company_id).await.expect("scrape 3");
    let (_, new, skipped, _, scheduled) = completed(outcome);
    assert_eq!(new, 0, "resurrection is not a new job");
    assert_eq!(skipped, 2);
    assert_eq!(scheduled, 0, "resurrection does not re-queue enrichment");

    let revived = p
        .store
        .find_job_by_url(company_id, "https://boards.greenhouse.io/initech/jobs/200")
        .await
        .expect("lookup")
        .expect("row kept");
    assert!(revived.is_active());
    assert_eq!(
        revived.id,
        gone.id,
        "revived row keeps its identity"
    );
    assert_eq!(p.store.job_count(), 2);
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test]
async fn test_failed_board_fetch_records_error_and_metrics() {
    let p = pipeline();
    let company_id = add_company(&p.store, SourceType::Greenhouse, BOARD_URL).await;
    p.fetcher.fail_with_status(BOARD_URL, 500);

    let result = p.orchestrator.scrape_company(company_id).await;
    assert!(result.is_err());

    let company = p
        .store
        .get_company(company_id)
        .await
        .expect("get company")
        .expect("company exists");
    assert_eq!(company.scraping_errors.len(), 1);
    assert_eq!(company.scraping_errors[0].kind, ErrorKind::ServerError);
    assert_eq!(company.backoff.consecutive_failures, 1);
    assert_eq!(company.backoff.total_failures, 1);

    let metrics = p.store.metrics();
    assert_eq!(metrics.len(), 1);
    assert!(!metrics[0].success);
    assert_eq!(metrics[0].error_kind, Some(ErrorKind::ServerError));
    assert_eq!(p.store.job_count(), 0);
}

#[tokio::test]
async fn test_blocked_page_is_recorded_as_blocked() {
    let p = pipeline();
    let company_id = add_company(&p.store, SourceType::Greenhouse, BOARD_URL).await;
    p.fetcher.fail_blocked(BOARD_URL);

    let result = p.orchestrator.scrape_company(company_id).await;
    assert!(result.is_err());

    let company = p
        .store
        .get_company(company_id)
        .await
        .expect("get company")
        .expect("company exists");
    assert_eq!(company.scraping_errors[0].kind, ErrorKind::Blocked);
}

#[tokio::test]
async fn test_zero_links_with_active_jobs_is_treated_as_parse_failure() {
    let p = pipeline();
    let company_id = add_company(&p.store, SourceType::Greenhouse, BOARD_URL).await;
    p.fetcher.set_page(
        BOARD_URL,
        greenhouse_board_html(&["/initech/jobs/100", "/initech/jobs/200"]),
    );
    p.orchestrator.scrape_company(company_id).await.expect("first scrape");

    // Suddenly empty board, most likely a layout change the adapter missed.
    p.fetcher
        .set_page(BOARD_URL, "<html><body><p>no openings markup</p></body></html>");
    let result = p.orchestrator.scrape_company(company_id).await;
    assert!(result.is_err());

    // Nothing was soft-deleted and the failure fed the backoff model.
    let active = p.store.active_jobs(company_id).await.expect("active jobs");
    assert_eq!(active.len(), 2);
    let company = p
        .store
        .get_company(company_id)
        .await
        .expect("get company")
        .expect("company exists");
    assert_eq!(company.scraping_errors.len(), 1);
    assert_eq!(company.scraping_errors[0].kind, ErrorKind::ParseError);

    let metrics = p.store.metrics();
    assert_eq!(metrics.len(), 2);
    assert!(!metrics[1].success);
}

#[tokio::test]
async fn test_empty_board_with_no_history_completes_cleanly() {
    let p = pipeline();
    let company_id = add_company(&p.store, SourceType::Greenhouse, BOARD_URL).await;
    p.fetcher
        .set_page(BOARD_URL, "<html><body><p>no openings yet</p></body></html>");

    let outcome = p.orchestrator.scrape_company(company_id).await.expect("scrape");
    let (total, new, _, deleted, _) = completed(outcome);
    assert_eq!(total, 0);
    assert_eq!(new, 0);
    assert_eq!(deleted, 0);

    let company = p
        .store
        .get_company(company_id)
        .await
        .expect("get company")
        .expect("company exists");
    assert!(company.scraping_errors.is_empty());
    assert!(p.store.metrics()[0].success);
}

// =============================================================================
// Backoff gating
// =============================================================================

#[tokio::test]
async fn test_backoff_gate_skips_without_fetching_or_metrics() {
    let p = pipeline();
    let mut company = Company::new("Initech", Url::parse(BOARD_URL).unwrap(), SourceType::Greenhouse);
    company.backoff.level = 2;
    company.backoff.consecutive_failures = 3;
    company.backoff.next_allowed_scrape = Utc::now() + chrono::Duration::hours(1);
    let company_id = company.id;
    p.store.insert_company(&company).await.expect("insert company");

    let outcome = p.orchestrator.scrape_company(company_id).await.expect("scrape");
    assert!(matches!(outcome, ScrapeOutcome::Skipped { .. }));

    assert_eq!(p.fetcher.call_count(), 0, "no HTTP while backing off");
    assert!(p.store.metrics().is_empty(), "skips append no metrics");
    assert_eq!(p.queue.task_count(), 0);
}

#[tokio::test]
async fn test_permanent_gate_holds_until_errors_cleared() {
    let p = pipeline();
    let mut company = Company::new("Initech", Url::parse(BOARD_URL).unwrap(), SourceType::Greenhouse);
    company.backoff.total_failures = 50;
    // The time gate alone would allow a scrape right now.
    company.backoff.next_allowed_scrape = Utc::now() - chrono::Duration::hours(1);
    let company_id = company.id;
    p.store.insert_company(&company).await.expect("insert company");
    p.fetcher
        .set_page(BOARD_URL, greenhouse_board_html(&["/initech/jobs/100"]));

    let outcome = p.orchestrator.scrape_company(company_id).await.expect("scrape");
    assert!(matches!(outcome, ScrapeOutcome::Skipped { .. }));
    assert_eq!(p.fetcher.call_count(), 0);

    p.orchestrator
        .clear_company_errors(company_id)
        .await
        .expect("clear errors");

    let outcome = p.orchestrator.scrape_company(company_id).await.expect("scrape");
    let (total, ..) = completed(outcome);
    assert_eq!(total, 1, "immediately scrapeable after manual clear");
}

// =============================================================================
// Fleet driver
// =============================================================================

#[tokio::test]
async fn test_fleet_continues_past_a_failing_company() {
    let p = pipeline();

    let mut ids = Vec::new();
    for i in 0..5 {
        let board = format!("https://boards.greenhouse.io/company{i}");
        // Company 2 uses the generic adapter, whose extraction call will fail.
        let source = if i == 2 {
            SourceType::Other
        } else {
            SourceType::Greenhouse
        };
        ids.push(add_company(&p.store, source, &board).await);
        p.fetcher.set_page(
            &board,
            greenhouse_board_html(&[&format!("/company{i}/jobs/1")]),
        );
    }
    p.ai.fail_link_extraction();

    let summary = p.orchestrator.scrape_all_companies().await.expect("fleet scrape");

    assert_eq!(summary.companies_scheduled, 5);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);

    // Every board was attempted, including the ones after the failure.
    let calls = p.fetcher.calls();
    for i in 0..5 {
        let board = format!("https://boards.greenhouse.io/company{i}");
        assert!(calls.contains(&board), "company {i} board was fetched");
    }

    // The failing company carries the error; the others stay clean.
    let broken = p
        .store
        .get_company(ids[2])
        .await
        .expect("get company")
        .expect("company exists");
    assert_eq!(broken.scraping_errors.len(), 1);
    let healthy = p
        .store
        .get_company(ids[0])
        .await
        .expect("get company")
        .expect("company exists");
    assert!(healthy.scraping_errors.is_empty());
}

// =============================================================================
// Retry surface
// =============================================================================

#[tokio::test]
async fn test_retry_company_requeues_only_unfetched_jobs() {
    let p = pipeline();
    let company_id = add_company(&p.store, SourceType::Greenhouse, BOARD_URL).await;
    p.fetcher.set_page(
        BOARD_URL,
        greenhouse_board_html(&["/initech/jobs/100", "/initech/jobs/200"]),
    );
    p.orchestrator.scrape_company(company_id).await.expect("scrape");

    // Pretend the first job's enrichment already landed.
    let fetched = p
        .store
        .find_job_by_url(company_id, "https://boards.greenhouse.io/initech/jobs/100")
        .await
        .expect("lookup")
        .expect("job exists");
    let details = scraper_core::ExtractedDetails {
        title: Some("Engineer".into()),
        ..Default::default()
    };
    p.store
        .apply_job_details(fetched.id, &details)
        .await
        .expect("apply details");

    let before = p.queue.task_count();
    let scheduled = p
        .orchestrator
        .retry_failed_jobs_for_company(company_id)
        .await
        .expect("retry");

    assert_eq!(scheduled, 1);
    let tasks = p.queue.scheduled();
    assert_eq!(tasks.len(), before + 1);
    match &tasks[before].0 {
        ScrapeTask::FetchJobDetails { url, .. } => {
            assert!(url.ends_with("/jobs/200"), "only the unfetched job requeues")
        }
        other => panic!("unexpected task {other:?}"),
    }
}

#[tokio::test]
async fn test_clear_errors_resets_backoff_state() {
    let p = pipeline();
    let company_id = add_company(&p.store, SourceType::Greenhouse, BOARD_URL).await;
    p.fetcher.fail_with_status(BOARD_URL, 500);

    // Three consecutive failures climb the ladder and close the time gate.
    for _ in 0..3 {
        let _ = p.orchestrator.scrape_company(company_id).await;
    }
    let company = p
        .store
        .get_company(company_id)
        .await
        .expect("get company")
        .expect("company exists");
    assert!(company.backoff.level > 0);
    assert_eq!(company.backoff.total_failures, 3);
    let outcome = p.orchestrator.scrape_company(company_id).await.expect("scrape");
    assert!(matches!(outcome, ScrapeOutcome::Skipped { .. }));

    p.orchestrator
        .clear_company_errors(company_id)
        .await
        .expect("clear");

    let company = p
        .store
        .get_company(company_id)
        .await
        .expect("get company")
        .expect("company exists");
    assert!(company.scraping_errors.is_empty());
    assert_eq!(company.backoff.level, 0);
    assert_eq!(company.backoff.consecutive_failures, 0);
    assert_eq!(company.backoff.total_failures, 0);
}
