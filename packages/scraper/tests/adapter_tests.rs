//! Cross-adapter contract tests.
//!
//! Every adapter, asked for links from a board page its platform produces,
//! must come back with absolute, deduplicated posting URLs. The structural
//! adapters additionally must treat unrecognizable pages as "no jobs", while
//! the generic adapter is allowed to fail loudly because the extraction
//! service behind it is the last resort.

use std::collections::HashSet;
use std::sync::Arc;

use url::Url;

use scraper_core::ats::{adapter_for, AtsAdapter, GenericAdapter};
use scraper_core::testing::{ashby_board_html, greenhouse_board_html, MockAi};
use scraper_core::{ErrorKind, SourceType};

fn board(url: &str) -> Url {
    Url::parse(url).expect("valid board url")
}

fn assert_absolute_and_unique(links: &[Url]) {
    let mut seen = HashSet::new();
    for link in links {
        assert!(
            matches!(link.scheme(), "http" | "https"),
            "{link} is not http(s)"
        );
        assert!(link.host_str().is_some(), "{link} has no host");
        assert!(seen.insert(link.as_str()), "{link} appears twice");
    }
}

#[tokio::test]
async fn test_registry_picks_adapter_by_source_type() {
    let ai: Arc<MockAi> = Arc::new(MockAi::new());
    assert_eq!(adapter_for(SourceType::Ashby, ai.clone()).name(), "ashby");
    assert_eq!(
        adapter_for(SourceType::Greenhouse, ai.clone()).name(),
        "greenhouse"
    );
    assert_eq!(adapter_for(SourceType::Other, ai).name(), "generic");
}

#[tokio::test]
async fn test_each_adapter_extracts_absolute_deduped_links() {
    let ai = Arc::new(MockAi::new());
    ai.set_links(&[
        "/careers/backend-engineer",
        "/careers/platform-engineer",
        "/careers/backend-engineer",
    ]);

    // (source, board url, board page, expected links)
    let cases = [
        (
            SourceType::Ashby,
            "https://jobs.ashbyhq.com/initech",
            ashby_board_html(&[
                ("11111111-2222-3333-4444-555555555555", "Backend Engineer"),
                ("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee", "Platform Engineer"),
                ("11111111-2222-3333-4444-555555555555", "Backend Engineer"),
            ]),
            2,
        ),
        (
            SourceType::Greenhouse,
            "https://boards.greenhouse.io/initech",
            greenhouse_board_html(&[
                "/initech/jobs/100",
                "/initech/jobs/200",
                "/initech/jobs/100",
            ]),
            2,
        ),
        (
            SourceType::Other,
            "https://initech.com/careers",
            "<html><body><main>whatever the service reads</main></body></html>".to_string(),
            2,
        ),
    ];

    for (source, board_url, html, expected) in cases {
        let adapter = adapter_for(source, ai.clone());
        let links = adapter
            .extract_job_links(&html, &board(board_url))
            .await
            .expect("extract links");
        assert_eq!(
            links.len(),
            expected,
            "{} returned {} links",
            adapter.name(),
            links.len()
        );
        assert_absolute_and_unique(&links);
        for link in &links {
            assert!(
                link.as_str().starts_with("https://"),
                "{} produced non-absolute link {link}",
                adapter.name()
            );
        }
    }
}

#[tokio::test]
async fn test_structural_adapters_treat_foreign_pages_as_empty() {
    let page = "<html><body><h1>Welcome to Initech</h1><a href='/about'>About</a></body></html>";
    let ai: Arc<MockAi> = Arc::new(MockAi::new());

    for source in [SourceType::Ashby, SourceType::Greenhouse] {
        let adapter = adapter_for(source, ai.clone());
        let links = adapter
            .extract_job_links(page, &board("https://initech.com/careers"))
            .await
            .expect("foreign page is not an error");
        assert!(links.is_empty(), "{} invented links", adapter.name());
    }
}

#[tokio::test]
async fn test_generic_adapter_resolves_service_links_against_board() {
    let ai = Arc::new(MockAi::new());
    ai.set_links(&[
        "/openings/42",
        "https://jobs.partner.io/initech/7",
        "/openings/42",
        "#apply-now",
        "mailto:jobs@initech.com",
    ]);

    let links = GenericAdapter::new(ai.clone())
        .extract_job_links("<html><body>board</body></html>", &board("https://initech.com/careers"))
        .await
        .expect("extract links");

    assert_eq!(
        links.iter().map(|u| u.as_str()).collect::<Vec<_>>(),
        vec![
            "https://initech.com/openings/42",
            "https://jobs.partner.io/initech/7",
        ]
    );
    assert_eq!(ai.link_calls(), vec!["https://initech.com/careers"]);
}

#[tokio::test]
async fn test_generic_adapter_propagates_service_failure() {
    let ai = Arc::new(MockAi::new());
    ai.fail_link_extraction();

    let err = GenericAdapter::new(ai)
        .extract_job_links("<html></html>", &board("https://initech.com/careers"))
        .await
        .expect_err("service failure must surface");
    assert_eq!(err.kind(), ErrorKind::ScrapingFailed);
}
