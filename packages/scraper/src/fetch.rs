//! Page fetching.
//!
//! [`HttpFetcher`] covers server-rendered boards with a browser-like client.
//! [`RenderFetcher`] goes through a headless-browser rendering service for
//! pages that are empty shells without JavaScript. [`FetcherSet`] picks
//! between them per ATS platform.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use tracing::{debug, warn};

use crate::error::{Result, ScrapeError};
use crate::models::SourceType;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const FETCH_TIMEOUT_SECS: u64 = 30;
// Rendering waits for client-side hydration, so it gets longer.
const RENDER_TIMEOUT_SECS: u64 = 60;

/// A fetched page, with the final URL after redirects.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub html: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch one page as HTML. Any non-success status is an error.
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// Plain HTTP fetcher with browser-like headers.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        debug!(url = %url, "fetching page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::from_reqwest(url, e))?;

        let status = response.status();
        let final_url = response.url().to_string();

        if status.as_u16() == 403 {
            // A 403 might be a plain auth wall or a bot-protection
            // interstitial; the body tells them apart.
            let body = response.text().await.unwrap_or_default();
            if looks_blocked(&body) {
                return Err(ScrapeError::Blocked { url: final_url });
            }
            return Err(ScrapeError::HttpStatus {
                status: 403,
                url: final_url,
            });
        }
        if !status.is_success() {
            return Err(ScrapeError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| ScrapeError::from_reqwest(&final_url, e))?;

        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            html,
        })
    }
}

const BLOCK_MARKERS: &[&str] = &[
    "cloudflare",
    "captcha",
    "access denied",
    "attention required",
    "just a moment",
];

fn looks_blocked(body: &str) -> bool {
    let lower = body.to_lowercase();
    BLOCK_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Fetches through a headless-browser rendering service (Browserless-style
/// `/content` API).
pub struct RenderFetcher {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl RenderFetcher {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RENDER_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn content_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        match &self.token {
            Some(token) => format!("{base}/content?token={token}"),
            None => format!("{base}/content"),
        }
    }
}

#[async_trait]
impl PageFetcher for RenderFetcher {
    fn name(&self) -> &'static str {
        "render"
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        debug!(url = %url, "rendering page");
        let response = self
            .client
            .post(self.content_url())
            .json(&serde_json::json!({
                "url": url,
                "gotoOptions": { "waitUntil": "networkidle2" },
            }))
            .send()
            .await
            .map_err(|e| ScrapeError::Render {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Render {
                url: url.to_string(),
                message: format!("service returned HTTP {}", status.as_u16()),
            });
        }

        let html = response.text().await.map_err(|e| ScrapeError::Render {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(FetchedPage {
            url: url.to_string(),
            status: status.as_u16(),
            html,
        })
    }
}

/// The fetchers available to the pipeline, picked per platform.
#[derive(Clone)]
pub struct FetcherSet {
    http: Arc<dyn PageFetcher>,
    render: Option<Arc<dyn PageFetcher>>,
}

impl FetcherSet {
    pub fn new(http: Arc<dyn PageFetcher>) -> Self {
        Self { http, render: None }
    }

    pub fn with_render(mut self, render: Arc<dyn PageFetcher>) -> Self {
        self.render = Some(render);
        self
    }

    /// Fetcher for board pages. Boards are server-rendered on every supported
    /// platform, so plain HTTP is enough.
    pub fn board(&self) -> Arc<dyn PageFetcher> {
        self.http.clone()
    }

    /// Fetcher for posting pages of the given platform.
    pub fn for_details(&self, source: SourceType) -> Arc<dyn PageFetcher> {
        if source.details_need_rendering() {
            if let Some(render) = &self.render {
                return render.clone();
            }
            warn!(source = %source, "rendering fetcher not configured, falling back to plain http");
        }
        self.http.clone()
    }
}
