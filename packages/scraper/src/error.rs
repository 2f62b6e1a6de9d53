//! Error taxonomy for the scraping pipeline.
//!
//! Two layers: [`ScrapeError`] is what operations return; [`ErrorKind`] is the
//! flat classification that gets persisted on companies and summed into
//! backoff severity. Every `ScrapeError` maps onto exactly one kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::{CompanyId, JobId};

pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Persisted classification of a scrape failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FetchFailed,
    Timeout,
    NetworkError,
    RateLimited,
    TooManyRequests,
    ParseError,
    ScrapingFailed,
    JobFetchFailed,
    JobDetailsFailed,
    Unauthorized,
    Forbidden,
    Blocked,
    ServerError,
    ServiceUnavailable,
    Unknown,
}

impl ErrorKind {
    /// Weight used when summing recent failures into a backoff bump.
    /// Transient hiccups weigh little; auth walls and bot blocks weigh a lot.
    pub fn severity(&self) -> u32 {
        match self {
            ErrorKind::Timeout | ErrorKind::NetworkError => 1,
            ErrorKind::RateLimited | ErrorKind::TooManyRequests => 2,
            ErrorKind::ParseError | ErrorKind::ScrapingFailed => 3,
            ErrorKind::JobFetchFailed | ErrorKind::JobDetailsFailed => 2,
            ErrorKind::Unauthorized | ErrorKind::Forbidden => 4,
            ErrorKind::Blocked => 5,
            ErrorKind::FetchFailed
            | ErrorKind::ServerError
            | ErrorKind::ServiceUnavailable
            | ErrorKind::Unknown => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FetchFailed => "fetch_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::TooManyRequests => "too_many_requests",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::ScrapingFailed => "scraping_failed",
            ErrorKind::JobFetchFailed => "job_fetch_failed",
            ErrorKind::JobDetailsFailed => "job_details_failed",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Blocked => "blocked",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a non-success HTTP status onto a persisted kind.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        408 => ErrorKind::Timeout,
        429 => ErrorKind::TooManyRequests,
        503 => ErrorKind::ServiceUnavailable,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::FetchFailed,
    }
}

/// Errors produced anywhere in the pipeline.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Non-success HTTP status from a board or posting page.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Transport-level failure: DNS, connect, timeout.
    #[error("request to {url} failed: {message}")]
    Request {
        url: String,
        message: String,
        kind: ErrorKind,
    },

    /// Anti-bot protection served a block page instead of content.
    #[error("blocked by bot protection at {url}")]
    Blocked { url: String },

    /// Page structure we could not make sense of.
    #[error("parse error: {0}")]
    Parse(String),

    /// The extraction service failed or returned something unusable.
    #[error("extraction failed: {message}")]
    Extraction { message: String, kind: ErrorKind },

    /// The rendering service failed to produce HTML.
    #[error("render of {url} failed: {message}")]
    Render { url: String, message: String },

    #[error("company {0} not found")]
    CompanyNotFound(CompanyId),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("task queue unavailable: {0}")]
    Queue(String),

    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScrapeError {
    /// Classify a reqwest transport error. Timeouts and connection refusals
    /// get distinct kinds because they carry different backoff weight.
    pub fn from_reqwest(url: impl Into<String>, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::NetworkError
        } else {
            ErrorKind::FetchFailed
        };
        ScrapeError::Request {
            url: url.into(),
            message: err.to_string(),
            kind,
        }
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        ScrapeError::Extraction {
            message: message.into(),
            kind: ErrorKind::ScrapingFailed,
        }
    }

    pub fn extraction_rate_limited(message: impl Into<String>) -> Self {
        ScrapeError::Extraction {
            message: message.into(),
            kind: ErrorKind::RateLimited,
        }
    }

    /// The persisted classification for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrapeError::HttpStatus { status, .. } => classify_status(*status),
            ScrapeError::Request { kind, .. } => *kind,
            ScrapeError::Blocked { .. } => ErrorKind::Blocked,
            ScrapeError::Parse(_) => ErrorKind::ParseError,
            ScrapeError::Extraction { kind, .. } => *kind,
            ScrapeError::Render { .. } | ScrapeError::Http(_) => ErrorKind::FetchFailed,
            ScrapeError::CompanyNotFound(_)
            | ScrapeError::JobNotFound(_)
            | ScrapeError::Queue(_)
            | ScrapeError::InvalidUrl { .. }
            | ScrapeError::Storage(_)
            | ScrapeError::Serialization(_) => ErrorKind::Unknown,
        }
    }
}
