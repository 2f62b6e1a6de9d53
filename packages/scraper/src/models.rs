//! Core domain types for the scraping pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::ErrorKind;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier for a company whose job board we scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(Uuid);

impl CompanyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for CompanyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a single job posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Companies
// ============================================================================

/// Which ATS platform hosts a company's job board. Drives adapter selection
/// and whether posting pages need a rendering fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Ashby,
    Greenhouse,
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Ashby => "ashby",
            SourceType::Greenhouse => "greenhouse",
            SourceType::Other => "other",
        }
    }

    /// Ashby posting pages are client-rendered; a plain HTTP fetch sees an
    /// empty application shell.
    pub fn details_need_rendering(&self) -> bool {
        matches!(self, SourceType::Ashby)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ashby" => Ok(SourceType::Ashby),
            "greenhouse" => Ok(SourceType::Greenhouse),
            "other" => Ok(SourceType::Other),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// One recorded scrape failure. Companies keep these in a rolling 24 hour
/// window; their summed severity decides how hard to back off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapingError {
    pub at: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ScrapingError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            message: message.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// Rolling backoff state for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffInfo {
    /// 0 (healthy) through 7 (week-long delays).
    pub level: u32,
    /// Scrapes before this instant are skipped without a fetch.
    pub next_allowed_scrape: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub last_successful_scrape: Option<DateTime<Utc>>,
    /// Lifetime failure count. Only a manual error reset clears it.
    pub total_failures: u32,
}

impl BackoffInfo {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            level: 0,
            next_allowed_scrape: now,
            consecutive_failures: 0,
            last_successful_scrape: None,
            total_failures: 0,
        }
    }
}

impl Default for BackoffInfo {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// A company whose job board gets scraped on a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub job_board_url: Url,
    pub source_type: SourceType,
    /// Failures from the last 24 hours, pruned on every write.
    pub scraping_errors: Vec<ScrapingError>,
    pub backoff: BackoffInfo,
    pub last_scraped: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Company {
    pub fn new(name: impl Into<String>, job_board_url: Url, source_type: SourceType) -> Self {
        let now = Utc::now();
        Self {
            id: CompanyId::new(),
            name: name.into(),
            job_board_url,
            source_type,
            scraping_errors: Vec::new(),
            backoff: BackoffInfo::new(now),
            last_scraped: None,
            created_at: now,
        }
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// Structured attributes pulled from a posting page. Extraction is
/// best-effort and routinely fills only a few of these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobDetails {
    pub location: Option<String>,
    pub role_type: Option<String>,
    pub compensation: Option<String>,
    pub experience_level: Option<String>,
    pub remote: Option<String>,
    pub equity: Option<String>,
    pub employment_type: Option<String>,
}

impl JobDetails {
    pub fn is_empty(&self) -> bool {
        self.filled_field_count() == 0
    }

    pub fn filled_field_count(&self) -> usize {
        [
            &self.location,
            &self.role_type,
            &self.compensation,
            &self.experience_level,
            &self.remote,
            &self.equity,
            &self.employment_type,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }
}

/// Everything the extraction service can recover from one posting page.
/// An all-empty response is valid; the page may have been a shell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedDetails {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(flatten)]
    pub details: JobDetails,
}

impl ExtractedDetails {
    pub fn is_empty(&self) -> bool {
        self.filled_field_count() == 0
    }

    pub fn filled_field_count(&self) -> usize {
        let base = [&self.title, &self.description]
            .iter()
            .filter(|f| f.is_some())
            .count();
        base + self.details.filled_field_count()
    }
}

/// One job posting. The absolute URL is the dedup key within a company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub company_id: CompanyId,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub details: JobDetails,
    /// False until the detail enricher has processed the posting page.
    pub is_fetched: bool,
    pub first_seen_at: DateTime<Utc>,
    /// Last time a board scrape saw this URL.
    pub last_scraped: DateTime<Utc>,
    /// Set when a scrape no longer lists the URL. Rows are never hard-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Placeholder row for a URL seen for the first time. Details arrive
    /// later through the enrichment queue.
    pub fn placeholder(company_id: CompanyId, url: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            company_id,
            url: url.into(),
            title: None,
            description: None,
            details: JobDetails::default(),
            is_fetched: false,
            first_seen_at: now,
            last_scraped: now,
            deleted_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Patch in extracted fields and mark the posting fetched. Fields the
    /// extraction left empty keep their current value, so a forced refetch
    /// never erases data.
    pub fn apply_details(&mut self, extracted: &ExtractedDetails) {
        patch(&mut self.title, &extracted.title);
        patch(&mut self.description, &extracted.description);
        patch(&mut self.details.location, &extracted.details.location);
        patch(&mut self.details.role_type, &extracted.details.role_type);
        patch(&mut self.details.compensation, &extracted.details.compensation);
        patch(
            &mut self.details.experience_level,
            &extracted.details.experience_level,
        );
        patch(&mut self.details.remote, &extracted.details.remote);
        patch(&mut self.details.equity, &extracted.details.equity);
        patch(
            &mut self.details.employment_type,
            &extracted.details.employment_type,
        );
        self.is_fetched = true;
    }
}

fn patch(slot: &mut Option<String>, value: &Option<String>) {
    if value.is_some() {
        *slot = value.clone();
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Append-only record of one scrape attempt, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeMetrics {
    pub company_id: CompanyId,
    pub scraped_at: DateTime<Utc>,
    pub success: bool,
    pub ats: SourceType,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_jobs_found: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_jobs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_jobs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_deleted_jobs: Option<u32>,
    /// new_jobs minus soft_deleted_jobs, for trend queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_job_change: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ScrapeMetrics {
    pub fn success(company_id: CompanyId, ats: SourceType, duration_ms: u64) -> Self {
        Self {
            company_id,
            scraped_at: Utc::now(),
            success: true,
            ats,
            duration_ms,
            total_jobs_found: None,
            new_jobs: None,
            skipped_jobs: None,
            soft_deleted_jobs: None,
            net_job_change: None,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn failure(
        company_id: CompanyId,
        ats: SourceType,
        kind: ErrorKind,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            company_id,
            scraped_at: Utc::now(),
            success: false,
            ats,
            duration_ms,
            total_jobs_found: None,
            new_jobs: None,
            skipped_jobs: None,
            soft_deleted_jobs: None,
            net_job_change: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
        }
    }

    pub fn with_counts(
        mut self,
        total_found: u32,
        new_jobs: u32,
        skipped_jobs: u32,
        soft_deleted_jobs: u32,
    ) -> Self {
        self.total_jobs_found = Some(total_found);
        self.new_jobs = Some(new_jobs);
        self.skipped_jobs = Some(skipped_jobs);
        self.soft_deleted_jobs = Some(soft_deleted_jobs);
        self.net_job_change = Some(i64::from(new_jobs) - i64::from(soft_deleted_jobs));
        self
    }
}
