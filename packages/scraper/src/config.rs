use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Deployment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub openai_api_key: String,
    pub openai_model: Option<String>,
    pub render_endpoint: Option<String>,
    pub render_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            openai_api_key: env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,
            openai_model: env::var("OPENAI_MODEL").ok(),
            render_endpoint: env::var("RENDER_ENDPOINT").ok(),
            render_token: env::var("RENDER_TOKEN").ok(),
        })
    }
}

/// Pacing knobs for the pipeline. The delays exist to stay under upstream
/// anti-scraping thresholds, not for correctness, so tests shrink them to
/// zero freely.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// Pause before fetching a company's board page.
    pub job_board_delay: Duration,
    /// Spacing between scheduled detail fetches for one company.
    pub job_details_delay: Duration,
    /// Spacing between companies in a fleet run.
    pub inter_company_delay: Duration,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            job_board_delay: Duration::from_secs(2),
            job_details_delay: Duration::from_secs(1),
            inter_company_delay: Duration::from_secs(5),
        }
    }
}

impl ScrapeSettings {
    pub fn with_job_board_delay(mut self, delay: Duration) -> Self {
        self.job_board_delay = delay;
        self
    }

    pub fn with_job_details_delay(mut self, delay: Duration) -> Self {
        self.job_details_delay = delay;
        self
    }

    pub fn with_inter_company_delay(mut self, delay: Duration) -> Self {
        self.inter_company_delay = delay;
        self
    }

    /// All delays zeroed. Tests use this so paused-clock runs finish fast.
    pub fn immediate() -> Self {
        Self {
            job_board_delay: Duration::ZERO,
            job_details_delay: Duration::ZERO,
            inter_company_delay: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let settings = ScrapeSettings::default()
            .with_job_board_delay(Duration::from_millis(100))
            .with_inter_company_delay(Duration::ZERO);
        assert_eq!(settings.job_board_delay, Duration::from_millis(100));
        assert_eq!(settings.job_details_delay, Duration::from_secs(1));
        assert_eq!(settings.inter_company_delay, Duration::ZERO);
    }
}
