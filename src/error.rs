use std::time::Duration;
use thiserror::Error;

/// Errors raised while scraping a single offer
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("browser pool at capacity")]
    PoolExhausted,
    #[error("browser pool is shut down")]
    PoolShutdown,
    #[error("failed to launch browser session: {0}")]
    SessionLaunch(String),
    #[error("navigation to {url} did not settle within {budget:?}")]
    NavigationTimeout { url: String, budget: Duration },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("extraction incomplete, missing {0}")]
    ExtractionIncomplete(&'static str),
    #[error("address resolution failed: {0}")]
    AddressResolution(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("match trigger failed: {0}")]
    MatchTrigger(String),
    #[error("summary generation failed: {0}")]
    Summary(String),
    #[error("job exceeded its {0:?} budget")]
    JobTimeout(Duration),
    #[error("job cancelled by shutdown")]
    Cancelled,
}

impl ScrapeError {
    pub fn navigation(url: &str, reason: impl ToString) -> Self {
        ScrapeError::Navigation {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the scheduler should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ScrapeError::PoolShutdown | ScrapeError::Cancelled)
    }

    /// Whether a session that produced this error can no longer be trusted.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            ScrapeError::NavigationTimeout { .. }
                | ScrapeError::Navigation { .. }
                | ScrapeError::JobTimeout(_)
        )
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(err: std::io::Error) -> Self {
        ScrapeError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        ScrapeError::Persistence(err.to_string())
    }
}

pub type Result<T, E = ScrapeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_errors_are_final() {
        assert!(!ScrapeError::PoolShutdown.is_retryable());
        assert!(!ScrapeError::Cancelled.is_retryable());
        assert!(ScrapeError::Persistence("disk full".into()).is_retryable());
        assert!(ScrapeError::navigation("https://x", "reset").is_retryable());
    }

    #[test]
    fn timeouts_poison_session() {
        let timeout = ScrapeError::NavigationTimeout {
            url: "https://x".into(),
            budget: Duration::from_secs(30),
        };
        assert!(timeout.poisons_session());
        assert!(!ScrapeError::Persistence("x".into()).poisons_session());
    }
}
