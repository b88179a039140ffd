//! Runtime configuration, loaded from an optional TOML file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::Priority;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: BrowserConfig,
    pub fetch: FetchConfig,
    pub queues: QueuesConfig,
    pub geocoder: GeocoderConfig,
    pub store: StoreConfig,
    pub matching: MatchingConfig,
    pub summary: SummaryConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate a TOML config file. Missing sections fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all fields, reporting every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.browser.capacity == 0 {
            errors.push("browser.capacity must be positive".to_string());
        }
        if self.fetch.user_agents.is_empty() {
            errors.push("fetch.user_agents must not be empty".to_string());
        }
        if self.fetch.navigation_timeout_secs == 0 {
            errors.push("fetch.navigation_timeout_secs must be positive".to_string());
        }
        if self.fetch.scroll_step_px == 0 {
            errors.push("fetch.scroll_step_px must be positive".to_string());
        }
        if self.fetch.jitter_min_ms > self.fetch.jitter_max_ms {
            errors.push("fetch.jitter_min_ms must be <= fetch.jitter_max_ms".to_string());
        }
        for (name, queue) in [("new", &self.queues.new), ("existing", &self.queues.existing)] {
            if queue.concurrency == 0 {
                errors.push(format!("queues.{name}.concurrency must be positive"));
            }
            if queue.attempts == 0 {
                errors.push(format!("queues.{name}.attempts must be positive"));
            }
            if queue.job_timeout_secs == 0 {
                errors.push(format!("queues.{name}.job_timeout_secs must be positive"));
            }
        }
        if url::Url::parse(&self.geocoder.endpoint).is_err() {
            errors.push(format!("geocoder.endpoint is not a valid URL: {}", self.geocoder.endpoint));
        }

        if let Some(url) = &self.matching.webhook_url {
            if url::Url::parse(url).is_err() {
                errors.push(format!("matching.webhook_url is not a valid URL: {url}"));
            }
        }

        if let Some(url) = &self.summary.endpoint {
            if url::Url::parse(url).is_err() {
                errors.push(format!("summary.endpoint is not a valid URL: {url}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "))
        }
    }
}

/// Headless Chrome pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Maximum live browser sessions
    pub capacity: usize,
    pub headless: bool,
    /// Chrome/Chromium binary; autodetected when unset
    pub chrome_path: Option<PathBuf>,
    pub sandbox: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Extra command-line switches passed to Chrome
    pub args: Vec<String>,
    /// Kill a session's browser after this much DevTools inactivity
    pub idle_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            headless: true,
            chrome_path: None,
            sandbox: false,
            window_width: 1920,
            window_height: 1080,
            args: vec![
                "--disable-gpu".to_string(),
                "--disable-blink-features=AutomationControlled".to_string(),
                "--disable-features=VizDisplayCompositor".to_string(),
                "--no-first-run".to_string(),
                "--disable-background-networking".to_string(),
                "--disable-component-extensions-with-background-pages".to_string(),
                "--disable-default-apps".to_string(),
                "--disable-extensions".to_string(),
                "--disable-ipc-flooding-protection".to_string(),
            ],
            idle_timeout_secs: 300,
        }
    }
}

/// Page loading and anti-detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub navigation_timeout_secs: u64,
    pub scroll_step_px: u32,
    pub scroll_interval_ms: u64,
    /// Dwell after scrolling before the page is snapshotted
    pub settle_ms: u64,
    /// Random pause before navigating, lower bound
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub accept_language: String,
    pub user_agents: Vec<String>,
}

impl FetchConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn scroll_interval(&self) -> Duration {
        Duration::from_millis(self.scroll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_secs: 30,
            scroll_step_px: 100,
            scroll_interval_ms: 100,
            settle_ms: 3000,
            jitter_min_ms: 2000,
            jitter_max_ms: 5000,
            accept_language: "pl-PL,pl;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/116.0.1938.69".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/117.0".to_string(),
            ],
        }
    }
}

/// Per-priority queue settings. Keys missing from a `[queues.*]` section
/// keep that priority's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "QueuesFile")]
pub struct QueuesConfig {
    pub new: QueueConfig,
    pub existing: QueueConfig,
}

impl QueuesConfig {
    pub fn for_priority(&self, priority: Priority) -> &QueueConfig {
        match priority {
            Priority::New => &self.new,
            Priority::Existing => &self.existing,
        }
    }
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            new: QueueConfig::new_offers(),
            existing: QueueConfig::existing_offers(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueuesFile {
    new: QueueOverrides,
    existing: QueueOverrides,
}

impl From<QueuesFile> for QueuesConfig {
    fn from(file: QueuesFile) -> Self {
        Self {
            new: file.new.apply(QueueConfig::new_offers()),
            existing: file.existing.apply(QueueConfig::existing_offers()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct QueueOverrides {
    concurrency: Option<usize>,
    job_timeout_secs: Option<u64>,
    attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    keep_completed: Option<usize>,
    keep_failed: Option<usize>,
}

impl QueueOverrides {
    fn apply(self, base: QueueConfig) -> QueueConfig {
        QueueConfig {
            concurrency: self.concurrency.unwrap_or(base.concurrency),
            job_timeout_secs: self.job_timeout_secs.unwrap_or(base.job_timeout_secs),
            attempts: self.attempts.unwrap_or(base.attempts),
            backoff_base_ms: self.backoff_base_ms.unwrap_or(base.backoff_base_ms),
            keep_completed: self.keep_completed.unwrap_or(base.keep_completed),
            keep_failed: self.keep_failed.unwrap_or(base.keep_failed),
        }
    }
}

/// Settings for one logical (source × priority) queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueConfig {
    /// Jobs executing at once on this queue
    pub concurrency: usize,
    /// Hard wall-clock budget of one attempt
    pub job_timeout_secs: u64,
    /// Attempts before a job is marked failed
    pub attempts: u32,
    /// Exponential backoff base delay
    pub backoff_base_ms: u64,
    /// Completed jobs kept for inspection
    pub keep_completed: usize,
    /// Failed jobs kept for inspection
    pub keep_failed: usize,
}

impl QueueConfig {
    /// Newly discovered offers: latency to notify matters
    pub fn new_offers() -> Self {
        Self {
            concurrency: 5,
            job_timeout_secs: 60,
            attempts: 3,
            backoff_base_ms: 5000,
            keep_completed: 100,
            keep_failed: 1000,
        }
    }

    /// Re-checks of known offers
    pub fn existing_offers() -> Self {
        Self {
            concurrency: 2,
            job_timeout_secs: 120,
            ..Self::new_offers()
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Nominatim-compatible search endpoint
    pub endpoint: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub country_codes: String,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://nominatim.openstreetmap.org/search".to_string(),
            user_agent: "offer-scout/0.1".to_string(),
            timeout_secs: 10,
            country_codes: "pl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON file per offer
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("offers"),
        }
    }
}

/// Where freshly stored offers are announced for alert matching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// POST target receiving `{"offerId": …}`; matching is skipped when unset
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

/// Optional service that condenses listing descriptions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// POST target receiving `{"title": …, "description": …}`; summaries are
    /// skipped when unset
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.browser.capacity, 8);
        assert_eq!(config.queues.new.concurrency, 5);
        assert_eq!(config.queues.existing.concurrency, 2);
        assert!(config.queues.existing.job_timeout() > config.queues.new.job_timeout());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [browser]
            capacity = 2

            [queues.existing]
            concurrency = 1

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.browser.capacity, 2);
        assert!(config.browser.headless);
        assert_eq!(config.queues.existing.concurrency, 1);
        assert_eq!(config.queues.existing.attempts, 3);
        assert_eq!(config.queues.existing.job_timeout_secs, 120);
        assert_eq!(config.queues.new.concurrency, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn partial_queue_section_keeps_priority_defaults() {
        let config: Config = toml::from_str(
            r#"
            [queues.existing]
            attempts = 5

            [queues.new]
            backoff_base_ms = 100
            "#,
        )
        .unwrap();

        let existing = &config.queues.existing;
        assert_eq!(existing.attempts, 5);
        assert_eq!(existing.concurrency, 2);
        assert_eq!(existing.job_timeout_secs, 120);

        let new = &config.queues.new;
        assert_eq!(new.backoff_base_ms, 100);
        assert_eq!(new.concurrency, 5);
        assert_eq!(new.job_timeout_secs, 60);
    }

    #[test]
    fn unknown_queue_key_is_rejected() {
        let parsed = toml::from_str::<Config>(
            r#"
            [queues.new]
            concurency = 3
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn validation_reports_all_errors() {
        let mut config = Config::default();
        config.browser.capacity = 0;
        config.queues.new.attempts = 0;
        config.fetch.user_agents.clear();
        config.summary.endpoint = Some("not a url".to_string());

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("summary.endpoint"));
        assert!(message.contains("browser.capacity"));
        assert!(message.contains("queues.new.attempts"));
        assert!(message.contains("fetch.user_agents"));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let queue = QueueConfig {
            backoff_base_ms: 5000,
            ..QueueConfig::new_offers()
        };
        assert_eq!(queue.backoff_delay(0), Duration::from_secs(5));
        assert_eq!(queue.backoff_delay(1), Duration::from_secs(10));
        assert_eq!(queue.backoff_delay(2), Duration::from_secs(20));
        assert_eq!(queue.backoff_delay(80), Duration::from_millis(u64::MAX));
    }
}
