use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info};

use super::session::BrowserSession;
use crate::config::FetchConfig;
use crate::error::{Result, ScrapeError};

/// DOM snapshot of a loaded listing page
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub requested_url: String,
    /// URL after redirects
    pub final_url: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

/// Browser identity presented to the marketplace for one navigation
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: String,
    pub accept_language: String,
    pub platform: String,
    pub headers: Vec<(String, String)>,
}

/// Loads listing pages on pooled sessions
pub struct PageFetcher {
    config: FetchConfig,
}

impl PageFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    /// Pick a user agent from the configured pool and derive matching headers
    pub fn fingerprint(&self) -> Fingerprint {
        let mut rng = rand::thread_rng();
        let user_agent = self
            .config
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_default();

        let platform = if user_agent.contains("Macintosh") {
            "MacIntel"
        } else if user_agent.contains("Windows") {
            "Win32"
        } else {
            "Linux x86_64"
        };

        let headers = vec![
            ("Accept-Language".to_string(), self.config.accept_language.clone()),
            (
                "Accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8".to_string(),
            ),
            ("Cache-Control".to_string(), "no-cache".to_string()),
            ("Pragma".to_string(), "no-cache".to_string()),
            ("Sec-Fetch-Dest".to_string(), "document".to_string()),
            ("Sec-Fetch-Mode".to_string(), "navigate".to_string()),
            ("Sec-Fetch-Site".to_string(), "none".to_string()),
            ("Sec-Fetch-User".to_string(), "?1".to_string()),
            ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
        ];

        Fingerprint {
            user_agent,
            accept_language: self.config.accept_language.clone(),
            platform: platform.to_string(),
            headers,
        }
    }

    fn jitter(&self) -> Duration {
        let (min, max) = (self.config.jitter_min_ms, self.config.jitter_max_ms);
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Navigate, scroll through the page to trigger lazy content, dwell, and
    /// snapshot the DOM.
    ///
    /// Navigation and scrolling share one wall-clock budget; exceeding it
    /// yields `NavigationTimeout`. The returned page may still be missing
    /// late-loading sections.
    pub async fn fetch<S: BrowserSession + ?Sized>(&self, session: &S, url: &str) -> Result<RenderedPage> {
        let fingerprint = self.fingerprint();
        debug!(url, user_agent = %fingerprint.user_agent, "Preparing tab");
        session.prepare(&fingerprint).await?;

        tokio::time::sleep(self.jitter()).await;

        let budget = self.config.navigation_timeout();
        let settle = async {
            session.navigate(url).await?;
            session
                .scroll_to_bottom(self.config.scroll_step_px, self.config.scroll_interval())
                .await
        };
        match tokio::time::timeout(budget, settle).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ScrapeError::NavigationTimeout {
                    url: url.to_string(),
                    budget,
                })
            }
        }

        tokio::time::sleep(self.config.settle()).await;

        let page = session.snapshot(url).await?;
        info!(
            url,
            final_url = %page.final_url,
            bytes = page.html.len(),
            "Page loaded"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSession;

    fn quick_config() -> FetchConfig {
        FetchConfig {
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            settle_ms: 0,
            ..FetchConfig::default()
        }
    }

    #[test]
    fn fingerprint_uses_configured_agents() {
        let config = FetchConfig::default();
        let fetcher = PageFetcher::new(config.clone());
        for _ in 0..20 {
            let fp = fetcher.fingerprint();
            assert!(config.user_agents.contains(&fp.user_agent));
            assert!(fp
                .headers
                .iter()
                .any(|(k, v)| k == "Accept-Language" && v.starts_with("pl-PL")));
        }
    }

    #[tokio::test]
    async fn fetch_returns_snapshot_after_scroll() {
        let session = FakeSession::with_page("<html><h1>ok</h1></html>", "https://www.olx.pl/d/oferta/x.html");
        let fetcher = PageFetcher::new(quick_config());

        let page = fetcher.fetch(&session, "https://www.olx.pl/d/oferta/x.html?ref=1").await.unwrap();
        assert_eq!(page.html, "<html><h1>ok</h1></html>");
        assert_eq!(page.final_url, "https://www.olx.pl/d/oferta/x.html");
        assert_eq!(page.requested_url, "https://www.olx.pl/d/oferta/x.html?ref=1");
        assert_eq!(session.calls(), vec!["prepare", "navigate", "scroll", "snapshot"]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_navigation_times_out() {
        let session = FakeSession::hanging();
        let fetcher = PageFetcher::new(FetchConfig {
            navigation_timeout_secs: 5,
            ..quick_config()
        });

        let err = fetcher.fetch(&session, "https://www.otodom.pl/pl/oferta/x").await.unwrap_err();
        assert!(matches!(err, ScrapeError::NavigationTimeout { budget, .. } if budget == Duration::from_secs(5)));
        assert!(err.poisons_session());
    }

    #[tokio::test]
    async fn transport_error_propagates() {
        let session = FakeSession::failing_navigation("net::ERR_CONNECTION_RESET");
        let fetcher = PageFetcher::new(quick_config());

        let err = fetcher.fetch(&session, "https://www.olx.pl/d/oferta/y.html").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Navigation { .. }));
    }
}
