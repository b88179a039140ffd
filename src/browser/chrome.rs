use async_trait::async_trait;
use chrono::Utc;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::fetcher::{Fingerprint, RenderedPage};
use super::session::{BrowserSession, SessionFactory};
use crate::config::BrowserConfig;
use crate::error::{Result, ScrapeError};

/// Hides the usual automation giveaways before any page script runs
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['pl-PL', 'pl', 'en-US', 'en'] });
Object.defineProperty(window, 'chrome', { value: { runtime: {} }, writable: true });
"#;

/// Launches headless Chrome processes for the pool
pub struct ChromeFactory {
    config: BrowserConfig,
    /// DevTools call timeout applied to every tab
    tab_timeout: Duration,
}

impl ChromeFactory {
    pub fn new(config: BrowserConfig, tab_timeout: Duration) -> Self {
        Self { config, tab_timeout }
    }
}

#[async_trait]
impl SessionFactory for ChromeFactory {
    type Session = ChromeSession;

    async fn launch(&self) -> Result<ChromeSession> {
        let config = self.config.clone();
        let tab_timeout = self.tab_timeout;

        let browser = tokio::task::spawn_blocking(move || launch_browser(&config))
            .await
            .map_err(|e| ScrapeError::SessionLaunch(e.to_string()))??;

        info!(pid = ?browser.get_process_id(), "Launched headless Chrome");
        Ok(ChromeSession {
            browser: Mutex::new(Some(browser)),
            tab: Mutex::new(None),
            healthy: AtomicBool::new(true),
            tab_timeout,
        })
    }
}

fn launch_browser(config: &BrowserConfig) -> Result<Browser> {
    let args: Vec<&OsStr> = config.args.iter().map(OsStr::new).collect();

    let options = LaunchOptions::default_builder()
        .headless(config.headless)
        .sandbox(config.sandbox)
        .window_size(Some((config.window_width, config.window_height)))
        .path(config.chrome_path.clone())
        .idle_browser_timeout(Duration::from_secs(config.idle_timeout_secs))
        .args(args)
        .build()
        .map_err(|e| ScrapeError::SessionLaunch(format!("Failed to build launch options: {e}")))?;

    Browser::new(options)
        .map_err(|e| ScrapeError::SessionLaunch(format!("Failed to launch Chrome browser: {e}")))
}

/// A pooled headless Chrome process with at most one open tab
pub struct ChromeSession {
    browser: Mutex<Option<Browser>>,
    tab: Mutex<Option<Arc<Tab>>>,
    healthy: AtomicBool,
    tab_timeout: Duration,
}

impl ChromeSession {
    fn browser(&self) -> Result<Browser> {
        self.browser
            .lock()
            .clone()
            .ok_or_else(|| ScrapeError::SessionLaunch("session already closed".to_string()))
    }

    fn tab(&self, url: &str) -> Result<Arc<Tab>> {
        self.tab
            .lock()
            .clone()
            .ok_or_else(|| ScrapeError::navigation(url, "no prepared tab"))
    }

    /// Run a blocking DevTools call off the runtime, marking the session
    /// unhealthy if the call fails.
    async fn blocking<T, F>(&self, url: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let outcome = tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| ScrapeError::navigation(url, e))
            .and_then(|r| r.map_err(|e| ScrapeError::navigation(url, e)));

        if outcome.is_err() {
            self.healthy.store(false, Ordering::SeqCst);
        }
        outcome
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn prepare(&self, fingerprint: &Fingerprint) -> Result<()> {
        let browser = self.browser()?;
        let previous = self.tab.lock().take();
        let fingerprint = fingerprint.clone();
        let timeout = self.tab_timeout;

        let tab = self
            .blocking("about:blank", move || {
                if let Some(old) = previous {
                    if let Err(e) = old.close(false) {
                        debug!("Failed to close previous tab: {e}");
                    }
                }

                let tab = browser.new_tab()?;
                tab.set_default_timeout(timeout);
                tab.set_user_agent(
                    &fingerprint.user_agent,
                    Some(fingerprint.accept_language.as_str()),
                    Some(fingerprint.platform.as_str()),
                )?;

                let headers: HashMap<&str, &str> = fingerprint
                    .headers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                tab.set_extra_http_headers(headers)?;

                tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
                    source: STEALTH_SCRIPT.to_string(),
                    world_name: None,
                    include_command_line_api: None,
                    run_immediately: None,
                })?;
                Ok(tab)
            })
            .await?;

        *self.tab.lock() = Some(tab);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let tab = self.tab(url)?;
        let target = url.to_string();
        self.blocking(url, move || {
            tab.navigate_to(&target)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn scroll_to_bottom(&self, step_px: u32, interval: Duration) -> Result<()> {
        let tab = self.tab("scroll")?;
        let script = format!(
            r#"
            new Promise((resolve) => {{
                let total = 0;
                const timer = setInterval(() => {{
                    const height = document.body.scrollHeight;
                    window.scrollBy(0, {step});
                    total += {step};
                    if (total >= height) {{
                        clearInterval(timer);
                        window.scrollTo(0, 0);
                        resolve(total);
                    }}
                }}, {interval});
            }})
            "#,
            step = step_px,
            interval = interval.as_millis(),
        );

        let url = tab.get_url();
        self.blocking(&url, move || {
            tab.evaluate(&script, true)?;
            Ok(())
        })
        .await
    }

    async fn snapshot(&self, requested_url: &str) -> Result<RenderedPage> {
        let tab = self.tab(requested_url)?;
        let requested = requested_url.to_string();
        self.blocking(requested_url, move || {
            let html = tab.get_content()?;
            Ok(RenderedPage {
                final_url: tab.get_url(),
                requested_url: requested,
                html,
                fetched_at: Utc::now(),
            })
        })
        .await
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.browser.lock().is_some()
    }

    fn close(&self) {
        self.healthy.store(false, Ordering::SeqCst);
        if let Some(tab) = self.tab.lock().take() {
            if let Err(e) = tab.close(false) {
                warn!("Failed to close tab during teardown: {e}");
            }
        }
        // Dropping the last handle kills the Chrome process.
        if let Some(browser) = self.browser.lock().take() {
            debug!(pid = ?browser.get_process_id(), "Closing headless Chrome");
        }
    }
}
