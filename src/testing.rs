//! In-process fakes for the browser and the external collaborators

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::address::{AddressExtractor, Coordinates, Geocoder, ProposedAddress};
use crate::browser::fetcher::Fingerprint;
use crate::browser::{BrowserSession, RenderedPage, SessionFactory};
use crate::error::{Result, ScrapeError};
use crate::pipeline::MatchTrigger;

#[derive(Clone)]
pub struct FakePage {
    pub final_url: String,
    pub html: String,
}

#[derive(Clone, Default)]
pub enum Navigation {
    #[default]
    Normal,
    Hang,
    Fail(String),
}

pub struct FakeSession {
    pages: Arc<HashMap<String, FakePage>>,
    navigation: Navigation,
    current: Mutex<Option<String>>,
    calls: Mutex<Vec<&'static str>>,
    closed: AtomicBool,
    unhealthy: AtomicBool,
}

impl FakeSession {
    fn new(pages: Arc<HashMap<String, FakePage>>, navigation: Navigation) -> Self {
        Self {
            pages,
            navigation,
            current: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            unhealthy: AtomicBool::new(false),
        }
    }

    /// Serves `html` for every URL, reporting `final_url` as the landing page
    pub fn with_page(html: &str, final_url: &str) -> Self {
        let mut pages = HashMap::new();
        pages.insert(
            "*".to_string(),
            FakePage {
                final_url: final_url.to_string(),
                html: html.to_string(),
            },
        );
        Self::new(Arc::new(pages), Navigation::Normal)
    }

    pub fn hanging() -> Self {
        Self::new(Arc::new(HashMap::new()), Navigation::Hang)
    }

    pub fn failing_navigation(reason: &str) -> Self {
        Self::new(Arc::new(HashMap::new()), Navigation::Fail(reason.to_string()))
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn mark_unhealthy(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn prepare(&self, _fingerprint: &Fingerprint) -> Result<()> {
        self.calls.lock().push("prepare");
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.calls.lock().push("navigate");
        match &self.navigation {
            Navigation::Normal => {
                *self.current.lock() = Some(url.to_string());
                Ok(())
            }
            Navigation::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Navigation::Fail(reason) => {
                self.unhealthy.store(true, Ordering::SeqCst);
                Err(ScrapeError::navigation(url, reason))
            }
        }
    }

    async fn scroll_to_bottom(&self, _step_px: u32, _interval: Duration) -> Result<()> {
        self.calls.lock().push("scroll");
        Ok(())
    }

    async fn snapshot(&self, requested_url: &str) -> Result<RenderedPage> {
        self.calls.lock().push("snapshot");
        let current = self.current.lock().clone().unwrap_or_default();
        let page = self
            .pages
            .get(&current)
            .or_else(|| self.pages.get("*"))
            .cloned()
            .unwrap_or(FakePage {
                final_url: current.clone(),
                html: "<html></html>".to_string(),
            });
        Ok(RenderedPage {
            requested_url: requested_url.to_string(),
            final_url: page.final_url,
            html: page.html,
            fetched_at: Utc::now(),
        })
    }

    fn is_healthy(&self) -> bool {
        !self.is_closed() && !self.unhealthy.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pages: Arc<HashMap<String, FakePage>>,
    navigation: Mutex<Navigation>,
    launched: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeFactory {
    /// Sessions serve `pages`, keyed by requested URL
    pub fn serving(pages: Vec<(&str, &str, &str)>) -> Self {
        let pages = pages
            .into_iter()
            .map(|(url, final_url, html)| {
                (
                    url.to_string(),
                    FakePage {
                        final_url: final_url.to_string(),
                        html: html.to_string(),
                    },
                )
            })
            .collect();
        Self {
            pages: Arc::new(pages),
            ..Self::default()
        }
    }

    pub fn set_navigation(&self, navigation: Navigation) {
        *self.navigation.lock() = navigation;
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn fail_next_launch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn launch(&self) -> Result<FakeSession> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ScrapeError::SessionLaunch("chrome not found".to_string()));
        }
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession::new(Arc::clone(&self.pages), self.navigation.lock().clone()))
    }
}

/// Address model returning a fixed proposal
pub struct FixedAddress(pub ProposedAddress);

#[async_trait]
impl AddressExtractor for FixedAddress {
    async fn extract_address(&self, _title: &str, _text: Option<&str>) -> Result<ProposedAddress> {
        Ok(self.0.clone())
    }
}

/// Geocoder that records queries and answers from a table
#[derive(Default)]
pub struct RecordingGeocoder {
    pub answers: HashMap<String, Coordinates>,
    pub fail: bool,
    queries: Mutex<Vec<String>>,
}

impl RecordingGeocoder {
    pub fn answering(answers: Vec<(&str, f64, f64)>) -> Self {
        Self {
            answers: answers
                .into_iter()
                .map(|(q, lat, lng)| (q.to_string(), Coordinates { lat, lng }))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl Geocoder for RecordingGeocoder {
    async fn geocode_address(&self, full_address: &str) -> Result<Option<Coordinates>> {
        self.queries.lock().push(full_address.to_string());
        if self.fail {
            return Err(ScrapeError::AddressResolution("geocoder unavailable".to_string()));
        }
        Ok(self.answers.get(full_address).copied())
    }
}

/// Match trigger that counts invocations
#[derive(Default)]
pub struct CountingTrigger {
    pub fail: bool,
    calls: Mutex<Vec<u64>>,
}

impl CountingTrigger {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MatchTrigger for CountingTrigger {
    async fn process_new_offer(&self, offer_id: u64) -> Result<usize> {
        self.calls.lock().push(offer_id);
        if self.fail {
            return Err(ScrapeError::MatchTrigger("alert service down".to_string()));
        }
        Ok(1)
    }
}
