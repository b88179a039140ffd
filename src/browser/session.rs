use async_trait::async_trait;
use std::time::Duration;

use super::fetcher::{Fingerprint, RenderedPage};
use crate::error::Result;

/// One live browser instance, handed out by the pool.
///
/// Calls on a session are issued by the single job currently holding it, so
/// implementations do not need to handle interleaved navigations.
#[async_trait]
pub trait BrowserSession: Send + Sync + 'static {
    /// Open a fresh tab with the given fingerprint applied
    async fn prepare(&self, fingerprint: &Fingerprint) -> Result<()>;

    /// Navigate the prepared tab and wait for the load to finish
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Scroll incrementally to the bottom of the page, then back to the top
    async fn scroll_to_bottom(&self, step_px: u32, interval: Duration) -> Result<()>;

    /// Capture the current DOM and final URL
    async fn snapshot(&self, requested_url: &str) -> Result<RenderedPage>;

    fn is_healthy(&self) -> bool;

    /// Tear down the underlying browser. Must be idempotent.
    fn close(&self);
}

/// Creates sessions lazily when the pool has a free slot
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: BrowserSession;

    async fn launch(&self) -> Result<Self::Session>;
}
