//! Page-to-record processing and the post-commit integration points

pub mod processor;
pub mod upsert;

pub use processor::OfferProcessor;
pub use upsert::UpsertEngine;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::{MatchingConfig, SummaryConfig};
use crate::error::{Result, ScrapeError};

/// Evaluates a stored offer against user alerts. Returns how many alerts
/// matched.
#[async_trait]
pub trait MatchTrigger: Send + Sync {
    async fn process_new_offer(&self, offer_id: u64) -> Result<usize>;
}

/// Produces a short summary of a listing description
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, title: &str, description: &str) -> Result<Option<String>>;
}

/// Used when no alert service is configured
pub struct NoopMatchTrigger;

#[async_trait]
impl MatchTrigger for NoopMatchTrigger {
    async fn process_new_offer(&self, offer_id: u64) -> Result<usize> {
        debug!(offer_id, "No match service configured");
        Ok(0)
    }
}

/// Posts the offer id to an alert service over HTTP
pub struct WebhookMatchTrigger {
    client: Client,
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchReply {
    #[serde(default)]
    match_count: usize,
}

impl WebhookMatchTrigger {
    pub fn new(url: &str, config: &MatchingConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create match webhook client")?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl MatchTrigger for WebhookMatchTrigger {
    async fn process_new_offer(&self, offer_id: u64) -> Result<usize> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "offerId": offer_id }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ScrapeError::MatchTrigger(e.to_string()))?;

        // An empty body still counts as accepted
        let body = response
            .text()
            .await
            .map_err(|e| ScrapeError::MatchTrigger(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(0);
        }
        let reply: MatchReply =
            serde_json::from_str(&body).map_err(|e| ScrapeError::MatchTrigger(e.to_string()))?;
        Ok(reply.match_count)
    }
}

/// Asks a summary service over HTTP
pub struct WebhookSummarizer {
    client: Client,
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryReply {
    #[serde(default)]
    summary: Option<String>,
}

impl WebhookSummarizer {
    pub fn new(url: &str, config: &SummaryConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create summary client")?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Summarizer for WebhookSummarizer {
    async fn summarize(&self, title: &str, description: &str) -> Result<Option<String>> {
        let reply: SummaryReply = self
            .client
            .post(&self.url)
            .json(&json!({ "title": title, "description": description }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ScrapeError::Summary(e.to_string()))?
            .json()
            .await
            .map_err(|e| ScrapeError::Summary(e.to_string()))?;
        Ok(reply.summary.filter(|s| !s.trim().is_empty()))
    }
}
