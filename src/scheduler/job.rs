use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::error::Result;
use crate::models::{Priority, Source};

/// One queue per marketplace and priority: "olx-new", "otodom-existing", …
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueueKey {
    pub source: Source,
    pub priority: Priority,
}

impl QueueKey {
    pub fn new(source: Source, priority: Priority) -> Self {
        Self { source, priority }
    }

    pub fn all() -> impl Iterator<Item = QueueKey> {
        Source::ALL.into_iter().flat_map(|source| {
            [Priority::New, Priority::Existing]
                .into_iter()
                .map(move |priority| QueueKey::new(source, priority))
        })
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.priority)
    }
}

/// A request to scrape one listing URL
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: u64,
    pub source: Source,
    pub url: String,
    pub priority: Priority,
    /// Attempts already finished, successful or not
    pub attempts_made: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn is_new(&self) -> bool {
        self.priority == Priority::New
    }
}

/// A finished job kept for inspection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job: Job,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Counters of one queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queue: String,
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Runs one attempt of a job
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> Result<()>;

    /// Release shared resources once the scheduler stops
    async fn shutdown(&self) {}
}
