use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fields pulled from one rendered listing page, before normalization.
///
/// Every lookup that failed on the page is `None` or empty. Numeric fields
/// stay as page text; the normalizer owns their parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawExtraction {
    pub title: Option<String>,
    pub price: Option<String>,
    pub description: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    /// Free-text location line as shown on the page
    pub address: Option<String>,
    pub footage: Option<String>,
    pub images: Vec<String>,
    /// Always 0 on marketplaces without a view counter
    pub views: u64,
    /// The listing is marked as no longer active
    pub inactive: bool,
    pub posted_at: Option<DateTime<Utc>>,
    pub negotiable: Option<bool>,
    pub contact: Option<String>,
    /// Loosely structured "parameters" section, label → value
    pub params: BTreeMap<String, String>,
}

impl RawExtraction {
    /// Look up a parameter by label: an exact case-insensitive match wins,
    /// otherwise the first label containing `label`.
    pub fn param(&self, label: &str) -> Option<&str> {
        let wanted = label.to_lowercase();
        self.params
            .iter()
            .find(|(k, _)| k.to_lowercase() == wanted)
            .or_else(|| self.params.iter().find(|(k, _)| k.to_lowercase().contains(&wanted)))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn has_param(&self, label: &str) -> bool {
        let wanted = label.to_lowercase();
        self.params.keys().any(|k| k.to_lowercase() == wanted)
    }
}
