use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// City stored on offers whose page did not expose one
pub const UNKNOWN_CITY: &str = "Nieznane";

/// Marketplace an offer was scraped from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Olx,
    Otodom,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Olx, Source::Otodom];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Olx => "olx",
            Source::Otodom => "otodom",
        }
    }

    /// Detect the marketplace from a listing URL's host
    pub fn from_url(url: &str) -> Option<Source> {
        let host = url::Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();
        if host == "otodom.pl" || host.ends_with(".otodom.pl") {
            Some(Source::Otodom)
        } else if host == "olx.pl" || host.ends_with(".olx.pl") {
            Some(Source::Olx)
        } else {
            None
        }
    }

    /// Whether listing pages on this marketplace expose a view counter.
    pub fn reports_views(&self) -> bool {
        matches!(self, Source::Olx)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "olx" => Ok(Source::Olx),
            "otodom" => Ok(Source::Otodom),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// Whether a job scrapes a freshly discovered offer or re-checks a known one
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    New,
    Existing,
}

impl Priority {
    pub fn from_is_new(is_new: bool) -> Self {
        if is_new {
            Priority::New
        } else {
            Priority::Existing
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::New => "new",
            Priority::Existing => "existing",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerType {
    Private,
    Agency,
    Developer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParkingType {
    Garage,
    Underground,
    Street,
    Dedicated,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildingType {
    Apartment,
    Block,
    Tenement,
    House,
    Terraced,
    Loft,
    Other,
}

/// Location information for an offer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub city: String,
    pub district: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Canonical offer record, unique by `link`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub id: u64,
    pub link: String,
    pub source: Source,
    pub title: String,
    pub price: i64,
    pub footage: f64,
    #[serde(flatten)]
    pub location: Location,
    pub description: String,
    pub summary: Option<String>,
    pub rooms: Option<i32>,
    pub floor: Option<i32>,
    pub furniture: Option<bool>,
    pub elevator: Option<bool>,
    pub pets: Option<bool>,
    pub negotiable: bool,
    pub owner_type: Option<OwnerType>,
    pub parking_type: Option<ParkingType>,
    pub building_type: Option<BuildingType>,
    pub rent_additional: Option<i64>,
    pub views: u64,
    pub images: Vec<String>,
    pub contact: Option<String>,
    pub info_additional: Option<String>,
    pub furnishing: Option<String>,
    pub media: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_new: bool,
}
