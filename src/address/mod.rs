pub mod heuristic;
pub mod nominatim;
pub mod street;

pub use heuristic::HeuristicAddressExtractor;
pub use nominatim::NominatimGeocoder;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use street::{is_valid_street_name, normalize_street_name};

/// Street-level address an extractor found in listing text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedAddress {
    pub street: Option<String>,
    pub street_number: Option<String>,
    /// 0.0 to 1.0
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Proposes a street address from a listing's title and description
#[async_trait]
pub trait AddressExtractor: Send + Sync {
    async fn extract_address(&self, title: &str, text: Option<&str>) -> Result<ProposedAddress>;
}

/// Resolves a free-text address to coordinates. `Ok(None)` means the
/// geocoder found nothing.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode_address(&self, full_address: &str) -> Result<Option<Coordinates>>;
}

/// Address fields to store on the offer. All `None` when nothing resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedAddress {
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl ResolvedAddress {
    fn with_coordinates(mut self, coordinates: Option<Coordinates>) -> Self {
        if let Some(c) = coordinates {
            self.latitude = Some(c.lat);
            self.longitude = Some(c.lng);
        }
        self
    }
}

/// What the resolver knows about a listing's whereabouts
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressHints<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub city: Option<&'a str>,
    pub district: Option<&'a str>,
    /// Location line as printed on the page, if the marketplace has one
    pub location_line: Option<&'a str>,
}

/// Street extraction followed by geocoding.
///
/// A street that fails validation is dropped and coordinates come from the
/// district/city string instead. Failures of either collaborator never fail
/// the job; they leave the corresponding fields empty.
pub struct AddressResolver {
    extractor: Arc<dyn AddressExtractor>,
    geocoder: Arc<dyn Geocoder>,
}

impl AddressResolver {
    pub fn new(extractor: Arc<dyn AddressExtractor>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { extractor, geocoder }
    }

    pub async fn resolve(&self, hints: AddressHints<'_>) -> ResolvedAddress {
        if let Some(street) = self.accepted_street(&hints).await {
            let mut query = match &street.street_number {
                Some(number) => format!("{} {}", street.street.as_deref().unwrap_or_default(), number),
                None => street.street.clone().unwrap_or_default(),
            };
            if let Some(city) = hints.city {
                query = format!("{query}, {city}");
            }
            let coordinates = self.geocode(&query).await;
            return street.with_coordinates(coordinates);
        }

        match area_query(&hints) {
            Some(query) => ResolvedAddress::default().with_coordinates(self.geocode(&query).await),
            None => ResolvedAddress::default(),
        }
    }

    async fn accepted_street(&self, hints: &AddressHints<'_>) -> Option<ResolvedAddress> {
        let title = hints.title?;
        let proposed = match self.extractor.extract_address(title, hints.description).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Address extraction failed");
                return None;
            }
        };

        let raw = proposed.street?;
        let cleaned = normalize_street_name(&raw);
        let lowered = cleaned.to_lowercase();
        let echoes_area = [hints.city, hints.district]
            .into_iter()
            .flatten()
            .any(|area| area.trim().to_lowercase() == lowered);
        if !is_valid_street_name(&cleaned) || echoes_area {
            warn!(street = %raw, "Rejected proposed street, falling back to area geocoding");
            return None;
        }

        debug!(street = %cleaned, confidence = proposed.confidence, "Accepted street");
        Some(ResolvedAddress {
            street: Some(cleaned),
            street_number: proposed
                .street_number
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            ..ResolvedAddress::default()
        })
    }

    async fn geocode(&self, query: &str) -> Option<Coordinates> {
        match self.geocoder.geocode_address(query).await {
            Ok(found) => {
                if found.is_none() {
                    debug!(%query, "Geocoder returned no match");
                }
                found
            }
            Err(e) => {
                warn!(%query, error = %e, "Geocoding failed");
                None
            }
        }
    }
}

/// "district, city", the page's location line, or the city alone
fn area_query(hints: &AddressHints<'_>) -> Option<String> {
    if let Some(line) = hints.location_line.filter(|l| !l.trim().is_empty()) {
        if hints.district.is_none() || hints.city.map_or(true, |c| line.contains(c)) {
            return Some(line.trim().to_string());
        }
    }
    match (hints.district, hints.city) {
        (Some(district), Some(city)) => Some(format!("{district}, {city}")),
        (None, Some(city)) => Some(city.to_string()),
        _ => None,
    }
}
