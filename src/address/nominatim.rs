use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::address::{Coordinates, Geocoder};
use crate::config::GeocoderConfig;
use crate::error::{Result, ScrapeError};

/// Geocoder backed by a Nominatim-compatible `/search` endpoint
pub struct NominatimGeocoder {
    client: Client,
    endpoint: String,
    country_codes: String,
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocoderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .context("Failed to create geocoder HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            country_codes: config.country_codes.clone(),
        })
    }
}

fn first_place(places: &[Place]) -> Option<Coordinates> {
    let place = places.first()?;
    Some(Coordinates {
        lat: place.lat.parse().ok()?,
        lng: place.lon.parse().ok()?,
    })
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode_address(&self, full_address: &str) -> Result<Option<Coordinates>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", full_address),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", self.country_codes.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ScrapeError::AddressResolution(e.to_string()))?;

        let places: Vec<Place> = response
            .json()
            .await
            .map_err(|e| ScrapeError::AddressResolution(e.to_string()))?;

        let found = first_place(&places);
        debug!(query = %full_address, ?found, "Geocoded");
        Ok(found)
    }
}
