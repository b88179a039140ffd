use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::address::{AddressExtractor, ProposedAddress};
use crate::error::Result;

/// A street marker followed by one to four capitalized words and an
/// optional house number: "ul. Nowy Świat 12a", "al. Jana Pawła II"
static STREET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:^|[\s,(])(?i:ul\.?|ulica|ulicy|al\.|aleja|alei|aleje|pl\.|plac|placu|os\.|osiedle)\s*(\p{Lu}[\p{L}\-]*(?:\s+(?:\p{Lu}[\p{L}\-]*|[IVX]+|\d{1,2}\s+\p{Lu}\p{L}+)){0,3})(?:\s+(\d{1,4}[a-zA-Z]?(?:/\d{1,4})?))?",
    )
    .expect("valid regex")
});

/// Regex-based extractor for listings that spell out "ul. …" in their text.
/// Titles are searched first, then the description.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicAddressExtractor;

impl HeuristicAddressExtractor {
    fn find(text: &str) -> Option<ProposedAddress> {
        let caps = STREET.captures(text)?;
        let street = caps.get(1)?.as_str().trim().to_string();
        let street_number = caps.get(2).map(|m| m.as_str().to_string());
        let confidence = if street_number.is_some() { 0.7 } else { 0.5 };
        Some(ProposedAddress {
            street: Some(street),
            street_number,
            confidence,
        })
    }
}

#[async_trait]
impl AddressExtractor for HeuristicAddressExtractor {
    async fn extract_address(&self, title: &str, text: Option<&str>) -> Result<ProposedAddress> {
        let found = Self::find(title).or_else(|| text.and_then(Self::find));
        Ok(found.unwrap_or_default())
    }
}
