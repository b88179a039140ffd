//! Parsers for the Polish labels marketplaces print. Anything unrecognized
//! yields `None`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{BuildingType, OwnerType, ParkingType};

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:[.,]\d+)?").expect("valid regex"));
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+").expect("valid regex"));

/// First decimal number in `text`, accepting a decimal comma and thousands
/// separated by spaces: "2 500,50 zł" → 2500.5
pub fn number(text: &str) -> Option<f64> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    let m = NUMBER.find(&compact)?;
    m.as_str().replace(',', ".").parse().ok()
}

/// Whole amount in złoty, `None` for "Zapytaj o cenę" and similar
pub fn price(text: &str) -> Option<i64> {
    number(text)
        .filter(|p| *p > 0.0)
        .map(|p| p.round() as i64)
}

/// Floor area in square metres: "48,5 m²" → 48.5
pub fn footage(text: &str) -> Option<f64> {
    number(text).filter(|f| *f > 0.0)
}

/// "Kawalerka" → 1, "2 pokoje" → 2, "4 i więcej" → 4
pub fn rooms(text: &str) -> Option<i32> {
    let lower = text.to_lowercase();
    if lower.contains("kawalerka") {
        return Some(1);
    }
    first_integer(&lower).filter(|r| *r > 0)
}

/// "Parter" → 0, "Suterena" → -1, "3/4" → 3, "Powyżej 10" → 11
pub fn floor(text: &str) -> Option<i32> {
    let lower = text.trim().to_lowercase();
    if lower.starts_with("parter") {
        return Some(0);
    }
    if lower.starts_with("suterena") {
        return Some(-1);
    }
    let n = first_integer(&lower)?;
    if lower.starts_with("powyżej") || lower.starts_with('>') {
        Some(n + 1)
    } else {
        Some(n)
    }
}

/// "Tak" / "Nie" and their variants
pub fn yes_no(text: &str) -> Option<bool> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if lower.starts_with("tak") || lower == "yes" || lower == "true" {
        Some(true)
    } else if lower.starts_with("nie") || lower.starts_with("brak") || lower == "no" || lower == "false" {
        Some(false)
    } else {
        None
    }
}

pub fn owner_type(text: &str) -> Option<OwnerType> {
    let lower = text.to_lowercase();
    if lower.contains("dewelop") {
        Some(OwnerType::Developer)
    } else if lower.contains("biuro") || lower.contains("agencj") || lower.contains("firm") {
        Some(OwnerType::Agency)
    } else if lower.contains("prywat") {
        Some(OwnerType::Private)
    } else {
        None
    }
}

pub fn parking_type(text: &str) -> Option<ParkingType> {
    let lower = text.to_lowercase();
    if lower.contains("podziemn") || lower.contains("hala garażowa") {
        Some(ParkingType::Underground)
    } else if lower.contains("garaż") {
        Some(ParkingType::Garage)
    } else if lower.contains("ulic") {
        Some(ParkingType::Street)
    } else if lower.contains("brak") || lower.starts_with("nie") {
        Some(ParkingType::None)
    } else if lower.contains("miejsce") || lower.contains("parking") || lower.starts_with("tak") {
        Some(ParkingType::Dedicated)
    } else {
        None
    }
}

pub fn building_type(text: &str) -> Option<BuildingType> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    let kind = if lower.contains("apartamentowiec") {
        BuildingType::Apartment
    } else if lower.contains("blok") {
        BuildingType::Block
    } else if lower.contains("kamienica") {
        BuildingType::Tenement
    } else if lower.contains("szeregowiec") {
        BuildingType::Terraced
    } else if lower.contains("loft") {
        BuildingType::Loft
    } else if lower.contains("dom") {
        BuildingType::House
    } else {
        BuildingType::Other
    };
    Some(kind)
}

/// Trimmed text, `None` when blank
pub fn text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn first_integer(text: &str) -> Option<i32> {
    INTEGER.find(text)?.as_str().parse().ok()
}
