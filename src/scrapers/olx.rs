use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use std::collections::BTreeMap;

use crate::browser::RenderedPage;
use crate::models::Source;
use crate::scrapers::dom;
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::RawExtraction;

static POSTED_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s+(\p{L}+)\s+(\d{4})").expect("valid regex"));
static VIEW_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d\s\u{a0}]*").expect("valid regex"));

const MONTHS: [&str; 12] = [
    "stycznia",
    "lutego",
    "marca",
    "kwietnia",
    "maja",
    "czerwca",
    "lipca",
    "sierpnia",
    "września",
    "października",
    "listopada",
    "grudnia",
];

pub struct OlxAdapter;

impl SourceAdapter for OlxAdapter {
    fn source(&self) -> Source {
        Source::Olx
    }

    fn extract(&self, page: &RenderedPage) -> RawExtraction {
        let doc = Html::parse_document(&page.html);

        let location = dom::first_text(
            &doc,
            &[".css-9pna1a", r#"[data-testid="map-aside-section"] p"#],
        );
        let (city, district) = split_location(location.as_deref());
        let inactive = dom::exists(&doc, r#"[data-testid="ad-inactive-msg"]"#);

        RawExtraction {
            title: dom::first_text(&doc, &[r#"[data-testid="offer_title"] h4"#, r#"[data-cy="ad_title"]"#, "h1"]),
            price: dom::first_text(&doc, &[r#"[data-testid="ad-price-container"] h3"#]),
            negotiable: Some(
                dom::first_text(&doc, &[r#"[data-testid="ad-price-container"]"#])
                    .map(|t| t.to_lowercase().contains("do negocjacji"))
                    .unwrap_or(false),
            ),
            description: dom::first_text(
                &doc,
                &[r#"[data-cy="ad_description"] .css-19duwlz"#, r#"[data-cy="ad_description"]"#],
            ),
            city,
            district,
            address: location,
            footage: None,
            images: dom::image_sources(&doc, r#"[data-testid="ad-photo"] img"#),
            views: if inactive { 0 } else { view_count(&doc) },
            inactive,
            posted_at: dom::first_text(&doc, &[r#"[data-testid="ad-posted-at"]"#])
                .and_then(|t| parse_posted_at(&t, page.fetched_at)),
            contact: contact(&doc),
            params: parameters(&doc),
        }
    }
}

/// "Warszawa, Mokotów" → (city, district)
fn split_location(location: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(location) = location else {
        return (None, None);
    };
    let mut parts = location.split(',').map(str::trim).filter(|p| !p.is_empty());
    let city = parts.next().map(str::to_string);
    let district = parts.next().map(str::to_string);
    (city, district)
}

/// Parameter rows come in three shapes: "Label: value", "Label value",
/// or a bare flag such as "Prywatne".
fn parameters(doc: &Html) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for row in dom::all(doc, r#"[data-testid="ad-parameters-container"] p"#) {
        let flag = dom::children(row, "span")
            .into_iter()
            .find(|span| span.value().attr("class").is_none())
            .and_then(dom::element_text);
        if let Some(flag) = flag {
            params.insert(flag, "Tak".to_string());
            continue;
        }

        let Some(text) = dom::element_text(row) else {
            continue;
        };
        let (key, value) = match text.split_once(':') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => match text.split_once(' ') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (text.as_str(), "Tak"),
            },
        };
        if !key.is_empty() {
            params.insert(key.to_string(), value.to_string());
        }
    }
    params
}

fn contact(doc: &Html) -> Option<String> {
    let name = dom::first_text(doc, &[r#"[data-testid="user-profile-user-name"]"#])?;
    let mut parts = vec![name];
    if let Some(since) = dom::first_text(doc, &[r#"[data-testid="member-since"] span"#]) {
        parts.push(format!("Na OLX od {since}"));
    }
    if let Some(seen) = dom::first_text(doc, &[r#"[data-testid="lastSeenBox"] .css-1p85e15"#]) {
        parts.push(seen);
    }
    Some(parts.join(" - "))
}

fn view_count(doc: &Html) -> u64 {
    dom::first_text(doc, &[r#"[data-testid="page-view-counter"]"#])
        .filter(|t| t.to_lowercase().contains("wyświetl"))
        .and_then(|t| {
            VIEW_COUNT.find(&t).and_then(|m| {
                m.as_str()
                    .chars()
                    .filter(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .ok()
            })
        })
        .unwrap_or(0)
}

/// "Dodane 12 marca 2025", "Dzisiaj o 10:15", "Wczoraj o 21:40"
fn parse_posted_at(text: &str, fetched_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = text.to_lowercase();
    if lower.contains("dzisiaj") {
        return Some(fetched_at);
    }
    if lower.contains("wczoraj") {
        return Some(fetched_at - Duration::days(1));
    }

    let caps = POSTED_DATE.captures(&lower)?;
    let day: u32 = caps[1].parse().ok()?;
    let month = MONTHS.iter().position(|m| *m == &caps[2])? as u32 + 1;
    let year: i32 = caps[3].parse().ok()?;
    let midnight = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}
