use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use std::collections::BTreeMap;

use crate::browser::RenderedPage;
use crate::models::Source;
use crate::scrapers::dom;
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::RawExtraction;

static FOOTAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:[.,]\d+)?\s*m²").expect("valid regex"));

const MAX_IMAGES: usize = 10;

/// Suffix fragments of the seller label that are newsletter prompts, not
/// part of the name
const PROMO_MARKERS: [&str; 8] = [
    "włącz",
    "powiadomienia",
    "okazji",
    "przegap",
    "subskryb",
    "subscribe",
    "follow",
    "obserwuj",
];

pub struct OtodomAdapter;

impl SourceAdapter for OtodomAdapter {
    fn source(&self) -> Source {
        Source::Otodom
    }

    fn extract(&self, page: &RenderedPage) -> RawExtraction {
        let doc = Html::parse_document(&page.html);

        let address = dom::first_text(&doc, &[r##"a[href="#map"]"##, ".e1aypsbg1"]);
        let (city, district) = split_address(address.as_deref());

        RawExtraction {
            title: dom::first_text(&doc, &[r#"[data-cy="adPageAdTitle"]"#, "h1"]),
            price: dom::first_text(
                &doc,
                &[r#"[data-cy="adPageHeaderPrice"]"#, r#"strong[aria-label="Cena"]"#, ".elm6lnc1"],
            ),
            description: dom::first_text(&doc, &[r#"[data-cy="adPageAdDescription"]"#, ".e1op7yyl1"]),
            city,
            district,
            address,
            footage: footage(&doc),
            images: images(&doc),
            views: 0,
            inactive: false,
            posted_at: None,
            negotiable: None,
            contact: contact(&doc),
            params: details(&doc),
        }
    }
}

/// "ul. Ogrodowa, Wola, Warszawa, mazowieckie": the city is second from the
/// end, the district third.
fn split_address(address: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(address) = address else {
        return (None, None);
    };
    let parts: Vec<&str> = address
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let from_end = |n: usize| {
        parts
            .len()
            .checked_sub(n)
            .and_then(|i| parts.get(i))
            .map(|s| s.to_string())
    };
    (from_end(2), from_end(3))
}

fn footage(doc: &Html) -> Option<String> {
    dom::all(doc, ".e1mm5aqc2")
        .into_iter()
        .filter_map(dom::element_text)
        .find_map(|t| FOOTAGE.find(&t).map(|m| m.as_str().to_string()))
}

fn images(doc: &Html) -> Vec<String> {
    dom::image_sources(doc, "img")
        .into_iter()
        .filter(|src| src.contains("otodom") || src.contains("cdn"))
        .take(MAX_IMAGES)
        .collect()
}

fn contact(doc: &Html) -> Option<String> {
    let seller = dom::first_text(doc, &[".e4jldvc1.css-vbzhap", ".e4jldvc1"]).map(|s| strip_promo(&s));
    let offer_type = dom::first_text(doc, &[".css-f4ltfo"]);
    let parts: Vec<String> = seller.into_iter().chain(offer_type).filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" - "))
    }
}

fn strip_promo(seller: &str) -> String {
    match seller.split_once(" - ") {
        Some((name, rest)) => {
            let rest = rest.to_lowercase();
            if PROMO_MARKERS.iter().any(|m| rest.contains(m)) {
                name.trim().to_string()
            } else {
                seller.trim().to_string()
            }
        }
        None => seller.trim().to_string(),
    }
}

/// Detail table rows, keyed by their canonical lowercase label
fn details(doc: &Html) -> BTreeMap<String, String> {
    let mut rows: Vec<(String, String)> = Vec::new();

    for section in dom::all(doc, ".e1mm5aqc1") {
        let cells = dom::children(section, ".e1mm5aqc2");
        if cells.len() < 2 {
            continue;
        }
        let key = dom::element_text(cells[0]);
        let value_cell = cells[cells.len() - 1];
        let spans: Vec<String> = dom::children(value_cell, "span")
            .into_iter()
            .filter_map(dom::element_text)
            .collect();
        let value = if spans.is_empty() {
            dom::element_text(value_cell)
        } else {
            Some(spans.join(", "))
        };
        if let (Some(k), Some(v)) = (key, value) {
            rows.push((k, v));
        }
    }

    if rows.is_empty() {
        let cells: Vec<String> = dom::all(doc, ".e1mm5aqc2")
            .into_iter()
            .filter_map(dom::element_text)
            .collect();
        rows.extend(
            cells
                .chunks_exact(2)
                .map(|pair| (pair[0].clone(), pair[1].clone())),
        );
    }

    let mut details = BTreeMap::new();
    for (key, value) in rows {
        let key = key.trim_end_matches(':').trim().to_lowercase();
        if let Some((canonical, value)) = canonical_detail(&key, value) {
            details.insert(canonical.to_string(), value);
        }
    }
    if details.values().any(|v| v.to_lowercase().contains("meble")) {
        details.insert("umeblowane".to_string(), "tak".to_string());
    }
    details
}

/// Map a page label onto the label the normalizer looks up
fn canonical_detail(key: &str, value: String) -> Option<(&'static str, String)> {
    let canonical = if key.contains("powierzchnia") {
        "powierzchnia"
    } else if key.contains("pokoi") {
        "liczba pokoi"
    } else if key.contains("piętro") {
        "piętro"
    } else if key.contains("winda") {
        "winda"
    } else if key.contains("rodzaj zabudowy") || key.contains("typ budynku") {
        "typ budynku"
    } else if key.contains("umeblowan") {
        "umeblowane"
    } else if key.contains("czynsz") && !key.contains("kaucja") {
        "czynsz dodatkowy"
    } else if key.contains("dostępne od") {
        return Some(("kontakt", format!("Dostępne od: {value}")));
    } else if key.contains("ogłoszeniodawc") {
        "typ ogłoszeniodawcy"
    } else if key.contains("informacje dodatkowe") {
        "informacje dodatkowe"
    } else if key.contains("wyposażenie") {
        "wyposażenie"
    } else if key.contains("bezpieczeństwo") || key.contains("zabezpieczenia") {
        return None;
    } else if key.contains("media") && !key.contains("social") {
        "media"
    } else if key.contains("parking") || key.contains("garaż") {
        "miejsce parkingowe"
    } else if key.contains("zwierz") {
        "zwierzęta"
    } else {
        return None;
    };
    Some((canonical, value))
}
