//! Selector helpers that degrade to `None` instead of failing

use scraper::{ElementRef, Html, Selector};

pub fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Whitespace-collapsed text of an element, `None` when blank
pub fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Text of the first element matching any of `candidates`, tried in order
pub fn first_text(document: &Html, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|css| {
        let sel = selector(css)?;
        document.select(&sel).find_map(element_text)
    })
}

pub fn exists(document: &Html, css: &str) -> bool {
    selector(css)
        .map(|sel| document.select(&sel).next().is_some())
        .unwrap_or(false)
}

pub fn all<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match selector(css) {
        Some(sel) => document.select(&sel).collect(),
        None => Vec::new(),
    }
}

pub fn children<'a>(element: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match selector(css) {
        Some(sel) => element.select(&sel).collect(),
        None => Vec::new(),
    }
}

/// `src` (or lazy-load `data-src`) of every matching image, deduplicated
pub fn image_sources(document: &Html, css: &str) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();
    for img in all(document, css) {
        let src = img
            .value()
            .attr("src")
            .or_else(|| img.value().attr("data-src"))
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.starts_with("data:"));
        if let Some(src) = src {
            if !images.iter().any(|seen| seen == src) {
                images.push(src.to_string());
            }
        }
    }
    images
}
