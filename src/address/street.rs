//! Cleanup and plausibility checks for street names proposed by an extractor

const PREFIXES: [&str; 3] = ["ulica ", "ul. ", "ul "];

/// Words that extractors return when a listing names no street
const NOT_STREETS: [&str; 14] = [
    "brak",
    "centrum",
    "okolice",
    "blisko",
    "nieznana",
    "nieznany",
    "mieszkanie",
    "kawalerka",
    "pokój",
    "osiedle",
    "null",
    "none",
    "unknown",
    "n/a",
];

/// Strip the "ul." marker, surrounding punctuation and repeated whitespace.
/// Other prefixes such as "al." or "pl." are part of the name.
pub fn normalize_street_name(street: &str) -> String {
    let collapsed = street.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut name = collapsed.trim_matches(|c: char| c == ',' || c == '.' || c == '"' || c == '\'');
    for prefix in PREFIXES {
        if let Some(rest) = strip_prefix_ignore_case(name, prefix) {
            name = rest.trim_start();
            break;
        }
    }
    // "ul.Długa"
    if let Some(rest) = strip_prefix_ignore_case(name, "ul.") {
        name = rest.trim_start();
    }
    name.trim_end_matches(',').trim().to_string()
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        text.get(prefix.len()..)
    } else {
        None
    }
}

/// Reject names too short to geocode, without letters, or naming no street
pub fn is_valid_street_name(street: &str) -> bool {
    let chars = street.chars().count();
    if chars < 3 || chars > 80 {
        return false;
    }
    if !street.chars().any(char::is_alphabetic) {
        return false;
    }
    let lower = street.to_lowercase();
    !NOT_STREETS.contains(&lower.as_str())
}
