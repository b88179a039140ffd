pub mod dom;
pub mod olx;
pub mod otodom;
pub mod traits;
pub mod types;

pub use olx::OlxAdapter;
pub use otodom::OtodomAdapter;
pub use traits::SourceAdapter;
pub use types::RawExtraction;

use crate::models::Source;

/// The adapter that understands pages of `source`
pub fn adapter_for(source: Source) -> &'static dyn SourceAdapter {
    match source {
        Source::Olx => &OlxAdapter,
        Source::Otodom => &OtodomAdapter,
    }
}

/// Listing link with query string and fragment removed, so that tracking
/// parameters do not split one offer into several records
pub fn canonical_link(url: &str) -> String {
    match url::Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    }
}
